use g2burn_core::Units;
use g2burn_settings::{Config, SettingsError};
use tempfile::TempDir;

fn customised() -> Config {
    let mut config = Config::new();
    config.connection.port = "/dev/ttyUSB0".to_string();
    config.generator.units = Units::Inches;
    config.generator.feed_rate_cut = 450.0;
    config.raster.threshold = Some(128);
    config.raster.bidirectional = false;
    config.workspace.width = 400.0;
    config
}

#[test]
fn test_json_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    let config = customised();

    config.save_to_file(&path).unwrap();
    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_toml_save_creates_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("g2burn").join("config.toml");

    Config::new().save_to_file(&path).unwrap();
    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, Config::new());
    assert_eq!(loaded.raster.threshold, None);
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[connection]\nbaud_rate = 0\n").unwrap();

    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::InvalidSetting { key, .. }) if key == "connection.baud_rate"
    ));
}

#[test]
fn test_malformed_json_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::JsonError(_))
    ));
}

#[test]
fn test_explicit_path_wins() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    customised().save_to_file(&path).unwrap();

    let loaded = Config::load_or_default(Some(&path)).unwrap();
    assert_eq!(loaded.connection.port, "/dev/ttyUSB0");
}
