//! Configuration for G2burn
//!
//! Every tunable the generator, raster converter and streaming controller
//! take lives here as plain data. Nothing is process-global: callers load a
//! [`Config`], convert the sections they need and pass them down.
//!
//! Files are JSON or TOML, chosen by extension. Missing sections and keys
//! fall back to their defaults.

use crate::error::{SettingsError, SettingsResult};
use g2burn_core::Units;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "g2burn";
const CONFIG_FILE: &str = "config.toml";

/// Serial connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Last used port, empty when none
    pub port: String,
    pub baud_rate: u32,
    /// Upper bound on each read in the streaming loop
    pub read_timeout_ms: u64,
    /// Wait after opening the port for the board to finish its reset
    pub settle_delay_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            read_timeout_ms: 20,
            settle_delay_ms: 2000,
        }
    }
}

/// Streaming protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Controller receive buffer in bytes (GRBL: 128)
    pub max_buffer_bytes: usize,
    pub poll_interval_ms: u64,
    pub stall_timeout_ms: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 128,
            poll_interval_ms: 200,
            stall_timeout_ms: 10_000,
        }
    }
}

/// Motion program generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    /// Rapid feed, mm/min
    pub feed_rate_travel: f64,
    /// Burn feed, mm/min
    pub feed_rate_cut: f64,
    /// Fraction of full power, 0.0 to 1.0
    pub laser_power: f64,
    pub units: Units,
    /// Spindle value at full power (GRBL `$30`)
    pub spindle_max: u32,
    pub return_to_origin: bool,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            feed_rate_travel: 3000.0,
            feed_rate_cut: 1000.0,
            laser_power: 1.0,
            units: Units::Millimeters,
            spindle_max: 1000,
            return_to_origin: true,
        }
    }
}

/// Raster engraving settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterSettings {
    /// Distance between neighbouring cells in mm
    pub cell_pitch_mm: f64,
    /// Source pixels averaged into one cell along each axis
    pub block_size: u32,
    /// Burn only pixels at or below this luminance, at full power
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u8>,
    /// Alternate scan direction on each row
    pub bidirectional: bool,
}

impl Default for RasterSettings {
    fn default() -> Self {
        Self {
            cell_pitch_mm: 0.072,
            block_size: 1,
            threshold: None,
            bidirectional: true,
        }
    }
}

/// Machine work area in mm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    pub width: f64,
    pub height: f64,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            width: 300.0,
            height: 300.0,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSettings,
    pub streaming: StreamingSettings,
    pub generator: GeneratorSection,
    pub raster: RasterSettings,
    pub workspace: WorkspaceSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(SettingsError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

fn positive(key: &str, value: f64) -> SettingsResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SettingsError::invalid(key, format!("must be > 0, got {}", value)))
    }
}

fn nonzero(key: &str, value: u64) -> SettingsResult<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(SettingsError::invalid(key, "must be > 0"))
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform config file, e.g. `~/.config/g2burn/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no config directory on this platform".to_string())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)?;
        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` when given, else the platform file when it exists, else
    /// defaults.
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Ok(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;
        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        nonzero("connection.read_timeout_ms", self.connection.read_timeout_ms)?;

        if self.streaming.max_buffer_bytes == 0 {
            return Err(SettingsError::invalid("streaming.max_buffer_bytes", "must be > 0"));
        }
        nonzero("streaming.poll_interval_ms", self.streaming.poll_interval_ms)?;
        nonzero("streaming.stall_timeout_ms", self.streaming.stall_timeout_ms)?;

        positive("generator.feed_rate_travel", self.generator.feed_rate_travel)?;
        positive("generator.feed_rate_cut", self.generator.feed_rate_cut)?;
        if !(0.0..=1.0).contains(&self.generator.laser_power) {
            return Err(SettingsError::invalid(
                "generator.laser_power",
                format!("must be within 0.0..=1.0, got {}", self.generator.laser_power),
            ));
        }
        if self.generator.spindle_max == 0 {
            return Err(SettingsError::invalid("generator.spindle_max", "must be > 0"));
        }

        positive("raster.cell_pitch_mm", self.raster.cell_pitch_mm)?;
        if self.raster.block_size == 0 {
            return Err(SettingsError::invalid("raster.block_size", "must be > 0"));
        }

        positive("workspace.width", self.workspace.width)?;
        positive("workspace.height", self.workspace.height)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.streaming.max_buffer_bytes, 128);
        assert_eq!(config.generator.units, Units::Millimeters);
    }

    #[test]
    fn test_validation_names_the_key() {
        let mut config = Config::new();
        config.generator.laser_power = 1.5;
        match config.validate() {
            Err(SettingsError::InvalidSetting { key, .. }) => {
                assert_eq!(key, "generator.laser_power")
            }
            other => panic!("expected InvalidSetting, got {:?}", other),
        }

        let mut config = Config::new();
        config.raster.cell_pitch_mm = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::new();
        config.streaming.stall_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [generator]
            feed_rate_cut = 500.0
            units = "inch"
            "#,
        )
        .unwrap();
        assert_eq!(config.generator.feed_rate_cut, 500.0);
        assert_eq!(config.generator.units, Units::Inches);
        assert_eq!(config.generator.feed_rate_travel, 3000.0);
        assert_eq!(config.raster, RasterSettings::default());
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            Config::load_from_file(Path::new("settings.yaml")),
            Err(SettingsError::UnsupportedFormat(ext)) if ext == "yaml"
        ));
    }
}
