//! Conversions from the loaded [`Config`] into the parameter types each
//! crate takes.

use anyhow::bail;
use g2burn_camtools::{PowerCurve, RasterOptions, ScanOptions};
use g2burn_communication::{ConnectionParams, StreamingConfig};
use g2burn_designer::{GeneratorSettings, Point, Workspace};
use g2burn_settings::Config;
use std::time::Duration;

pub fn generator_settings(config: &Config) -> GeneratorSettings {
    let generator = &config.generator;
    GeneratorSettings {
        feed_rate_travel: generator.feed_rate_travel,
        feed_rate_cut: generator.feed_rate_cut,
        laser_power: generator.laser_power,
        units: generator.units,
        spindle_max: generator.spindle_max,
        workspace: Workspace::new(config.workspace.width, config.workspace.height),
        return_to_origin: generator.return_to_origin,
    }
}

/// A luminance threshold selects the threshold curve, otherwise darkness
/// maps linearly to power.
pub fn raster_options(config: &Config) -> RasterOptions {
    RasterOptions {
        cell_pitch_mm: config.raster.cell_pitch_mm,
        block_size: config.raster.block_size,
        origin: Point::default(),
        power_curve: config
            .raster
            .threshold
            .map_or(PowerCurve::Linear, PowerCurve::from_luma_threshold),
    }
}

pub fn scan_options(config: &Config) -> ScanOptions {
    ScanOptions {
        bidirectional: config.raster.bidirectional,
    }
}

pub fn streaming_config(config: &Config) -> StreamingConfig {
    StreamingConfig {
        max_buffer_bytes: config.streaming.max_buffer_bytes,
        poll_interval: Duration::from_millis(config.streaming.poll_interval_ms),
        stall_timeout: Duration::from_millis(config.streaming.stall_timeout_ms),
        read_timeout: Duration::from_millis(config.connection.read_timeout_ms),
    }
}

/// Command-line values take precedence over the configured port and baud.
pub fn connection_params(
    config: &Config,
    port: Option<&str>,
    baud_rate: Option<u32>,
) -> anyhow::Result<ConnectionParams> {
    let port = port.unwrap_or(&config.connection.port);
    if port.is_empty() {
        bail!("No serial port given and none configured");
    }
    Ok(ConnectionParams {
        port: port.to_string(),
        baud_rate: baud_rate.unwrap_or(config.connection.baud_rate),
        settle_delay_ms: config.connection.settle_delay_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use g2burn_core::Units;

    #[test]
    fn test_generator_settings_follow_config() {
        let mut config = Config::new();
        config.generator.feed_rate_cut = 500.0;
        config.generator.units = Units::Inches;
        config.workspace.width = 420.0;

        let settings = generator_settings(&config);
        assert_eq!(settings.feed_rate_cut, 500.0);
        assert_eq!(settings.units, Units::Inches);
        assert_eq!(settings.workspace, Workspace::new(420.0, 300.0));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_threshold_selects_curve() {
        let mut config = Config::new();
        assert_eq!(raster_options(&config).power_curve, PowerCurve::Linear);

        config.raster.threshold = Some(128);
        assert_eq!(
            raster_options(&config).power_curve,
            PowerCurve::from_luma_threshold(128)
        );
    }

    #[test]
    fn test_streaming_config_durations() {
        let config = Config::new();
        let streaming = streaming_config(&config);
        assert_eq!(streaming.max_buffer_bytes, 128);
        assert_eq!(streaming.poll_interval, Duration::from_millis(200));
        assert_eq!(streaming.read_timeout, Duration::from_millis(20));
    }

    #[test]
    fn test_connection_params_precedence() {
        let mut config = Config::new();
        assert!(connection_params(&config, None, None).is_err());

        config.connection.port = "/dev/ttyUSB0".to_string();
        let params = connection_params(&config, None, Some(250000)).unwrap();
        assert_eq!(params.port, "/dev/ttyUSB0");
        assert_eq!(params.baud_rate, 250000);

        let params = connection_params(&config, Some("COM3"), None).unwrap();
        assert_eq!(params.port, "COM3");
        assert_eq!(params.baud_rate, 115200);
    }
}
