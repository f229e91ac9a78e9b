//! G2burn Settings Crate
//!
//! Loads, validates and saves application configuration.

pub mod config;
pub mod error;

pub use config::{
    Config, ConnectionSettings, GeneratorSection, RasterSettings, StreamingSettings,
    WorkspaceSettings,
};
pub use error::{SettingsError, SettingsResult};
