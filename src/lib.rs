//! # G2burn
//!
//! Laser engraving toolchain for GRBL controllers:
//! - Vector shapes to motion programs (`g2burn-designer`)
//! - Grayscale images to raster engraving programs (`g2burn-camtools`)
//! - Serial transport and character-counting streaming (`g2burn-communication`)
//! - JSON/TOML configuration (`g2burn-settings`)
//!
//! ## Architecture
//!
//! 1. **g2burn-core** - Machine state, units, error taxonomy
//! 2. **g2burn-designer** - Shape model and motion program generator
//! 3. **g2burn-camtools** - Raster converter and scanline expansion
//! 4. **g2burn-communication** - Transport sessions and the GRBL controller
//! 5. **g2burn-settings** - Configuration files
//! 6. **g2burn** - CLI binary tying the crates together

pub mod runtime;

pub use g2burn_camtools as camtools;
pub use g2burn_communication as communication;
pub use g2burn_designer as designer;
pub use g2burn_settings as settings;

pub use g2burn_core::{
    ConnectionError, ControllerError, Error, GenerationError, MachineState, Position, Result,
    Units,
};
pub use runtime::{
    connection_params, generator_settings, raster_options, scan_options, streaming_config,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("G2BURN_BUILD_DATE");

/// Initialize logging
///
/// Logs go to stderr so motion code printed on stdout stays clean.
/// `RUST_LOG` overrides the default `info` level; `json` switches to one
/// JSON object per event.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
