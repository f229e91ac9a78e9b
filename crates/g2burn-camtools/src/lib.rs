//! # G2burn CAM Tools
//!
//! Raster engraving: converts a grayscale pixel matrix into an
//! [`EngravingGrid`] and expands the grid into a motion program that burns
//! each contiguous row segment with one run of moves.

pub mod error;
pub mod laser_engraver;
pub mod patterns;
pub mod raster;

pub use error::CamToolError;
pub use laser_engraver::{engrave_grid, RasterEngraver, ScanOptions};
pub use patterns::TestPattern;
pub use raster::{convert, fit_to_size, EngravingGrid, GridStats, PowerCurve, RasterOptions};
