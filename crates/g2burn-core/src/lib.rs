//! # G2burn Core
//!
//! Core types shared by every G2burn crate: the machine state model,
//! measurement units and the error taxonomy.

pub mod data;
pub mod error;
pub mod units;

pub use data::{MachineState, Position};
pub use error::{ConnectionError, ControllerError, Error, GenerationError, Result};
pub use units::{Units, MM_PER_INCH};
