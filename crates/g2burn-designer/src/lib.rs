//! # G2burn Designer
//!
//! Geometry model for laser designs and the motion program generator that
//! turns an ordered shape collection into GRBL motion code.
//!
//! Shapes are held in workspace millimeters. The generator validates every
//! shape against the declared workspace before emitting anything, so a
//! returned [`MotionProgram`] is always complete and safe to stream.

pub mod gcode_gen;
pub mod model;

pub use gcode_gen::{
    format_number, generate, GeneratorSettings, MotionInstruction, MotionProgram,
    ProgramBuilder, ProgramMetadata, Workspace,
};
pub use model::{parse_shapes, Bounds, LineSegment, Point, Rectangle, Shape, Traceable};
