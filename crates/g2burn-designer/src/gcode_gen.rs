//! Motion program generation.
//!
//! Converts an ordered shape collection into a [`MotionProgram`]. The
//! conversion from workspace millimeters to controller units happens once,
//! when each instruction is built, using a single factor chosen per program.

use crate::model::{Bounds, Point, Shape, Traceable};
use g2burn_core::{GenerationError, Units};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Workspace extents in millimeters. The origin is always (0, 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub width: f64,
    pub height: f64,
}

impl Workspace {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Check that `bounds` lies inside the workspace.
    pub fn contains(&self, bounds: &Bounds) -> bool {
        const EPS: f64 = 1e-9;
        bounds.min.x >= -EPS
            && bounds.min.y >= -EPS
            && bounds.max.x <= self.width + EPS
            && bounds.max.y <= self.height + EPS
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(300.0, 300.0)
    }
}

/// Generator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Rapid travel feed rate in mm/min (used for time estimates)
    pub feed_rate_travel: f64,
    /// Cutting feed rate in mm/min
    pub feed_rate_cut: f64,
    /// Laser power as a fraction of `spindle_max`
    pub laser_power: f64,
    /// Controller unit system
    pub units: Units,
    /// S value that corresponds to full power (GRBL `$30`)
    pub spindle_max: u32,
    /// Declared workspace
    pub workspace: Workspace,
    /// Emit a rapid back to the origin after the last shape
    pub return_to_origin: bool,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            feed_rate_travel: 3000.0,
            feed_rate_cut: 1000.0,
            laser_power: 1.0,
            units: Units::Millimeters,
            spindle_max: 1000,
            workspace: Workspace::default(),
            return_to_origin: true,
        }
    }
}

impl GeneratorSettings {
    /// Check every field is usable.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if !(self.feed_rate_travel.is_finite() && self.feed_rate_travel > 0.0) {
            return Err(GenerationError::settings(format!(
                "travel feed rate must be positive, got {}",
                self.feed_rate_travel
            )));
        }
        if !(self.feed_rate_cut.is_finite() && self.feed_rate_cut > 0.0) {
            return Err(GenerationError::settings(format!(
                "cut feed rate must be positive, got {}",
                self.feed_rate_cut
            )));
        }
        if !(0.0..=1.0).contains(&self.laser_power) {
            return Err(GenerationError::settings(format!(
                "laser power must be within 0.0..=1.0, got {}",
                self.laser_power
            )));
        }
        if self.spindle_max == 0 {
            return Err(GenerationError::settings("spindle max must be non-zero"));
        }
        let ws = self.workspace;
        if !(ws.width.is_finite() && ws.width > 0.0 && ws.height.is_finite() && ws.height > 0.0) {
            return Err(GenerationError::settings(format!(
                "workspace must have positive extents, got {} x {}",
                ws.width, ws.height
            )));
        }
        Ok(())
    }

    /// Quantise a power fraction to the controller S value.
    pub fn power_value(&self, fraction: f64) -> u32 {
        (fraction.clamp(0.0, 1.0) * self.spindle_max as f64).round() as u32
    }
}

/// One line of motion code. Coordinates and feeds are in controller units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MotionInstruction {
    RapidMove { x: f64, y: f64 },
    LinearMove { x: f64, y: f64, feed_rate: f64 },
    SetPower { value: u32 },
    LaserOn,
    LaserOff,
    Comment { text: String },
}

impl MotionInstruction {
    pub fn is_comment(&self) -> bool {
        matches!(self, MotionInstruction::Comment { .. })
    }
}

/// GRBL text form of each instruction. This mapping is a hardware contract.
impl fmt::Display for MotionInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RapidMove { x, y } => {
                write!(f, "G0 X{} Y{}", format_number(*x), format_number(*y))
            }
            Self::LinearMove { x, y, feed_rate } => write!(
                f,
                "G1 X{} Y{} F{}",
                format_number(*x),
                format_number(*y),
                format_number(*feed_rate)
            ),
            Self::SetPower { value } => write!(f, "S{}", value),
            Self::LaserOn => write!(f, "M3"),
            Self::LaserOff => write!(f, "M5"),
            Self::Comment { text } => write!(f, "; {}", text),
        }
    }
}

/// Format a number with at most three decimals and no trailing zeros.
pub fn format_number(value: f64) -> String {
    let mut s = format!("{:.3}", value);
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

/// Summary of a generated program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramMetadata {
    /// Extent of every visited point, in millimeters
    pub bounds: Option<Bounds>,
    /// Estimated run time in seconds
    pub estimated_seconds: f64,
    /// Laser-off travel in millimeters
    pub travel_distance_mm: f64,
    /// Laser-on distance in millimeters
    pub cut_distance_mm: f64,
    /// Unit system of the emitted coordinates
    pub units: Units,
}

/// An immutable, ordered motion program.
///
/// The framing lines (`preamble`, `postamble`) set up and tear down modal
/// state; `instructions` is the program body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionProgram {
    preamble: Vec<String>,
    instructions: Vec<MotionInstruction>,
    postamble: Vec<String>,
    metadata: ProgramMetadata,
}

impl MotionProgram {
    pub fn instructions(&self) -> &[MotionInstruction] {
        &self.instructions
    }

    pub fn preamble(&self) -> &[String] {
        &self.preamble
    }

    pub fn postamble(&self) -> &[String] {
        &self.postamble
    }

    pub fn metadata(&self) -> &ProgramMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Full program text, one instruction per line.
    pub fn to_gcode(&self) -> String {
        let meta = &self.metadata;
        let mut gcode = String::new();
        gcode.push_str("; G2burn motion program\n");
        if let Some(b) = meta.bounds {
            gcode.push_str(&format!(
                "; Bounds: X{}..{} Y{}..{} mm\n",
                format_number(b.min.x),
                format_number(b.max.x),
                format_number(b.min.y),
                format_number(b.max.y)
            ));
        }
        gcode.push_str(&format!(
            "; Estimated time: {}s\n",
            format_number(meta.estimated_seconds.round())
        ));
        for line in &self.preamble {
            gcode.push_str(line);
            gcode.push('\n');
        }
        for instruction in &self.instructions {
            gcode.push_str(&instruction.to_string());
            gcode.push('\n');
        }
        for line in &self.postamble {
            gcode.push_str(line);
            gcode.push('\n');
        }
        gcode
    }

    /// Export the program text as UTF-8.
    pub fn write_to(&self, path: &Path) -> g2burn_core::Result<()> {
        std::fs::write(path, self.to_gcode())?;
        tracing::info!(
            "Exported {} instructions to {}",
            self.instructions.len(),
            path.display()
        );
        Ok(())
    }
}

/// Incremental program builder shared by vector and raster generation.
///
/// Tracks the modal laser power so `SetPower` is only emitted on change, and
/// the current position so travel and cut distances can be estimated.
#[derive(Debug)]
pub struct ProgramBuilder<'a> {
    settings: &'a GeneratorSettings,
    factor: f64,
    initial_power: u32,
    modal_power: u32,
    position: Point,
    instructions: Vec<MotionInstruction>,
    bounds: Option<Bounds>,
    travel_mm: f64,
    cut_mm: f64,
}

impl<'a> ProgramBuilder<'a> {
    /// Start a program. Settings must already be validated.
    pub fn new(settings: &'a GeneratorSettings) -> Self {
        let initial_power = settings.power_value(settings.laser_power);
        Self {
            settings,
            factor: settings.units.factor_from_mm(),
            initial_power,
            modal_power: initial_power,
            position: Point::default(),
            instructions: Vec::new(),
            bounds: None,
            travel_mm: 0.0,
            cut_mm: 0.0,
        }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        self.settings
    }

    /// S value of the configured laser power
    pub fn default_power(&self) -> u32 {
        self.initial_power
    }

    fn visit(&mut self, p: Point) {
        self.bounds = Some(match self.bounds {
            Some(b) => b.include(p),
            None => Bounds::from_point(p),
        });
        self.position = p;
    }

    pub fn rapid_to(&mut self, p: Point) {
        self.travel_mm += self.position.distance_to(&p);
        self.instructions.push(MotionInstruction::RapidMove {
            x: p.x * self.factor,
            y: p.y * self.factor,
        });
        self.visit(p);
    }

    pub fn cut_to(&mut self, p: Point) {
        self.cut_mm += self.position.distance_to(&p);
        self.instructions.push(MotionInstruction::LinearMove {
            x: p.x * self.factor,
            y: p.y * self.factor,
            feed_rate: self.settings.feed_rate_cut * self.factor,
        });
        self.visit(p);
    }

    /// Emit `SetPower` only when `value` differs from the modal power.
    pub fn set_power(&mut self, value: u32) {
        if value != self.modal_power {
            self.instructions.push(MotionInstruction::SetPower { value });
            self.modal_power = value;
        }
    }

    pub fn laser_on(&mut self) {
        self.instructions.push(MotionInstruction::LaserOn);
    }

    pub fn laser_off(&mut self) {
        self.instructions.push(MotionInstruction::LaserOff);
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.instructions
            .push(MotionInstruction::Comment { text: text.into() });
    }

    /// Travel to the first point, then cut through the rest at `power`.
    pub fn trace(&mut self, points: &[Point], power: u32) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        self.rapid_to(*first);
        self.set_power(power);
        self.laser_on();
        for p in rest {
            self.cut_to(*p);
        }
        self.laser_off();
    }

    /// Seal the program with framing lines and metadata.
    pub fn finish(mut self) -> MotionProgram {
        let settings = self.settings;
        let preamble = vec![
            settings.units.gcode_word().to_string(),
            "G90".to_string(),
            "M5".to_string(),
            format!("S{}", self.initial_power),
        ];

        let mut postamble = vec!["M5".to_string()];
        if settings.return_to_origin && !self.instructions.is_empty() {
            postamble.push(MotionInstruction::RapidMove { x: 0.0, y: 0.0 }.to_string());
            self.travel_mm += self.position.distance_to(&Point::default());
        }

        let minutes =
            self.travel_mm / settings.feed_rate_travel + self.cut_mm / settings.feed_rate_cut;

        MotionProgram {
            preamble,
            instructions: self.instructions,
            postamble,
            metadata: ProgramMetadata {
                bounds: self.bounds,
                estimated_seconds: minutes * 60.0,
                travel_distance_mm: self.travel_mm,
                cut_distance_mm: self.cut_mm,
                units: settings.units,
            },
        }
    }
}

/// Generate a motion program from shapes in input order.
///
/// Every shape is validated before anything is emitted. Shapes are never
/// reordered.
pub fn generate(
    shapes: &[Shape],
    settings: &GeneratorSettings,
) -> Result<MotionProgram, GenerationError> {
    settings.validate()?;

    for (index, shape) in shapes.iter().enumerate() {
        shape
            .validate()
            .map_err(|reason| GenerationError::geometry(index, reason))?;
        let bounds = shape.bounds();
        if !settings.workspace.contains(&bounds) {
            return Err(GenerationError::geometry(
                index,
                format!(
                    "{} extends outside the {} x {} mm workspace",
                    shape.kind(),
                    settings.workspace.width,
                    settings.workspace.height
                ),
            ));
        }
    }

    let mut builder = ProgramBuilder::new(settings);
    let power = builder.default_power();
    for shape in shapes {
        builder.trace(&shape.outline(), power);
    }

    let program = builder.finish();
    tracing::debug!(
        "Generated {} instructions from {} shapes",
        program.len(),
        shapes.len()
    );
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LineSegment, Rectangle};

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(1.23456), "1.235");
        assert_eq!(format_number(-0.0001), "0");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(format_number(100.0), "100");
    }

    #[test]
    fn test_instruction_text() {
        assert_eq!(
            MotionInstruction::RapidMove { x: 10.0, y: 2.0 }.to_string(),
            "G0 X10 Y2"
        );
        assert_eq!(
            MotionInstruction::LinearMove {
                x: 1.5,
                y: 0.0,
                feed_rate: 500.0
            }
            .to_string(),
            "G1 X1.5 Y0 F500"
        );
        assert_eq!(MotionInstruction::SetPower { value: 750 }.to_string(), "S750");
        assert_eq!(MotionInstruction::LaserOn.to_string(), "M3");
        assert_eq!(MotionInstruction::LaserOff.to_string(), "M5");
        assert_eq!(
            MotionInstruction::Comment {
                text: "row 3".into()
            }
            .to_string(),
            "; row 3"
        );
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = GeneratorSettings::default();
        assert!(settings.validate().is_ok());

        settings.laser_power = 1.5;
        assert!(matches!(
            settings.validate(),
            Err(GenerationError::InvalidSettings { .. })
        ));

        let settings = GeneratorSettings {
            feed_rate_cut: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_power_value_rounds() {
        let settings = GeneratorSettings {
            spindle_max: 255,
            ..Default::default()
        };
        assert_eq!(settings.power_value(0.5), 128);
        assert_eq!(settings.power_value(2.0), 255);
        assert_eq!(settings.power_value(0.0), 0);
    }

    #[test]
    fn test_builder_skips_redundant_power() {
        let settings = GeneratorSettings::default();
        let mut builder = ProgramBuilder::new(&settings);
        builder.set_power(1000);
        builder.set_power(400);
        builder.set_power(400);
        let program = builder.finish();
        assert_eq!(
            program.instructions(),
            &[MotionInstruction::SetPower { value: 400 }]
        );
    }

    #[test]
    fn test_inch_conversion_applies_to_feed() {
        let settings = GeneratorSettings {
            units: Units::Inches,
            feed_rate_cut: 254.0,
            ..Default::default()
        };
        let shapes = [Shape::Line(LineSegment::new(
            Point::new(0.0, 0.0),
            Point::new(25.4, 50.8),
        ))];
        let program = generate(&shapes, &settings).unwrap();
        assert_eq!(program.preamble()[0], "G20");
        assert_eq!(program.instructions()[2].to_string(), "G1 X1 Y2 F10");
    }

    #[test]
    fn test_metadata_estimates() {
        let settings = GeneratorSettings {
            feed_rate_travel: 600.0,
            feed_rate_cut: 600.0,
            return_to_origin: false,
            ..Default::default()
        };
        let shapes = [Shape::Rectangle(Rectangle::new(
            Point::new(10.0, 0.0),
            10.0,
            10.0,
        ))];
        let program = generate(&shapes, &settings).unwrap();
        let meta = program.metadata();
        assert_eq!(meta.travel_distance_mm, 10.0);
        assert_eq!(meta.cut_distance_mm, 40.0);
        assert!((meta.estimated_seconds - 5.0).abs() < 1e-9);
        let bounds = meta.bounds.unwrap();
        assert_eq!(bounds.min, Point::new(10.0, 0.0));
        assert_eq!(bounds.max, Point::new(20.0, 10.0));
    }
}
