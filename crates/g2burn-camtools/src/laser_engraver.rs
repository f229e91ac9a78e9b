//! Laser Image Engraving Tool
//!
//! Expands an [`EngravingGrid`] into a motion program. Each contiguous run of
//! non-zero cells in a row becomes one travel move followed by one cut per
//! constant-power stretch, instead of one instruction per cell. Rows are
//! burned bottom to top since machine Y grows upward.

use crate::error::CamToolError;
use crate::raster::{convert, fit_to_size, EngravingGrid, RasterOptions};
use g2burn_core::GenerationError;
use g2burn_designer::{format_number, GeneratorSettings, MotionProgram, Point, ProgramBuilder};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Scan line options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Alternate scan direction on every burned row
    pub bidirectional: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            bidirectional: true,
        }
    }
}

/// Stretch of cells `[start, end)` sharing one S value.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Stretch {
    start: usize,
    end: usize,
    power: u32,
}

/// Split a row of S values into runs of non-zero cells, each a list of
/// constant-power stretches.
fn row_runs(levels: &[u32]) -> Vec<Vec<Stretch>> {
    let mut runs = Vec::new();
    let mut current: Vec<Stretch> = Vec::new();

    for (col, &power) in levels.iter().enumerate() {
        if power == 0 {
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
            continue;
        }
        match current.last_mut() {
            Some(last) if last.power == power && last.end == col => last.end = col + 1,
            _ => current.push(Stretch {
                start: col,
                end: col + 1,
                power,
            }),
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn burn_run(
    builder: &mut ProgramBuilder<'_>,
    grid: &EngravingGrid,
    run: &[Stretch],
    y: f64,
    forward: bool,
) {
    let (Some(first), Some(last)) = (run.first(), run.last()) else {
        return;
    };

    if forward {
        builder.rapid_to(Point::new(grid.column_x(first.start), y));
        builder.set_power(first.power);
        builder.laser_on();
        for stretch in run {
            builder.set_power(stretch.power);
            builder.cut_to(Point::new(grid.column_x(stretch.end), y));
        }
    } else {
        builder.rapid_to(Point::new(grid.column_x(last.end), y));
        builder.set_power(last.power);
        builder.laser_on();
        for stretch in run.iter().rev() {
            builder.set_power(stretch.power);
            builder.cut_to(Point::new(grid.column_x(stretch.start), y));
        }
    }
    builder.laser_off();
}

/// Expand an engraving grid into a motion program.
///
/// Cell intensity scales the configured laser power. Cells that quantise to
/// `S0` break a run.
pub fn engrave_grid(
    grid: &EngravingGrid,
    settings: &GeneratorSettings,
    scan: ScanOptions,
) -> Result<MotionProgram, GenerationError> {
    settings.validate()?;
    if !settings.workspace.contains(&grid.bounds()) {
        return Err(GenerationError::geometry(
            0,
            format!(
                "raster extends outside the {} x {} mm workspace",
                settings.workspace.width, settings.workspace.height
            ),
        ));
    }

    let mut builder = ProgramBuilder::new(settings);
    builder.comment(format!(
        "Raster {}x{} cells at {}mm pitch",
        grid.cols(),
        grid.rows(),
        format_number(grid.cell_pitch_mm())
    ));

    let mut forward = true;
    for row in (0..grid.rows()).rev() {
        let levels: Vec<u32> = grid
            .row(row)
            .iter()
            .map(|intensity| settings.power_value(intensity * settings.laser_power))
            .collect();
        let runs = row_runs(&levels);
        if runs.is_empty() {
            continue;
        }

        let y = grid.row_y(row);
        if forward {
            for run in &runs {
                burn_run(&mut builder, grid, run, y, true);
            }
        } else {
            for run in runs.iter().rev() {
                burn_run(&mut builder, grid, run, y, false);
            }
        }

        if scan.bidirectional {
            forward = !forward;
        }
    }

    let program = builder.finish();
    tracing::debug!(
        "Expanded {}x{} grid into {} instructions",
        grid.cols(),
        grid.rows(),
        program.len()
    );
    Ok(program)
}

/// Image-to-program pipeline: fit, convert, expand.
#[derive(Debug, Clone, Default)]
pub struct RasterEngraver {
    pub raster: RasterOptions,
    pub scan: ScanOptions,
    /// Target engraving width; `None` maps each source block to one cell unscaled.
    pub width_mm: Option<f64>,
    /// Target height; follows the aspect ratio when `None`.
    pub height_mm: Option<f64>,
}

impl RasterEngraver {
    pub fn new(raster: RasterOptions, scan: ScanOptions) -> Self {
        Self {
            raster,
            scan,
            width_mm: None,
            height_mm: None,
        }
    }

    /// Set the output size in millimeters
    pub fn with_size(mut self, width_mm: f64, height_mm: Option<f64>) -> Self {
        self.width_mm = Some(width_mm);
        self.height_mm = height_mm;
        self
    }

    pub fn grid_from_image(&self, image: &DynamicImage) -> Result<EngravingGrid, GenerationError> {
        let pixels = match self.width_mm {
            Some(width) => fit_to_size(image, width, self.height_mm, self.raster.cell_pitch_mm)?,
            None => image.to_luma8(),
        };
        convert(&pixels, &self.raster)
    }

    pub fn engrave_image(
        &self,
        image: &DynamicImage,
        settings: &GeneratorSettings,
    ) -> Result<(EngravingGrid, MotionProgram), GenerationError> {
        let grid = self.grid_from_image(image)?;
        let program = engrave_grid(&grid, settings, self.scan)?;
        Ok((grid, program))
    }

    /// Load an image file and engrave it.
    pub fn engrave_file<P: AsRef<Path>>(
        &self,
        path: P,
        settings: &GeneratorSettings,
    ) -> Result<(EngravingGrid, MotionProgram), CamToolError> {
        let image = image::open(path.as_ref())?;
        tracing::info!(
            "Loaded {} ({}x{})",
            path.as_ref().display(),
            image.width(),
            image.height()
        );
        Ok(self.engrave_image(&image, settings)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_runs_split_on_zero_and_power() {
        let runs = row_runs(&[0, 5, 5, 7, 0, 0, 3]);
        assert_eq!(runs.len(), 2);
        assert_eq!(
            runs[0],
            vec![
                Stretch {
                    start: 1,
                    end: 3,
                    power: 5
                },
                Stretch {
                    start: 3,
                    end: 4,
                    power: 7
                },
            ]
        );
        assert_eq!(
            runs[1],
            vec![Stretch {
                start: 6,
                end: 7,
                power: 3
            }]
        );
    }

    #[test]
    fn test_blank_row_has_no_runs() {
        assert!(row_runs(&[0, 0, 0]).is_empty());
        assert!(row_runs(&[]).is_empty());
    }
}
