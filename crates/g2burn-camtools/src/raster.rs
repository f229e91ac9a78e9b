//! Raster conversion
//!
//! Maps a grayscale pixel matrix onto an engraving intensity grid. Darker
//! pixels burn harder: luminance is inverted and normalised to a darkness in
//! `[0, 1]`, then passed through a [`PowerCurve`].
//!
//! Grid row 0 is the top image row. Rows are placed so that the image reads
//! upright on a machine whose Y axis increases upward.

use g2burn_core::GenerationError;
use g2burn_designer::{Bounds, Point};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

/// Monotonic mapping from pixel darkness to engraving intensity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "curve", content = "value", rename_all = "snake_case")]
pub enum PowerCurve {
    /// Intensity equals darkness
    Linear,
    /// Full power when darkness reaches the threshold, otherwise off
    Threshold(f64),
    /// Darkness raised to the given exponent
    Gamma(f64),
    /// Light pixels burn, for negative source images
    Inverted,
}

impl PowerCurve {
    /// Binary curve burning every pixel with luminance below `luma`.
    pub fn from_luma_threshold(luma: u8) -> Self {
        PowerCurve::Threshold(1.0 - (luma as f64 - 1.0) / 255.0)
    }

    pub fn apply(&self, darkness: f64) -> f64 {
        let d = darkness.clamp(0.0, 1.0);
        let value = match *self {
            PowerCurve::Linear => d,
            PowerCurve::Threshold(t) => {
                if d >= t {
                    1.0
                } else {
                    0.0
                }
            }
            PowerCurve::Gamma(g) => d.powf(g),
            PowerCurve::Inverted => 1.0 - d,
        };
        value.clamp(0.0, 1.0)
    }

    fn validate(&self) -> Result<(), GenerationError> {
        match *self {
            PowerCurve::Threshold(t) if !t.is_finite() => Err(GenerationError::image(format!(
                "threshold must be finite, got {}",
                t
            ))),
            PowerCurve::Gamma(g) if !(g.is_finite() && g > 0.0) => Err(GenerationError::image(
                format!("gamma must be positive, got {}", g),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for PowerCurve {
    fn default() -> Self {
        PowerCurve::Linear
    }
}

/// Raster conversion options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterOptions {
    /// Distance between cell centres in millimeters
    pub cell_pitch_mm: f64,
    /// Square block of source pixels averaged into one cell
    pub block_size: u32,
    /// Workspace position of the bottom-left cell
    pub origin: Point,
    pub power_curve: PowerCurve,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            cell_pitch_mm: 0.072,
            block_size: 1,
            origin: Point::default(),
            power_curve: PowerCurve::Linear,
        }
    }
}

/// Immutable grid of engraving intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct EngravingGrid {
    rows: usize,
    cols: usize,
    cells: Vec<f64>,
    cell_pitch_mm: f64,
    origin: Point,
}

/// Coverage summary of a grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridStats {
    pub cells: usize,
    pub burned_cells: usize,
    pub coverage_percent: f64,
    pub min_intensity: f64,
    pub max_intensity: f64,
    pub mean_intensity: f64,
}

impl EngravingGrid {
    /// Build a grid from row-major intensities.
    pub fn from_cells(
        rows: usize,
        cols: usize,
        cells: Vec<f64>,
        cell_pitch_mm: f64,
        origin: Point,
    ) -> Result<Self, GenerationError> {
        if rows == 0 || cols == 0 {
            return Err(GenerationError::image("grid has no cells"));
        }
        if cells.len() != rows * cols {
            return Err(GenerationError::image(format!(
                "expected {} cells for a {}x{} grid, got {}",
                rows * cols,
                rows,
                cols,
                cells.len()
            )));
        }
        if !(cell_pitch_mm.is_finite() && cell_pitch_mm > 0.0) {
            return Err(GenerationError::image(format!(
                "cell pitch must be positive, got {}",
                cell_pitch_mm
            )));
        }
        if !origin.is_finite() {
            return Err(GenerationError::image("grid origin is not finite"));
        }
        if let Some(bad) = cells.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(GenerationError::image(format!(
                "intensity {} outside 0.0..=1.0",
                bad
            )));
        }
        Ok(Self {
            rows,
            cols,
            cells,
            cell_pitch_mm,
            origin,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cell_pitch_mm(&self) -> f64 {
        self.cell_pitch_mm
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn intensity(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.cells[row * self.cols + col])
        } else {
            None
        }
    }

    /// One row of intensities, left to right.
    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.cols;
        &self.cells[start..start + self.cols]
    }

    /// Workspace Y of a grid row. Row 0 is the top of the image.
    pub fn row_y(&self, row: usize) -> f64 {
        self.origin.y + (self.rows - 1 - row) as f64 * self.cell_pitch_mm
    }

    /// Workspace X of a cell's leading (left) edge. `col == cols` gives the right edge.
    pub fn column_x(&self, col: usize) -> f64 {
        self.origin.x + col as f64 * self.cell_pitch_mm
    }

    /// Extent of every scan line the grid can produce.
    pub fn bounds(&self) -> Bounds {
        Bounds::from_point(Point::new(self.column_x(0), self.row_y(self.rows - 1)))
            .include(Point::new(self.column_x(self.cols), self.row_y(0)))
    }

    pub fn stats(&self) -> GridStats {
        let burned = self.cells.iter().filter(|v| **v > 0.0).count();
        let min = self.cells.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.cells.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = self.cells.iter().sum::<f64>() / self.cells.len() as f64;
        GridStats {
            cells: self.cells.len(),
            burned_cells: burned,
            coverage_percent: burned as f64 / self.cells.len() as f64 * 100.0,
            min_intensity: min,
            max_intensity: max,
            mean_intensity: mean,
        }
    }
}

/// Convert a grayscale pixel matrix to an engraving grid.
pub fn convert(pixels: &GrayImage, options: &RasterOptions) -> Result<EngravingGrid, GenerationError> {
    let (width, height) = pixels.dimensions();
    if width == 0 || height == 0 {
        return Err(GenerationError::image("empty pixel matrix"));
    }
    if !(options.cell_pitch_mm.is_finite() && options.cell_pitch_mm > 0.0) {
        return Err(GenerationError::image(format!(
            "cell pitch must be positive, got {}",
            options.cell_pitch_mm
        )));
    }
    if options.block_size == 0 {
        return Err(GenerationError::image("block size must be at least 1"));
    }
    options.power_curve.validate()?;

    let bs = options.block_size;
    let cols = width.div_ceil(bs);
    let rows = height.div_ceil(bs);
    let mut cells = Vec::with_capacity((rows * cols) as usize);

    for r in 0..rows {
        for c in 0..cols {
            let (x0, y0) = (c * bs, r * bs);
            let (x1, y1) = ((x0 + bs).min(width), (y0 + bs).min(height));
            let mut sum = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += pixels.get_pixel(x, y).0[0] as u64;
                }
            }
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            let darkness = 1.0 - (sum as f64 / count) / 255.0;
            cells.push(options.power_curve.apply(darkness));
        }
    }

    tracing::debug!(
        "Converted {}x{} pixels into a {}x{} grid at {}mm pitch",
        width,
        height,
        cols,
        rows,
        options.cell_pitch_mm
    );

    EngravingGrid::from_cells(
        rows as usize,
        cols as usize,
        cells,
        options.cell_pitch_mm,
        options.origin,
    )
}

/// Resize an image so each pixel becomes one cell of an engraving `width_mm`
/// wide. Height follows the aspect ratio unless given.
pub fn fit_to_size(
    image: &DynamicImage,
    width_mm: f64,
    height_mm: Option<f64>,
    cell_pitch_mm: f64,
) -> Result<GrayImage, GenerationError> {
    if !(cell_pitch_mm.is_finite() && cell_pitch_mm > 0.0) {
        return Err(GenerationError::image(format!(
            "cell pitch must be positive, got {}",
            cell_pitch_mm
        )));
    }
    let gray = image.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return Err(GenerationError::image("empty pixel matrix"));
    }

    let height_mm =
        height_mm.unwrap_or(width_mm * gray.height() as f64 / gray.width() as f64);
    let cols = (width_mm / cell_pitch_mm).floor();
    let rows = (height_mm / cell_pitch_mm).floor();
    if !(cols >= 1.0 && rows >= 1.0) {
        return Err(GenerationError::image(format!(
            "{} x {} mm is smaller than one {}mm cell",
            width_mm, height_mm, cell_pitch_mm
        )));
    }

    Ok(image::imageops::resize(
        &gray,
        cols as u32,
        rows as u32,
        image::imageops::FilterType::Lanczos3,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_power_curves() {
        assert_eq!(PowerCurve::Linear.apply(0.25), 0.25);
        assert_eq!(PowerCurve::Threshold(0.5).apply(0.5), 1.0);
        assert_eq!(PowerCurve::Threshold(0.5).apply(0.49), 0.0);
        assert_eq!(PowerCurve::Gamma(2.0).apply(0.5), 0.25);
        assert_eq!(PowerCurve::Inverted.apply(1.0), 0.0);
        assert_eq!(PowerCurve::Linear.apply(3.0), 1.0);
    }

    #[test]
    fn test_luma_threshold_matches_below_rule() {
        let curve = PowerCurve::from_luma_threshold(128);
        assert_eq!(curve.apply(1.0 - 127.0 / 255.0), 1.0);
        assert_eq!(curve.apply(1.0 - 128.0 / 255.0), 0.0);
    }

    #[test]
    fn test_block_averaging() {
        let mut img = GrayImage::from_pixel(3, 2, Luma([255]));
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(1, 0, Luma([0]));
        let options = RasterOptions {
            block_size: 2,
            cell_pitch_mm: 1.0,
            ..Default::default()
        };
        let grid = convert(&img, &options).unwrap();
        assert_eq!((grid.rows(), grid.cols()), (1, 2));
        assert_eq!(grid.intensity(0, 0), Some(0.5));
        assert_eq!(grid.intensity(0, 1), Some(0.0));
    }

    #[test]
    fn test_row_placement_is_upright() {
        let img = GrayImage::from_pixel(2, 3, Luma([0]));
        let options = RasterOptions {
            cell_pitch_mm: 0.5,
            origin: Point::new(10.0, 20.0),
            ..Default::default()
        };
        let grid = convert(&img, &options).unwrap();
        assert_eq!(grid.row_y(0), 21.0);
        assert_eq!(grid.row_y(2), 20.0);
        assert_eq!(grid.column_x(2), 11.0);
        let b = grid.bounds();
        assert_eq!(b.min, Point::new(10.0, 20.0));
        assert_eq!(b.max, Point::new(11.0, 21.0));
    }

    #[test]
    fn test_fit_to_size_keeps_aspect() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 100, Luma([0])));
        let fitted = fit_to_size(&img, 10.0, None, 0.5).unwrap();
        assert_eq!(fitted.dimensions(), (20, 10));
        assert!(fit_to_size(&img, 0.25, None, 0.5).is_err());
    }

    #[test]
    fn test_stats() {
        let grid =
            EngravingGrid::from_cells(1, 4, vec![0.0, 0.5, 1.0, 0.5], 1.0, Point::default())
                .unwrap();
        let stats = grid.stats();
        assert_eq!(stats.burned_cells, 3);
        assert_eq!(stats.coverage_percent, 75.0);
        assert_eq!(stats.min_intensity, 0.0);
        assert_eq!(stats.max_intensity, 1.0);
        assert_eq!(stats.mean_intensity, 0.5);
    }

    #[test]
    fn test_from_cells_rejects_out_of_range() {
        assert!(EngravingGrid::from_cells(1, 1, vec![1.5], 1.0, Point::default()).is_err());
        assert!(EngravingGrid::from_cells(1, 2, vec![0.5], 1.0, Point::default()).is_err());
    }
}
