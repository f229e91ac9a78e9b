//! Calibration images for engraving tests.
//!
//! Each pattern is a white grayscale canvas with black (or graded) marks, fed
//! through the normal raster path to check power, focus and scan alignment.

use g2burn_core::GenerationError;
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const GRID_SPACING: u32 = 40;
const STROKE_WIDTH: u32 = 2;
const RING_STEP: u32 = 20;
const RING_MARGIN: u32 = 10;

const WHITE: Luma<u8> = Luma([255]);
const BLACK: Luma<u8> = Luma([0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPattern {
    /// Lines every 40 pixels in both directions
    Grid,
    /// Concentric rings 20 pixels apart
    Circles,
    /// Left-to-right ramp from black to white
    Gradient,
}

impl TestPattern {
    /// Render the pattern at `width` x `height` pixels.
    pub fn render(&self, width: u32, height: u32) -> Result<GrayImage, GenerationError> {
        if width == 0 || height == 0 {
            return Err(GenerationError::image(format!(
                "test pattern size must be non-zero, got {}x{}",
                width, height
            )));
        }
        Ok(match self {
            TestPattern::Grid => grid(width, height),
            TestPattern::Circles => circles(width, height),
            TestPattern::Gradient => gradient(width, height),
        })
    }
}

impl fmt::Display for TestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestPattern::Grid => "grid",
            TestPattern::Circles => "circles",
            TestPattern::Gradient => "gradient",
        };
        f.write_str(name)
    }
}

impl FromStr for TestPattern {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grid" => Ok(TestPattern::Grid),
            "circles" => Ok(TestPattern::Circles),
            "gradient" => Ok(TestPattern::Gradient),
            other => Err(GenerationError::image(format!(
                "unknown test pattern '{}', expected grid, circles or gradient",
                other
            ))),
        }
    }
}

fn grid(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        if x % GRID_SPACING < STROKE_WIDTH || y % GRID_SPACING < STROKE_WIDTH {
            BLACK
        } else {
            WHITE
        }
    })
}

fn circles(width: u32, height: u32) -> GrayImage {
    let (cx, cy) = ((width / 2) as f64, (height / 2) as f64);
    let max_radius = (width.min(height) / 2).saturating_sub(RING_MARGIN);
    let radii: Vec<f64> = (RING_STEP..max_radius)
        .step_by(RING_STEP as usize)
        .map(f64::from)
        .collect();

    GrayImage::from_fn(width, height, |x, y| {
        let d = (x as f64 - cx).hypot(y as f64 - cy);
        // Strokes grow inward from each radius.
        let on_ring = radii
            .iter()
            .any(|&r| d <= r && d > r - STROKE_WIDTH as f64);
        if on_ring {
            BLACK
        } else {
            WHITE
        }
    })
}

fn gradient(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, _| {
        Luma([(x as u64 * 255 / width as u64) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_lines() {
        let img = TestPattern::Grid.render(100, 60).unwrap();
        assert_eq!(img.get_pixel(0, 30).0[0], 0);
        assert_eq!(img.get_pixel(41, 30).0[0], 0);
        assert_eq!(img.get_pixel(42, 30).0[0], 255);
        assert_eq!(img.get_pixel(20, 40).0[0], 0);
        assert_eq!(img.get_pixel(20, 20).0[0], 255);
    }

    #[test]
    fn test_circles_are_centered_rings() {
        let img = TestPattern::Circles.render(120, 120).unwrap();
        assert_eq!(img.get_pixel(60, 60).0[0], 255);
        assert_eq!(img.get_pixel(80, 60).0[0], 0);
        assert_eq!(img.get_pixel(60, 100).0[0], 0);
        assert_eq!(img.get_pixel(70, 60).0[0], 255);
        // Rings at 20 and 40; the margin keeps the edges clear.
        assert_eq!(img.get_pixel(119, 60).0[0], 255);
    }

    #[test]
    fn test_gradient_ramps_left_to_right() {
        let img = TestPattern::Gradient.render(256, 4).unwrap();
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(128, 3).0[0], 127);
        assert_eq!(img.get_pixel(255, 0).0[0], 254);
    }

    #[test]
    fn test_names_round_trip() {
        for pattern in [TestPattern::Grid, TestPattern::Circles, TestPattern::Gradient] {
            assert_eq!(pattern.to_string().parse::<TestPattern>().unwrap(), pattern);
        }
        assert!("stripes".parse::<TestPattern>().is_err());
        assert!(TestPattern::Grid.render(0, 10).is_err());
    }
}
