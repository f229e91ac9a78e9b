use serde::{Deserialize, Serialize};

use super::{Bounds, Point, Traceable};

/// Minimum traced length in millimeters
const MIN_LENGTH: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

impl LineSegment {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.start.distance_to(&self.end)
    }
}

impl Traceable for LineSegment {
    fn outline(&self) -> Vec<Point> {
        vec![self.start, self.end]
    }

    fn bounds(&self) -> Bounds {
        Bounds::from_point(self.start).include(self.end)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err("line segment has non-finite coordinates".to_string());
        }
        if self.length() < MIN_LENGTH {
            return Err("zero-length line segment".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_length_rejected() {
        let line = LineSegment::new(Point::new(4.0, 4.0), Point::new(4.0, 4.0));
        assert!(line.validate().is_err());
    }

    #[test]
    fn test_nan_rejected() {
        let line = LineSegment::new(Point::new(f64::NAN, 0.0), Point::new(4.0, 4.0));
        assert!(line.validate().is_err());
    }

    #[test]
    fn test_outline_keeps_direction() {
        let line = LineSegment::new(Point::new(9.0, 1.0), Point::new(2.0, 1.0));
        assert_eq!(line.outline(), vec![Point::new(9.0, 1.0), Point::new(2.0, 1.0)]);
        assert_eq!(line.bounds().min, Point::new(2.0, 1.0));
    }
}
