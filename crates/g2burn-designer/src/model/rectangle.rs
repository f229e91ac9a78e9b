use serde::{Deserialize, Serialize};

use super::{Bounds, Point, Traceable};

/// Axis-aligned rectangle anchored at its lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub origin: Point,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn new(origin: Point, width: f64, height: f64) -> Self {
        Self {
            origin,
            width,
            height,
        }
    }

    /// Corners in winding order: origin, +x, +y, -x.
    pub fn corners(&self) -> [Point; 4] {
        let Point { x, y } = self.origin;
        [
            Point::new(x, y),
            Point::new(x + self.width, y),
            Point::new(x + self.width, y + self.height),
            Point::new(x, y + self.height),
        ]
    }
}

impl Traceable for Rectangle {
    /// Four edges starting and ending at the origin.
    fn outline(&self) -> Vec<Point> {
        let corners = self.corners();
        let mut points = corners.to_vec();
        points.push(corners[0]);
        points
    }

    fn bounds(&self) -> Bounds {
        let corners = self.corners();
        Bounds {
            min: corners[0],
            max: corners[2],
        }
    }

    fn validate(&self) -> Result<(), String> {
        if !self.origin.is_finite() || !self.width.is_finite() || !self.height.is_finite() {
            return Err("rectangle has non-finite coordinates".to_string());
        }
        if self.width < 0.0 || self.height < 0.0 {
            return Err(format!(
                "rectangle has negative dimensions ({} x {})",
                self.width, self.height
            ));
        }
        if self.width == 0.0 || self.height == 0.0 {
            return Err(format!(
                "degenerate rectangle ({} x {})",
                self.width, self.height
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_winding_order() {
        let rect = Rectangle::new(Point::new(1.0, 2.0), 10.0, 5.0);
        assert_eq!(
            rect.outline(),
            vec![
                Point::new(1.0, 2.0),
                Point::new(11.0, 2.0),
                Point::new(11.0, 7.0),
                Point::new(1.0, 7.0),
                Point::new(1.0, 2.0),
            ]
        );
    }

    #[test]
    fn test_degenerate_and_negative() {
        assert!(Rectangle::new(Point::default(), 0.0, 5.0).validate().is_err());
        assert!(Rectangle::new(Point::default(), 5.0, 0.0).validate().is_err());
        assert!(Rectangle::new(Point::default(), -1.0, 5.0).validate().is_err());
        assert!(Rectangle::new(Point::default(), 1.0, 5.0).validate().is_ok());
    }
}
