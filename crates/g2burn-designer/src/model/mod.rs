//! Geometry model: points, bounds and the closed set of drawable shapes.

use serde::{Deserialize, Serialize};

pub mod line;
pub mod rectangle;

pub use line::LineSegment;
pub use rectangle::Rectangle;

/// A point in workspace millimeters, relative to the workspace origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned bounding box in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    /// Bounds of a single point
    pub fn from_point(p: Point) -> Self {
        Self { min: p, max: p }
    }

    /// Smallest bounds containing every point, `None` when empty
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut iter = points.into_iter();
        let first = Self::from_point(*iter.next()?);
        Some(iter.fold(first, |b, p| b.include(*p)))
    }

    /// Grow the bounds to include a point
    pub fn include(self, p: Point) -> Self {
        Self {
            min: Point::new(self.min.x.min(p.x), self.min.y.min(p.y)),
            max: Point::new(self.max.x.max(p.x), self.max.y.max(p.y)),
        }
    }

    pub fn union(self, other: Bounds) -> Self {
        self.include(other.min).include(other.max)
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }
}

/// Capabilities every shape provides to the generator.
pub trait Traceable {
    /// Ordered vertices to trace: the start point followed by each cut target.
    fn outline(&self) -> Vec<Point>;

    /// Bounding box of the traced outline.
    fn bounds(&self) -> Bounds;

    /// Reject degenerate or malformed geometry with a reason.
    fn validate(&self) -> Result<(), String>;
}

/// Closed set of drawable shapes.
///
/// Adding a variant forces an update at every match site below and in the
/// generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Line(LineSegment),
    Rectangle(Rectangle),
}

impl Shape {
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Line(_) => "line",
            Shape::Rectangle(_) => "rectangle",
        }
    }
}

impl Traceable for Shape {
    fn outline(&self) -> Vec<Point> {
        match self {
            Shape::Line(line) => line.outline(),
            Shape::Rectangle(rect) => rect.outline(),
        }
    }

    fn bounds(&self) -> Bounds {
        match self {
            Shape::Line(line) => line.bounds(),
            Shape::Rectangle(rect) => rect.bounds(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Shape::Line(line) => line.validate(),
            Shape::Rectangle(rect) => rect.validate(),
        }
    }
}

impl From<LineSegment> for Shape {
    fn from(line: LineSegment) -> Self {
        Shape::Line(line)
    }
}

impl From<Rectangle> for Shape {
    fn from(rect: Rectangle) -> Self {
        Shape::Rectangle(rect)
    }
}

/// Parse an ordered shape collection from a JSON array.
pub fn parse_shapes(json: &str) -> Result<Vec<Shape>, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_from_points() {
        let pts = [Point::new(3.0, -1.0), Point::new(-2.0, 4.0), Point::new(1.0, 1.0)];
        let b = Bounds::from_points(pts.iter()).unwrap();
        assert_eq!(b.min, Point::new(-2.0, -1.0));
        assert_eq!(b.max, Point::new(3.0, 4.0));
        assert_eq!(b.width(), 5.0);
        assert!(Bounds::from_points(std::iter::empty::<&Point>()).is_none());
    }

    #[test]
    fn test_parse_shapes_json() {
        let json = r#"[
            {"type": "line", "start": {"x": 0, "y": 0}, "end": {"x": 10, "y": 0}},
            {"type": "rectangle", "origin": {"x": 5, "y": 5}, "width": 20, "height": 10}
        ]"#;
        let shapes = parse_shapes(json).unwrap();
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[0].kind(), "line");
        assert_eq!(
            shapes[1],
            Shape::Rectangle(Rectangle::new(Point::new(5.0, 5.0), 20.0, 10.0))
        );
    }
}
