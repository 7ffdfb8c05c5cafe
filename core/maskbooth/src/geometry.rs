use serde::{Deserialize, Serialize};

/// A 2D point in surface or frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Point {
    /// Create a point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Width and height pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    /// Horizontal extent.
    pub width: f64,
    /// Vertical extent.
    pub height: f64,
}

impl Size {
    /// Create a size.
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Pixel dimensions of the output surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SurfaceSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl SurfaceSize {
    /// Create a surface size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Center of the surface.
    pub fn center(&self) -> Point {
        Point::new(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }
}

/// Axis-aligned rectangle with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Horizontal extent.
    pub width: f64,
    /// Vertical extent.
    pub height: f64,
}

impl Rect {
    /// Create a rectangle.
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle of `size` centered on `center`.
    pub fn centered_on(center: Point, size: Size) -> Self {
        Self::new(
            center.x - size.width / 2.0,
            center.y - size.height / 2.0,
            size.width,
            size.height,
        )
    }

    /// Center point.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Smallest rectangle enclosing every point, or `None` for an empty set.
    pub fn bounding<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Point>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in iter {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Exponential blend toward `target`: `self * k + target * (1 - k)` per field.
    pub fn blend(&self, target: &Rect, k: f64) -> Rect {
        let mix = |prev: f64, cur: f64| prev * k + cur * (1.0 - k);
        Rect::new(
            mix(self.x, target.x),
            mix(self.y, target.y),
            mix(self.width, target.width),
            mix(self.height, target.height),
        )
    }

    /// Shift the origin so the rectangle lies inside `surface`.
    ///
    /// A rectangle larger than the surface is pinned to the top-left corner.
    pub fn clamp_within(&self, surface: SurfaceSize) -> Rect {
        let max_x = surface.width as f64 - self.width;
        let max_y = surface.height as f64 - self.height;
        Rect::new(
            self.x.min(max_x).max(0.0),
            self.y.min(max_y).max(0.0),
            self.width,
            self.height,
        )
    }

    /// True when the rectangle lies fully inside `surface`, allowing `epsilon`
    /// of floating-point slack.
    pub fn is_within(&self, surface: SurfaceSize, epsilon: f64) -> bool {
        self.x >= -epsilon
            && self.y >= -epsilon
            && self.x + self.width <= surface.width as f64 + epsilon
            && self.y + self.height <= surface.height as f64 + epsilon
    }
}

/// Scale `width` × `width * aspect` down until it fits `max_width` × `max_height`.
///
/// `aspect` is height / width. The width limit applies first, then the
/// height limit, so the result keeps the aspect ratio on both clamps.
pub fn fit_with_aspect(width: f64, aspect: f64, max_width: f64, max_height: f64) -> Size {
    let mut w = width;
    let mut h = w * aspect;
    if w > max_width {
        w = max_width;
        h = w * aspect;
    }
    if h > max_height {
        h = max_height;
        w = h / aspect;
    }
    Size::new(w, h)
}

/// Where and how to draw an overlay for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementResult {
    /// Left edge in surface pixels.
    pub x: f64,
    /// Top edge in surface pixels.
    pub y: f64,
    /// Drawn width in surface pixels.
    pub width: f64,
    /// Drawn height in surface pixels.
    pub height: f64,
    /// Clockwise rotation about the rectangle center, in radians.
    pub rotation: f64,
    /// Alpha multiplier in [0, 1].
    pub opacity: f64,
}

impl PlacementResult {
    /// A zero-sized result; callers must skip drawing it.
    pub const fn degenerate() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            rotation: 0.0,
            opacity: 0.0,
        }
    }

    pub(crate) fn from_rect(rect: Rect, rotation: f64) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            rotation,
            opacity: 1.0,
        }
    }

    /// The placement as a plain rectangle.
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// False for degenerate results (non-positive or non-finite size).
    pub fn is_drawable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}
