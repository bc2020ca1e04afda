// THEORY:
// The bounding box is the pipeline's terminal output: the smallest
// axis-aligned rectangle that covers a region's outer boundary. `width` and
// `height` count pixels, so the right and bottom edges are exclusive: a region
// spanning columns 10 through 59 reports `x = 10, width = 50`.

use crate::core_modules::region_extractor::{Point, Region};

/// An axis-aligned rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// The box covering every point, or `None` for an empty slice.
    pub fn enclosing(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x + 1 - min_x, max_y + 1 - min_y))
    }
}

/// Reports the bounding box of a region. Regions are never empty, so this always succeeds.
pub fn to_bounding_box(region: &Region) -> BoundingBox {
    BoundingBox::enclosing(region.points()).unwrap_or_default()
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}
