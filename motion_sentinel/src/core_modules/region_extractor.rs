// THEORY:
// The `RegionExtractor` finds the objects in a cleaned motion mask and picks
// the one that matters most: the largest. It works in three passes.
//
// 1.  **Exterior**: a 4-connected flood fill of the background, seeded from
//     every background pixel on the frame edge. Whatever it cannot reach is
//     either foreground or enclosed by foreground.
// 2.  **Discovery**: a raster scan (top to bottom, left to right) over the
//     pixels the exterior did not reach. The first unclaimed one always belongs
//     to the outermost boundary of a new object. An 8-connected fill from it
//     claims the object together with its holes and anything nested inside
//     them, so holes are never reported as objects of their own.
// 3.  **Tracing**: the outer boundary is followed from that first pixel, and
//     points in the middle of straight runs are dropped.
//
// Discovery order is the tie-break rule: among equally large objects, the one
// whose first pixel comes first in raster order wins. Discovery is lazy
// (`regions` is an iterator), but picking the largest has to see them all.

use crate::core_modules::bounding_box::{self, BoundingBox};
use crate::core_modules::frame::BinaryMask;

/// A pixel coordinate on a region's boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// One outermost connected component of a mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Simplified outer boundary, in tracing order, starting at the first pixel found.
    points: Vec<Point>,
    /// Pixels enclosed by the outer boundary, holes included.
    area: usize,
}

impl Region {
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn area(&self) -> usize {
        self.area
    }

    pub fn bounding_box(&self) -> BoundingBox {
        bounding_box::to_bounding_box(self)
    }
}

/// Neighbor steps, counterclockwise as seen on screen, starting east.
const DIRECTIONS: [(i64, i64); 8] = [
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];
const WEST: usize = 4;

fn direction_of(dx: i64, dy: i64) -> usize {
    DIRECTIONS
        .iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(WEST)
}

/// Lazy iterator over the outermost regions of a mask, in discovery order.
pub struct Regions<'a> {
    mask: &'a BinaryMask,
    width: i64,
    height: i64,
    exterior: Vec<bool>,
    claimed: Vec<bool>,
    cursor: usize,
}

/// Starts discovering the outermost regions of `mask`.
pub fn regions(mask: &BinaryMask) -> Regions<'_> {
    let (width, height) = (mask.width() as i64, mask.height() as i64);
    let len = (width * height) as usize;
    let mut regions = Regions {
        mask,
        width,
        height,
        exterior: vec![false; len],
        claimed: vec![false; len],
        cursor: 0,
    };
    regions.fill_exterior();
    regions
}

impl Regions<'_> {
    fn index(&self, x: i64, y: i64) -> usize {
        (y * self.width + x) as usize
    }

    fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    fn is_foreground(&self, x: i64, y: i64) -> bool {
        self.in_bounds(x, y) && self.mask.as_raw()[self.index(x, y)] != BinaryMask::BACKGROUND
    }

    fn fill_exterior(&mut self) {
        let mut stack = Vec::new();
        let (w, h) = (self.width, self.height);
        let border = (0..w)
            .flat_map(|x| [(x, 0), (x, h - 1)])
            .chain((0..h).flat_map(|y| [(0, y), (w - 1, y)]));
        for (x, y) in border {
            if !self.is_foreground(x, y) && self.in_bounds(x, y) {
                let i = self.index(x, y);
                if !self.exterior[i] {
                    self.exterior[i] = true;
                    stack.push((x, y));
                }
            }
        }
        while let Some((x, y)) = stack.pop() {
            for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                let (nx, ny) = (x + dx, y + dy);
                if !self.in_bounds(nx, ny) || self.is_foreground(nx, ny) {
                    continue;
                }
                let i = self.index(nx, ny);
                if !self.exterior[i] {
                    self.exterior[i] = true;
                    stack.push((nx, ny));
                }
            }
        }
    }

    /// Claims every non-exterior pixel 8-connected to the seed and returns the count.
    fn claim_filled_area(&mut self, seed: (i64, i64)) -> usize {
        let mut stack = vec![seed];
        let start = self.index(seed.0, seed.1);
        self.claimed[start] = true;
        let mut area = 0;
        while let Some((x, y)) = stack.pop() {
            area += 1;
            for &(dx, dy) in &DIRECTIONS {
                let (nx, ny) = (x + dx, y + dy);
                if !self.in_bounds(nx, ny) {
                    continue;
                }
                let i = self.index(nx, ny);
                if !self.exterior[i] && !self.claimed[i] {
                    self.claimed[i] = true;
                    stack.push((nx, ny));
                }
            }
        }
        area
    }

    /// Follows the outer border clockwise-first from a pixel whose west neighbor is background.
    fn trace_outer_border(&self, start: (i64, i64)) -> Vec<(i64, i64)> {
        let step = |p: (i64, i64), d: usize| (p.0 + DIRECTIONS[d].0, p.1 + DIRECTIONS[d].1);

        let first = (0..8)
            .map(|k| (WEST + 8 - k) % 8)
            .find(|&d| {
                let (x, y) = step(start, d);
                self.is_foreground(x, y)
            });
        let Some(first) = first else {
            return vec![start];
        };

        let second = step(start, first);
        let mut previous = second;
        let mut current = start;
        let mut chain = Vec::new();
        loop {
            let back = direction_of(previous.0 - current.0, previous.1 - current.1);
            let next = (1..=8)
                .map(|k| step(current, (back + k) % 8))
                .find(|&(x, y)| self.is_foreground(x, y))
                .unwrap_or(previous);
            chain.push(current);
            if next == start && current == second {
                break;
            }
            previous = current;
            current = next;
        }
        chain
    }
}

impl Iterator for Regions<'_> {
    type Item = Region;

    fn next(&mut self) -> Option<Region> {
        let len = self.exterior.len();
        while self.cursor < len {
            let i = self.cursor;
            self.cursor += 1;
            if self.exterior[i] || self.claimed[i] {
                continue;
            }
            let seed = (i as i64 % self.width, i as i64 / self.width);
            let area = self.claim_filled_area(seed);
            let chain = self.trace_outer_border(seed);
            return Some(Region {
                points: simplify_chain(&chain),
                area,
            });
        }
        None
    }
}

/// Drops boundary points that sit in the middle of a straight horizontal,
/// vertical or diagonal run. The starting point is always kept.
fn simplify_chain(chain: &[(i64, i64)]) -> Vec<Point> {
    let to_point = |&(x, y): &(i64, i64)| Point {
        x: x as u32,
        y: y as u32,
    };
    let n = chain.len();
    if n <= 2 {
        return chain.iter().map(to_point).collect();
    }
    let delta = |a: (i64, i64), b: (i64, i64)| (b.0 - a.0, b.1 - a.1);
    chain
        .iter()
        .enumerate()
        .filter(|&(i, &p)| {
            let before = chain[(i + n - 1) % n];
            let after = chain[(i + 1) % n];
            i == 0 || delta(before, p) != delta(p, after)
        })
        .map(|(_, p)| to_point(p))
        .collect()
}

/// The largest region enclosing more than `min_area` pixels, if any.
///
/// Equal areas keep the region discovered first.
pub fn extract_largest_region(mask: &BinaryMask, min_area: usize) -> Option<Region> {
    let candidates: Vec<Region> = regions(mask).filter(|r| r.area() > min_area).collect();
    candidates.into_iter().fold(None, |best, region| match best {
        Some(best) if best.area() >= region.area() => Some(best),
        _ => Some(region),
    })
}
