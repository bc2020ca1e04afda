// THEORY:
// The `MorphologicalCleaner` turns a raw, speckled motion mask into a few solid
// blobs. Thresholding alone leaves two kinds of damage: isolated noise pixels
// where nothing moved, and holes or cracks inside things that really did move.
// Three stages repair it, always in this order:
//
// 1.  **Opening** (erode, then dilate): anything smaller than the structuring
//     element cannot survive the erosion, so specks vanish while larger shapes
//     come back at roughly their original size.
// 2.  **Closing** (dilate, then erode): gaps narrower than the grown element are
//     bridged and stay filled after the erosion. It runs more iterations than
//     the opening because real objects break into wider fragments than noise.
// 3.  **Dilation**: a final grow that merges fragments still sitting close to
//     each other, so one physical object yields one region.
//
// Swapping the stages is not equivalent: closing first would weld noise specks
// onto real objects before the opening had a chance to remove them.
//
// Pixels outside the frame never take part. Erosion treats them as foreground
// (an object touching the border is not eaten from outside) and dilation treats
// them as background. With a symmetric element this keeps opening and closing
// idempotent right up to the frame edge.

use crate::config::{MorphShape, PipelineConfig};
use crate::core_modules::frame::BinaryMask;
use image::GrayImage;

/// A fixed neighborhood pattern, stored as offsets from its anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    width: u32,
    height: u32,
    offsets: Vec<(i32, i32)>,
}

impl StructuringElement {
    /// Builds a `size` x `size` element anchored at its center.
    pub fn new(shape: MorphShape, size: u32) -> Self {
        let size = size.max(1);
        let (w, h) = (size as i32, size as i32);
        let (cx, cy) = (w / 2, h / 2);
        let mut offsets = Vec::new();

        for i in 0..h {
            let (j1, j2) = match shape {
                MorphShape::Rect => (0, w),
                MorphShape::Cross if i == cy => (0, w),
                MorphShape::Cross => (cx, cx + 1),
                MorphShape::Ellipse => {
                    let r = cy;
                    let c = cx;
                    let dy = i - r;
                    if dy.abs() > r {
                        (0, 0)
                    } else {
                        let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };
                        let dx = (c as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as i32;
                        ((c - dx).max(0), (c + dx + 1).min(w))
                    }
                }
            };
            offsets.extend((j1..j2).map(|j| (j - cx, i - cy)));
        }

        Self {
            width: size,
            height: size,
            offsets,
        }
    }

    pub fn ellipse(size: u32) -> Self {
        Self::new(MorphShape::Ellipse, size)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Offsets `(dx, dy)` of every active cell relative to the anchor.
    pub fn offsets(&self) -> &[(i32, i32)] {
        &self.offsets
    }

    pub fn contains(&self, dx: i32, dy: i32) -> bool {
        self.offsets.contains(&(dx, dy))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Erode,
    Dilate,
}

fn apply(mask: &BinaryMask, element: &StructuringElement, op: Operation) -> BinaryMask {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as i64, height as i64);
    let src = mask.as_raw();
    let (identity, absorbing) = match op {
        Operation::Erode => (BinaryMask::FOREGROUND, BinaryMask::BACKGROUND),
        Operation::Dilate => (BinaryMask::BACKGROUND, BinaryMask::FOREGROUND),
    };

    let mut out = vec![identity; src.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = identity;
            for &(dx, dy) in element.offsets() {
                let (sx, sy) = (x + dx as i64, y + dy as i64);
                if sx < 0 || sy < 0 || sx >= w || sy >= h {
                    continue;
                }
                let v = src[(sy * w + sx) as usize];
                acc = match op {
                    Operation::Erode => acc.min(v),
                    Operation::Dilate => acc.max(v),
                };
                if acc == absorbing {
                    break;
                }
            }
            out[(y * w + x) as usize] = acc;
        }
    }

    BinaryMask::new(GrayImage::from_vec(width, height, out).unwrap_or_else(|| GrayImage::new(width, height)))
}

fn repeat(mask: &BinaryMask, element: &StructuringElement, op: Operation, iterations: u32) -> BinaryMask {
    let mut current = mask.clone();
    for _ in 0..iterations {
        current = apply(&current, element, op);
    }
    current
}

pub fn erode(mask: &BinaryMask, element: &StructuringElement, iterations: u32) -> BinaryMask {
    repeat(mask, element, Operation::Erode, iterations)
}

pub fn dilate(mask: &BinaryMask, element: &StructuringElement, iterations: u32) -> BinaryMask {
    repeat(mask, element, Operation::Dilate, iterations)
}

/// `iterations` erosions followed by as many dilations.
pub fn open(mask: &BinaryMask, element: &StructuringElement, iterations: u32) -> BinaryMask {
    dilate(&erode(mask, element, iterations), element, iterations)
}

/// `iterations` dilations followed by as many erosions.
pub fn close(mask: &BinaryMask, element: &StructuringElement, iterations: u32) -> BinaryMask {
    erode(&dilate(mask, element, iterations), element, iterations)
}

/// Runs opening, closing and a final dilation with one shared element.
#[derive(Debug, Clone)]
pub struct MorphologicalCleaner {
    element: StructuringElement,
    open_iterations: u32,
    close_iterations: u32,
    dilate_iterations: u32,
}

impl MorphologicalCleaner {
    pub fn new(
        element: StructuringElement,
        open_iterations: u32,
        close_iterations: u32,
        dilate_iterations: u32,
    ) -> Self {
        Self {
            element,
            open_iterations,
            close_iterations,
            dilate_iterations,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            StructuringElement::new(config.morph_shape, config.morph_kernel_size),
            config.open_iterations,
            config.close_iterations,
            config.dilate_iterations,
        )
    }

    pub fn element(&self) -> &StructuringElement {
        &self.element
    }

    pub fn clean(&self, mask: &BinaryMask) -> BinaryMask {
        let opened = open(mask, &self.element, self.open_iterations);
        let closed = close(&opened, &self.element, self.close_iterations);
        dilate(&closed, &self.element, self.dilate_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn mask_from(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> BinaryMask {
        BinaryMask::new(GrayImage::from_fn(width, height, |x, y| {
            Luma([if f(x, y) { 255 } else { 0 }])
        }))
    }

    /// A few solid shapes, a thin crack, and scattered single-pixel specks.
    fn cluttered() -> BinaryMask {
        mask_from(64, 64, |x, y| {
            let block = (8..28).contains(&x) && (10..30).contains(&y) && x != 18;
            let (dx, dy) = (x as i32 - 45, y as i32 - 44);
            let disk = dx * dx + dy * dy <= 100;
            let speck = (x * 7 + y * 13) % 97 == 0;
            let edge = x < 5 && (40..60).contains(&y);
            block || disk || speck || edge
        })
    }

    fn row_widths(element: &StructuringElement) -> Vec<usize> {
        let (_, h) = element.dimensions();
        let half = h as i32 / 2;
        (-half..=half)
            .map(|dy| element.offsets().iter().filter(|o| o.1 == dy).count())
            .collect()
    }

    #[test]
    fn seven_by_seven_ellipse_has_the_classic_footprint() {
        let element = StructuringElement::ellipse(7);
        assert_eq!(row_widths(&element), vec![1, 5, 7, 7, 7, 5, 1]);
        assert!(element.contains(0, -3));
        assert!(!element.contains(1, -3));
        assert!(element.contains(-3, 1));
        assert!(!element.contains(-3, 2));
    }

    #[test]
    fn rect_and_cross_shapes() {
        assert_eq!(StructuringElement::new(MorphShape::Rect, 3).offsets().len(), 9);
        let cross = StructuringElement::new(MorphShape::Cross, 5);
        assert_eq!(cross.offsets().len(), 9);
        assert!(cross.contains(0, 2) && cross.contains(-2, 0));
        assert!(!cross.contains(1, 1));
    }

    #[test]
    fn dilating_a_single_pixel_stamps_the_element() {
        let element = StructuringElement::ellipse(7);
        let mask = mask_from(15, 15, |x, y| x == 7 && y == 7);
        let grown = dilate(&mask, &element, 1);
        assert_eq!(grown.count_foreground(), element.offsets().len());
        for &(dx, dy) in element.offsets() {
            assert!(grown.is_foreground((7 + dx) as u32, (7 + dy) as u32));
        }
    }

    #[test]
    fn opening_removes_specks_smaller_than_the_element() {
        let element = StructuringElement::ellipse(7);
        let specks = mask_from(40, 40, |x, y| x % 9 == 3 && y % 11 == 5);
        assert!(specks.count_foreground() > 0);
        assert_eq!(open(&specks, &element, 1).count_foreground(), 0);
    }

    #[test]
    fn erosion_does_not_eat_shapes_from_outside_the_frame() {
        let element = StructuringElement::ellipse(7);
        let full = mask_from(10, 10, |_, _| true);
        assert_eq!(erode(&full, &element, 2), full);
    }

    #[test]
    fn opening_and_closing_are_idempotent() {
        let element = StructuringElement::ellipse(7);
        let mask = cluttered();

        let opened = open(&mask, &element, 1);
        assert_eq!(open(&opened, &element, 1), opened);

        let closed = close(&mask, &element, 3);
        assert_eq!(close(&closed, &element, 3), closed);
    }

    #[test]
    fn closing_bridges_a_narrow_crack() {
        let element = StructuringElement::ellipse(7);
        let crack = |x: u32, y: u32| x == 20 && (15..=25).contains(&y);
        let cracked = mask_from(40, 40, |x, y| {
            (5..35).contains(&x) && (5..35).contains(&y) && !crack(x, y)
        });
        assert!(!cracked.is_foreground(20, 20));
        let closed = close(&cracked, &element, 1);
        assert!((15..=25).all(|y| closed.is_foreground(20, y)));
    }

    #[test]
    fn cleanup_is_stable_on_clean_input() {
        let cleaner = MorphologicalCleaner::from_config(&PipelineConfig::default());
        for mask in [mask_from(48, 32, |_, _| false), mask_from(48, 32, |_, _| true)] {
            let once = cleaner.clean(&mask);
            assert_eq!(once, mask);
            assert_eq!(cleaner.clean(&once), once);
        }
    }

    #[test]
    fn cleanup_erases_isolated_noise() {
        let cleaner = MorphologicalCleaner::from_config(&PipelineConfig::default());
        let noise = mask_from(80, 60, |x, y| (x * 17 + y * 29) % 53 == 0);
        assert!(noise.count_foreground() > 50);
        assert_eq!(cleaner.clean(&noise).count_foreground(), 0);
    }

    #[test]
    fn cleanup_output_stays_binary() {
        let cleaner = MorphologicalCleaner::from_config(&PipelineConfig::default());
        let cleaned = cleaner.clean(&cluttered());
        assert!(cleaned.as_raw().iter().all(|&v| v == 0 || v == 255));
        assert!(cleaned.count_foreground() > 0);
    }
}
