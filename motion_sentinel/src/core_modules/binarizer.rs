// THEORY:
// The `binarizer` turns "how much did each pixel change" into "did it change".
// A single fixed cutoff decides; there is no adaptive thresholding. Values
// strictly above the cutoff become 255 and everything else 0, so the output is
// always a valid `BinaryMask`.

use crate::core_modules::frame::{BinaryMask, DifferenceMap};
use image::GrayImage;

pub mod binarizer {
    use super::*;

    /// The reference cutoff used when no configuration overrides it.
    pub const DEFAULT_CUTOFF: u8 = 30;

    pub fn threshold(map: &DifferenceMap, cutoff: u8) -> BinaryMask {
        let samples: Vec<u8> = map
            .as_raw()
            .iter()
            .map(|&v| {
                if v > cutoff {
                    BinaryMask::FOREGROUND
                } else {
                    BinaryMask::BACKGROUND
                }
            })
            .collect();
        let (width, height) = map.dimensions();
        BinaryMask::new(
            GrayImage::from_vec(width, height, samples).unwrap_or_else(|| GrayImage::new(width, height)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::binarizer::{threshold, DEFAULT_CUTOFF};
    use super::*;
    use image::Luma;

    fn ramp() -> DifferenceMap {
        DifferenceMap::new(GrayImage::from_fn(16, 16, |x, y| Luma([(y * 16 + x) as u8])))
    }

    #[test]
    fn output_is_strictly_binary_for_every_cutoff() {
        let map = ramp();
        for cutoff in [0u8, 1, 29, 30, 31, 128, 254, 255] {
            let mask = threshold(&map, cutoff);
            assert!(
                mask.as_raw().iter().all(|&v| v == 0 || v == 255),
                "cutoff {cutoff}"
            );
        }
    }

    #[test]
    fn cutoff_is_exclusive() {
        // Value v sits at (v % 16, v / 16).
        let at = |v: u32| (v % 16, v / 16);
        let mask = threshold(&ramp(), DEFAULT_CUTOFF);
        let (x, y) = at(DEFAULT_CUTOFF as u32);
        assert_eq!(mask.get(x, y), 0);
        let (x, y) = at(DEFAULT_CUTOFF as u32 + 1);
        assert_eq!(mask.get(x, y), 255);
        assert_eq!(mask.count_foreground(), 256 - 31);
    }

    #[test]
    fn max_cutoff_clears_everything() {
        assert_eq!(threshold(&ramp(), 255).count_foreground(), 0);
    }
}
