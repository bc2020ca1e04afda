// THEORY:
// The `differencer` is where motion first becomes visible. Two preprocessed
// frames go in; a map of how much each pixel's intensity changed comes out.
// The delta is absolute, so a dark object entering a bright scene and a bright
// object entering a dark one look the same. It is a stateless utility and
// knows nothing about which frame came first.

use crate::core_modules::frame::{DifferenceMap, PreprocessedFrame};
use crate::error::PipelineError;
use image::GrayImage;

pub mod differencer {
    use super::*;

    /// Per-pixel `|curr - prev|`, computed without wraparound.
    pub fn diff(
        curr: &PreprocessedFrame,
        prev: &PreprocessedFrame,
    ) -> Result<DifferenceMap, PipelineError> {
        if curr.dimensions() != prev.dimensions() {
            return Err(PipelineError::DimensionMismatch {
                expected_width: prev.width(),
                expected_height: prev.height(),
                actual_width: curr.width(),
                actual_height: curr.height(),
            });
        }

        let deltas: Vec<u8> = curr
            .as_raw()
            .iter()
            .zip(prev.as_raw())
            .map(|(&a, &b)| a.abs_diff(b))
            .collect();

        let (width, height) = curr.dimensions();
        Ok(DifferenceMap::new(
            GrayImage::from_vec(width, height, deltas).unwrap_or_else(|| GrayImage::new(width, height)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::differencer::diff;
    use super::*;
    use image::Luma;

    fn frame_from(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> PreprocessedFrame {
        PreprocessedFrame::new(GrayImage::from_fn(width, height, |x, y| Luma([f(x, y)])))
    }

    #[test]
    fn identical_frames_produce_an_all_zero_map() {
        let frame = frame_from(20, 11, |x, y| ((x * 31 + y * 17) % 256) as u8);
        let map = diff(&frame, &frame).expect("same size");
        assert!(map.as_raw().iter().all(|&v| v == 0));
    }

    #[test]
    fn deltas_are_absolute_and_saturate_within_u8() {
        let dark = frame_from(2, 1, |x, _| if x == 0 { 0 } else { 255 });
        let bright = frame_from(2, 1, |x, _| if x == 0 { 255 } else { 0 });
        let forward = diff(&dark, &bright).expect("same size");
        let backward = diff(&bright, &dark).expect("same size");
        assert_eq!(forward.as_raw(), &[255, 255]);
        assert_eq!(forward, backward);

        let a = frame_from(1, 1, |_, _| 40);
        let b = frame_from(1, 1, |_, _| 240);
        assert_eq!(diff(&a, &b).expect("same size").get(0, 0), 200);
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let small = frame_from(4, 4, |_, _| 0);
        let large = frame_from(8, 4, |_, _| 0);
        let err = diff(&large, &small).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                expected_width: 4,
                actual_width: 8,
                ..
            }
        ));
    }
}
