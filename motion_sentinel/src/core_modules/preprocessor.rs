// THEORY:
// The `Preprocessor` turns a raw color frame into the smoothed intensity grid
// the rest of the pipeline works on. Two steps, both pure:
//
// 1.  **Luminance**: Rec. 601 weighted sum of the color channels. The weights
//     are applied in 14-bit fixed point (4899 R, 9617 G, 1868 B; they sum to
//     1 << 14) so the result is bit-exact across platforms.
// 2.  **Gaussian smoothing**: a separable blur that suppresses sensor noise
//     before differencing. Without it, every flickering pixel becomes a
//     candidate for motion. Each 1D pass uses weights quantised to 8 fractional
//     bits, so the 2D result is an integer sum scaled by 1 << 16.
//
// Borders reflect without repeating the edge sample: for a row `a b c d`, the
// samples left of `a` read `b`, `c`, and so on.

use crate::core_modules::frame::{ChannelOrder, PreprocessedFrame, RawFrame};
use crate::error::PipelineError;
use image::GrayImage;

const GRAY_SHIFT: u32 = 14;
const GRAY_R: u32 = 4899;
const GRAY_G: u32 = 9617;
const GRAY_B: u32 = 1868;

const KERNEL_BITS: u32 = 8;
const KERNEL_ONE: u32 = 1 << KERNEL_BITS;

/// Converts raw frames into `PreprocessedFrame`s with a fixed smoothing kernel.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    /// 1D Gaussian weights in fixed point; they sum to `KERNEL_ONE`.
    kernel: Vec<u32>,
}

impl Preprocessor {
    pub fn new(kernel_size: u32, sigma: f64) -> Self {
        Self {
            kernel: gaussian_kernel(kernel_size, sigma),
        }
    }

    pub fn kernel(&self) -> &[u32] {
        &self.kernel
    }

    pub fn preprocess(&self, frame: &RawFrame) -> Result<PreprocessedFrame, PipelineError> {
        if frame.is_empty() {
            return Err(PipelineError::EmptyFrame {
                width: frame.width(),
                height: frame.height(),
            });
        }
        let gray = to_grayscale(frame);
        Ok(PreprocessedFrame::new(gaussian_blur(&gray, &self.kernel)))
    }
}

/// Weighted luminance of every pixel, honouring the frame's channel order.
pub fn to_grayscale(frame: &RawFrame) -> GrayImage {
    let (width, height) = frame.dimensions();
    let (ri, bi) = match frame.order() {
        ChannelOrder::Rgb => (0, 2),
        ChannelOrder::Bgr => (2, 0),
    };
    let luma: Vec<u8> = frame
        .image()
        .pixels()
        .map(|p| {
            let [r, g, b] = [p.0[ri] as u32, p.0[1] as u32, p.0[bi] as u32];
            let y = (r * GRAY_R + g * GRAY_G + b * GRAY_B + (1 << (GRAY_SHIFT - 1))) >> GRAY_SHIFT;
            y.min(255) as u8
        })
        .collect();
    // The buffer length is width * height by construction.
    GrayImage::from_vec(width, height, luma).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Builds a 1D Gaussian kernel in fixed point.
///
/// With `sigma == 0.0` the standard deviation is derived from the size, and the
/// small sizes use the exact binomial tables (5 gives `[16, 64, 96, 64, 16]`).
pub fn gaussian_kernel(size: u32, sigma: f64) -> Vec<u32> {
    let size = size.max(1) as usize;
    let weights: Vec<f64> = match (size, sigma > 0.0) {
        (1, false) => vec![1.0],
        (3, false) => vec![0.25, 0.5, 0.25],
        (5, false) => vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
        (7, false) => vec![0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125],
        _ => {
            let sigma = if sigma > 0.0 {
                sigma
            } else {
                0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
            };
            let center = (size as f64 - 1.0) * 0.5;
            let raw: Vec<f64> = (0..size)
                .map(|i| {
                    let x = i as f64 - center;
                    (-(x * x) / (2.0 * sigma * sigma)).exp()
                })
                .collect();
            let sum: f64 = raw.iter().sum();
            raw.into_iter().map(|w| w / sum).collect()
        }
    };

    let mut fixed: Vec<u32> = weights
        .iter()
        .map(|w| (w * KERNEL_ONE as f64).round() as u32)
        .collect();
    // Rounding may drift the total; the center tap absorbs the difference.
    let total: u32 = fixed.iter().sum();
    let center = size / 2;
    fixed[center] = (fixed[center] + KERNEL_ONE).saturating_sub(total);
    fixed
}

/// Separable blur of `src` with a fixed-point kernel produced by [`gaussian_kernel`].
pub fn gaussian_blur(src: &GrayImage, kernel: &[u32]) -> GrayImage {
    let (width, height) = src.dimensions();
    let (w, h) = (width as usize, height as usize);
    let radius = (kernel.len() / 2) as i64;
    let data = src.as_raw();

    // Horizontal pass, scaled by KERNEL_ONE.
    let mut rows = vec![0u32; w * h];
    for y in 0..h {
        let line = &data[y * w..(y + 1) * w];
        for x in 0..w {
            rows[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, &weight)| {
                    let sx = reflect_101(x as i64 + k as i64 - radius, w);
                    weight * line[sx] as u32
                })
                .sum();
        }
    }

    // Vertical pass, scaled by KERNEL_ONE^2.
    let shift = 2 * KERNEL_BITS;
    let half = 1u32 << (shift - 1);
    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let acc: u32 = kernel
                .iter()
                .enumerate()
                .map(|(k, &weight)| {
                    let sy = reflect_101(y as i64 + k as i64 - radius, h);
                    weight * rows[sy * w + x]
                })
                .sum();
            out[y * w + x] = ((acc + half) >> shift).min(255) as u8;
        }
    }

    GrayImage::from_vec(width, height, out).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Maps an out-of-range index back into `0..len` by mirroring around the edge samples.
fn reflect_101(mut i: i64, len: usize) -> usize {
    let n = len as i64;
    if n <= 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}
