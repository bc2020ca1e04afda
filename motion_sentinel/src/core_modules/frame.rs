// THEORY:
// The `frame` module holds the "dumb" data containers that flow through the
// pipeline. A `RawFrame` is what the camera hands us: three color channels per
// pixel in a declared order. Everything after preprocessing is a single-channel
// 8-bit grid, and the newtypes below (`PreprocessedFrame`, `DifferenceMap`,
// `BinaryMask`) exist so each stage can only be fed the grid it expects.
//
// All grids are backed by `image::GrayImage`, which gives us row-major storage,
// bounds-checked accessors, and free interop with the wider `image` ecosystem.

use crate::error::PipelineError;
use image::{GrayImage, RgbImage};

/// The order of the three color channels inside each raw pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    /// Blue first, as produced by most capture APIs.
    Bgr,
}

/// A raw 3-channel frame as delivered by a frame source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    image: RgbImage,
    order: ChannelOrder,
}

impl RawFrame {
    pub fn new(image: RgbImage, order: ChannelOrder) -> Self {
        Self { image, order }
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        Self::new(image, ChannelOrder::Rgb)
    }

    /// Wraps a packed 3-byte-per-pixel buffer.
    pub fn from_bytes(
        width: u32,
        height: u32,
        order: ChannelOrder,
        bytes: Vec<u8>,
    ) -> Result<Self, PipelineError> {
        let len = bytes.len();
        let image = RgbImage::from_raw(width, height, bytes).ok_or(
            PipelineError::MalformedFrame {
                len,
                width,
                height,
                channels: 3,
            },
        )?;
        Ok(Self::new(image, order))
    }

    /// Builds a frame from a packed RGBA buffer; the alpha channel is dropped.
    pub fn from_rgba_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Self, PipelineError> {
        let expected = width as usize * height as usize * 4;
        if bytes.len() != expected {
            return Err(PipelineError::MalformedFrame {
                len: bytes.len(),
                width,
                height,
                channels: 4,
            });
        }
        let rgb: Vec<u8> = bytes
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        Self::from_bytes(width, height, ChannelOrder::Rgb, rgb)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Returns the pixel data as RGB regardless of the stored channel order.
    pub fn to_rgb(&self) -> RgbImage {
        match self.order {
            ChannelOrder::Rgb => self.image.clone(),
            ChannelOrder::Bgr => {
                let mut rgb = self.image.clone();
                for pixel in rgb.pixels_mut() {
                    pixel.0.swap(0, 2);
                }
                rgb
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

macro_rules! gray_grid {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(GrayImage);

        impl $name {
            pub fn new(image: GrayImage) -> Self {
                Self(image)
            }

            pub fn width(&self) -> u32 {
                self.0.width()
            }

            pub fn height(&self) -> u32 {
                self.0.height()
            }

            pub fn dimensions(&self) -> (u32, u32) {
                self.0.dimensions()
            }

            /// Row-major samples, one byte per pixel.
            pub fn as_raw(&self) -> &[u8] {
                self.0.as_raw()
            }

            pub fn get(&self, x: u32, y: u32) -> u8 {
                self.0.get_pixel(x, y).0[0]
            }

            pub fn as_image(&self) -> &GrayImage {
                &self.0
            }

            pub fn into_image(self) -> GrayImage {
                self.0
            }
        }
    };
}

gray_grid!(
    /// A grayscale, smoothed frame. The only thing kept between cycles.
    PreprocessedFrame
);
gray_grid!(
    /// Per-pixel absolute intensity delta between two preprocessed frames.
    DifferenceMap
);
gray_grid!(
    /// A motion mask whose samples are exactly 0 (background) or 255 (foreground).
    BinaryMask
);

impl BinaryMask {
    pub const FOREGROUND: u8 = 255;
    pub const BACKGROUND: u8 = 0;

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.get(x, y) != Self::BACKGROUND
    }

    pub fn count_foreground(&self) -> usize {
        self.as_raw().iter().filter(|&&v| v != Self::BACKGROUND).count()
    }
}
