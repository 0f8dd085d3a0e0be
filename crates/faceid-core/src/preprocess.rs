//! Image normalisation into the siamese model's input layout.
//!
//! Probe frames and gallery files go through the same steps: decode,
//! 3-channel check, resize to 100x100 with a single fixed filter, and
//! rescale 8-bit values into [0, 1].

use crate::types::{ChannelOrder, PreprocessedImage, RawImage, INPUT_CHANNELS, INPUT_SIZE};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;
use std::path::Path;
use thiserror::Error;

const PIXEL_SCALE: f32 = 255.0;
// The model is sensitive to resampling differences: probe and references
// must share this filter.
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Reasons an image cannot be turned into model input.
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("unsupported channel count: {0} (need 3)")]
    UnsupportedChannels(u8),
    #[error("empty image ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("pixel buffer length mismatch: expected {expected}, got {actual}")]
    BufferLength { expected: usize, actual: usize },
}

/// Where the pixels for one preprocessing call come from.
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    /// An in-memory frame.
    Pixels(RawImage<'a>),
    /// An encoded image on disk (any format the `image` crate decodes).
    File(&'a Path),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Normalise `source` into a 100x100x3 tensor with values in [0, 1].
    pub fn process(&self, source: ImageSource<'_>) -> Result<PreprocessedImage, PreprocessError> {
        let rgb = match source {
            ImageSource::Pixels(raw) => Self::from_pixels(raw)?,
            ImageSource::File(path) => Self::decode(path)?,
        };
        Ok(Self::normalize(&rgb))
    }

    fn decode(path: &Path) -> Result<RgbImage, PreprocessError> {
        let display = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| PreprocessError::Read {
            path: display.clone(),
            source,
        })?;
        let img = image::load_from_memory(&bytes).map_err(|source| PreprocessError::Decode {
            path: display,
            source,
        })?;

        let channels = img.color().channel_count();
        if channels as usize != INPUT_CHANNELS {
            return Err(PreprocessError::UnsupportedChannels(channels));
        }
        if img.width() == 0 || img.height() == 0 {
            return Err(PreprocessError::Empty {
                width: img.width(),
                height: img.height(),
            });
        }
        Ok(img.to_rgb8())
    }

    fn from_pixels(raw: RawImage<'_>) -> Result<RgbImage, PreprocessError> {
        if raw.width == 0 || raw.height == 0 {
            return Err(PreprocessError::Empty {
                width: raw.width,
                height: raw.height,
            });
        }

        let pixels = raw.width as usize * raw.height as usize;
        let expected = pixels * INPUT_CHANNELS;
        if raw.data.len() != expected {
            // A whole number of bytes per pixel means a layout we don't take.
            if raw.data.len() % pixels == 0 {
                let channels = (raw.data.len() / pixels).min(u8::MAX as usize) as u8;
                return Err(PreprocessError::UnsupportedChannels(channels));
            }
            return Err(PreprocessError::BufferLength {
                expected,
                actual: raw.data.len(),
            });
        }

        let data = match raw.order {
            ChannelOrder::Rgb => raw.data.to_vec(),
            ChannelOrder::Bgr => raw
                .data
                .chunks_exact(INPUT_CHANNELS)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };

        RgbImage::from_raw(raw.width, raw.height, data).ok_or(PreprocessError::BufferLength {
            expected,
            actual: raw.data.len(),
        })
    }

    fn normalize(rgb: &RgbImage) -> PreprocessedImage {
        let size = INPUT_SIZE as u32;
        let resized = imageops::resize(rgb, size, size, RESIZE_FILTER);

        let pixels = Array3::from_shape_fn((INPUT_SIZE, INPUT_SIZE, INPUT_CHANNELS), |(y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / PIXEL_SCALE
        });

        PreprocessedImage::new(pixels)
    }
}
