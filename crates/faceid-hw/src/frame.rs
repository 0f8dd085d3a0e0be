//! Frame type and pixel conversions: YUYV to RGB, fixed-window crop.

use faceid_core::{ChannelOrder, RawImage};
use image::RgbImage;

const CHANNELS: usize = 3;

/// A captured 8-bit, 3-channel interleaved camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("order", &self.order)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Borrow the pixels in the layout the preprocessor takes.
    pub fn as_raw(&self) -> RawImage<'_> {
        RawImage {
            data: &self.data,
            width: self.width,
            height: self.height,
            order: self.order,
        }
    }

    /// Copy into an RGB image buffer (for saving).
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        let data = match self.order {
            ChannelOrder::Rgb => self.data.clone(),
            ChannelOrder::Bgr => self
                .data
                .chunks_exact(CHANNELS)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };
        RgbImage::from_raw(self.width, self.height, data)
    }

    /// Cut `window` out of this frame.
    ///
    /// Fails rather than clamping when the window does not fit, so a stored
    /// frame always has the window's exact geometry.
    pub fn crop(&self, window: &CropWindow) -> Result<Frame, FrameError> {
        let expected = self.width as usize * self.height as usize * CHANNELS;
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        if !window.fits(self.width, self.height) {
            return Err(FrameError::CropOutOfBounds {
                window: *window,
                width: self.width,
                height: self.height,
            });
        }

        let stride = self.width as usize * CHANNELS;
        let row_bytes = window.size as usize * CHANNELS;
        let mut data = Vec::with_capacity(row_bytes * window.size as usize);
        for row in window.y..window.y + window.size {
            let start = row as usize * stride + window.x as usize * CHANNELS;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        Ok(Frame {
            data,
            width: window.size,
            height: window.size,
            order: self.order,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }
}

/// Square crop region applied to every pulled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl Default for CropWindow {
    fn default() -> Self {
        Self {
            x: 200,
            y: 120,
            size: 250,
        }
    }
}

impl CropWindow {
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.size > 0
            && self.x.checked_add(self.size).is_some_and(|r| r <= width)
            && self.y.checked_add(self.size).is_some_and(|b| b <= height)
    }
}

/// Convert packed YUYV (4:2:2) to interleaved RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * CHANNELS);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_u8(y + 1.402 * v));
            rgb.push(clamp_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_u8(y + 1.772 * u));
        }
    }
    Ok(rgb)
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("crop window {window:?} does not fit a {width}x{height} frame")]
    CropOutOfBounds {
        window: CropWindow,
        width: u32,
        height: u32,
    },
}
