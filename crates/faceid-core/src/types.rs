use ndarray::{Array3, ArrayView3};

/// Side length of the square model input.
pub const INPUT_SIZE: usize = 100;
/// Colour channels of the model input (RGB).
pub const INPUT_CHANNELS: usize = 3;

/// Byte order of the colour channels in an interleaved 8-bit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Borrowed interleaved 8-bit, 3-channel pixel buffer (e.g. a captured frame).
#[derive(Debug, Clone, Copy)]
pub struct RawImage<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
}

/// Model-ready image: `INPUT_SIZE`×`INPUT_SIZE`×3, HWC, values in [0, 1].
///
/// Only [`Preprocessor`](crate::preprocess::Preprocessor) builds these, so the
/// shape and range hold for every instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedImage {
    pixels: Array3<f32>,
}

impl PreprocessedImage {
    pub(crate) fn new(pixels: Array3<f32>) -> Self {
        debug_assert_eq!(pixels.shape(), &[INPUT_SIZE, INPUT_SIZE, INPUT_CHANNELS]);
        Self { pixels }
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.pixels.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.pixels.shape()
    }
}

/// Similarity of the probe against one gallery entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PairScore {
    /// Gallery entry the probe was paired with.
    pub reference: String,
    pub value: f32,
}

/// Two-stage threshold policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Minimum pair score counted as a local match.
    pub detection: f32,
    /// Minimum fraction of the gallery that must be local matches.
    pub verification: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            detection: 0.7,
            verification: 0.7,
        }
    }
}

/// Outcome of reducing a score list to a verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub scores: Vec<PairScore>,
    /// Pairs scoring at or above the detection threshold.
    pub detections: usize,
    /// Denominator of the ratio: gallery entries present when the scan started.
    pub gallery_size: usize,
    pub ratio: f32,
    pub verified: bool,
}

impl VerificationResult {
    pub fn verdict(&self) -> Verdict {
        if self.verified {
            Verdict::Verified
        } else {
            Verdict::Unverified
        }
    }
}

/// What the station shows after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Unverified,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Verified => f.write_str("Verified!"),
            Verdict::Unverified => f.write_str("Unverified!"),
        }
    }
}
