//! faceid-core: one-to-many face verification.
//!
//! Preprocesses probe and reference images, scores each pair with a
//! siamese similarity model (ONNX Runtime on CPU), and reduces the scores
//! to a verdict with a two-stage threshold policy.

pub mod gallery;
pub mod model;
pub mod preprocess;
pub mod types;
pub mod verification;

pub use gallery::{GalleryEntry, GalleryError, GalleryScan, GalleryScanner};
pub use model::{L1Similarity, ModelError, ScriptedScores, SiameseModel, SimilarityModel};
pub use preprocess::{ImageSource, PreprocessError, Preprocessor};
pub use types::{
    ChannelOrder, PairScore, PreprocessedImage, RawImage, Thresholds, Verdict,
    VerificationResult, INPUT_CHANNELS, INPUT_SIZE,
};
pub use verification::VerificationEngine;
