//! Pairwise similarity models.
//!
//! The verification pipeline only needs "two preprocessed images in, one
//! scalar out". [`SiameseModel`] runs an exported siamese network through
//! ONNX Runtime; the other variants need no artifact.

use crate::types::PreprocessedImage;
use ndarray::Axis;
use ort::session::Session;
use ort::value::TensorRef;
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;

const SIAMESE_INPUTS: usize = 2;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model artifact rejected: {0}")]
    InvalidArtifact(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scores one (probe, reference) pair.
///
/// Implementations must not interpret the score; thresholds are applied by
/// [`VerificationEngine`](crate::verification::VerificationEngine).
pub trait SimilarityModel: Send {
    fn score(
        &mut self,
        probe: &PreprocessedImage,
        reference: &PreprocessedImage,
    ) -> Result<f32, ModelError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Siamese network exported to ONNX.
///
/// Expects two NHWC inputs of shape `[1, 100, 100, 3]` (probe first) and a
/// single scalar output. The distance layer the network was trained with is
/// part of the exported graph.
pub struct SiameseModel {
    session: Session,
}

impl SiameseModel {
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let num_inputs = session.inputs().len();
        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded siamese model"
        );

        if num_inputs != SIAMESE_INPUTS {
            return Err(ModelError::InvalidArtifact(format!(
                "siamese model needs {SIAMESE_INPUTS} inputs, got {num_inputs}"
            )));
        }

        Ok(Self { session })
    }
}

impl SimilarityModel for SiameseModel {
    fn score(
        &mut self,
        probe: &PreprocessedImage,
        reference: &PreprocessedImage,
    ) -> Result<f32, ModelError> {
        let probe = probe.view().insert_axis(Axis(0));
        let reference = reference.view().insert_axis(Axis(0));

        let outputs = self.session.run(ort::inputs![
            TensorRef::from_array_view(probe)?,
            TensorRef::from_array_view(reference)?
        ])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("score extraction: {e}")))?;

        raw.first()
            .copied()
            .ok_or_else(|| ModelError::InferenceFailed("empty output tensor".into()))
    }

    fn name(&self) -> &str {
        "siamese-onnx"
    }
}

/// Artifact-free similarity: `1 - mean(|probe - reference|)`.
///
/// Identical images score 1.0; a black/white pair scores 0.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct L1Similarity;

impl SimilarityModel for L1Similarity {
    fn score(
        &mut self,
        probe: &PreprocessedImage,
        reference: &PreprocessedImage,
    ) -> Result<f32, ModelError> {
        let a = probe.view();
        let b = reference.view();
        let n = a.len();
        if n == 0 {
            return Err(ModelError::InferenceFailed("empty tensor".into()));
        }
        let l1: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum();
        Ok(1.0 - l1 / n as f32)
    }

    fn name(&self) -> &str {
        "l1"
    }
}

/// Replays a fixed score sequence, one score per call, cycling at the end.
#[derive(Debug, Clone)]
pub struct ScriptedScores {
    queue: VecDeque<f32>,
}

impl ScriptedScores {
    pub fn new(scores: impl IntoIterator<Item = f32>) -> Self {
        Self {
            queue: scores.into_iter().collect(),
        }
    }
}

impl SimilarityModel for ScriptedScores {
    fn score(&mut self, _: &PreprocessedImage, _: &PreprocessedImage) -> Result<f32, ModelError> {
        let next = self
            .queue
            .pop_front()
            .ok_or_else(|| ModelError::InferenceFailed("no scripted scores".into()))?;
        self.queue.push_back(next);
        Ok(next)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
