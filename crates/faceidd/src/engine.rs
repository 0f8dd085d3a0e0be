use crate::config::{Config, ModelKind};
use crate::session::Verifier;
use faceid_core::{
    GalleryError, GalleryScanner, ImageSource, L1Similarity, ModelError, PreprocessError,
    Preprocessor, SiameseModel, SimilarityModel, VerificationEngine, VerificationResult,
};
use faceid_hw::{
    Camera, CameraError, CaptureSource, Frame, FramePump, ImageReplay, LatestFrame, PumpError,
    PumpHandle,
};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

/// Startup failures. Any of these keeps the daemon from coming up.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("frame pump error: {0}")]
    Pump(#[from] PumpError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why a single verification attempt produced no verdict of its own.
///
/// The session shows every one of these as Unverified.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("no frame captured yet")]
    CaptureUnavailable,
    #[error("latest frame is stale ({age_ms} ms old)")]
    StaleFrame { age_ms: u64 },
    #[error("probe rejected: {0}")]
    InvalidProbe(#[source] PreprocessError),
    #[error("{0}")]
    NoGalleryEntries(#[source] GalleryError),
    #[error("gallery unavailable: {0}")]
    Gallery(#[source] GalleryError),
    #[error("similarity model failed: {0}")]
    ModelUnavailable(#[source] GalleryError),
    #[error("verification timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("verification aborted")]
    Aborted,
}

impl From<GalleryError> for AttemptError {
    fn from(e: GalleryError) -> Self {
        match e {
            GalleryError::NoGalleryEntries { .. } => Self::NoGalleryEntries(e),
            GalleryError::Model { .. } => Self::ModelUnavailable(e),
            GalleryError::Io { .. } => Self::Gallery(e),
        }
    }
}

/// Snapshot → probe → gallery scores → verdict. Owned by the engine thread.
pub struct Pipeline {
    preprocessor: Preprocessor,
    scanner: GalleryScanner,
    engine: VerificationEngine,
    model: Box<dyn SimilarityModel>,
    input_image_path: PathBuf,
    max_frame_age: Duration,
}

impl Pipeline {
    pub fn new(config: &Config, model: Box<dyn SimilarityModel>) -> Self {
        Self {
            preprocessor: Preprocessor::new(),
            scanner: GalleryScanner::new(&config.gallery_dir),
            engine: VerificationEngine::new(config.thresholds()),
            model,
            input_image_path: config.input_image_path.clone(),
            max_frame_age: config.max_frame_age(),
        }
    }

    /// Run one attempt against `snapshot`, the latest frame as of `now`.
    pub fn verify(
        &mut self,
        snapshot: Option<Arc<Frame>>,
        now: Instant,
    ) -> Result<VerificationResult, AttemptError> {
        let frame = snapshot.ok_or(AttemptError::CaptureUnavailable)?;

        let age = now.saturating_duration_since(frame.timestamp);
        if age > self.max_frame_age {
            return Err(AttemptError::StaleFrame {
                age_ms: age.as_millis() as u64,
            });
        }
        tracing::debug!(
            sequence = frame.sequence,
            age_ms = age.as_millis() as u64,
            "probe frame"
        );

        self.save_probe(&frame);

        let probe = self
            .preprocessor
            .process(ImageSource::Pixels(frame.as_raw()))
            .map_err(AttemptError::InvalidProbe)?;

        let scan = self
            .scanner
            .score_against_gallery(&probe, self.model.as_mut())?;
        if !scan.skipped.is_empty() {
            tracing::warn!(skipped = scan.skipped.len(), "some gallery images were not scored");
        }

        let result = self.engine.decide(&scan.scores, scan.gallery_size);
        tracing::info!(
            total = result.gallery_size,
            similar = result.detections,
            ratio = result.ratio,
            verified = result.verified,
            model = self.model.name(),
            "verification complete"
        );
        Ok(result)
    }

    /// Write the probe to disk for auditing. Failure here never fails the attempt.
    fn save_probe(&self, frame: &Frame) {
        let path = &self.input_image_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(
                    path = %parent.display(),
                    error = %e,
                    "cannot create probe directory"
                );
                return;
            }
        }
        let Some(img) = frame.to_rgb_image() else {
            tracing::warn!(?frame, "probe frame has inconsistent geometry; not saved");
            return;
        };
        if let Err(e) = img.save(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save probe image");
        }
    }
}

/// Counts one outstanding request from creation until the engine drops it.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn new(count: &Arc<watch::Sender<usize>>) -> Self {
        count.send_modify(|n| *n += 1);
        Self(Arc::clone(count))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Messages sent from the session to the engine thread.
enum EngineRequest {
    Verify {
        reply: oneshot::Sender<Result<VerificationResult, AttemptError>>,
        _in_flight: InFlight,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Verifier for EngineHandle {
    fn verify(&self) -> impl Future<Output = Result<VerificationResult, AttemptError>> + Send {
        request_verify(self.tx.clone(), InFlight::new(&self.in_flight))
    }

    fn settled(&self) -> impl Future<Output = ()> + Send {
        let mut count = self.in_flight.subscribe();
        async move {
            while *count.borrow_and_update() != 0 {
                if count.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn request_verify(
    tx: mpsc::Sender<EngineRequest>,
    in_flight: InFlight,
) -> Result<VerificationResult, AttemptError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = EngineRequest::Verify {
        reply: reply_tx,
        _in_flight: in_flight,
    };
    tx.send(request)
        .await
        .map_err(|_| AttemptError::ChannelClosed)?;
    reply_rx.await.map_err(|_| AttemptError::ChannelClosed)?
}

/// Everything the daemon needs after startup.
pub struct Engine {
    pub handle: EngineHandle,
    pub frames: LatestFrame,
    /// Stops the pump and releases the capture device when dropped.
    pub pump: PumpHandle,
}

/// Load the model, open the capture source, start the frame pump and the
/// engine thread.
///
/// Fails fast at startup if any resource is unavailable.
pub fn spawn_engine(config: &Config) -> Result<Engine, EngineError> {
    let model = load_model(config)?;

    let source = open_source(config)?;
    let mut pump = FramePump::new(source, config.crop_window());
    pump.warm_up(config.warmup_frames);
    let frames = pump.latest();
    let pump = pump.spawn(config.frame_period())?;

    let handle = spawn_pipeline(Pipeline::new(config, model), frames.clone())?;

    Ok(Engine {
        handle,
        frames,
        pump,
    })
}

fn load_model(config: &Config) -> Result<Box<dyn SimilarityModel>, EngineError> {
    match config.model_kind {
        ModelKind::Onnx => {
            let path = config.model_path_str();
            let model = SiameseModel::load(&path, config.intra_threads)?;
            tracing::info!(path = %path, threads = config.intra_threads, "siamese model loaded");
            Ok(Box::new(model))
        }
        ModelKind::L1 => {
            tracing::info!("using L1 similarity; no model artifact loaded");
            Ok(Box::new(L1Similarity))
        }
    }
}

fn open_source(config: &Config) -> Result<Box<dyn CaptureSource>, EngineError> {
    if let Some(dir) = &config.replay_dir {
        return Ok(Box::new(ImageReplay::open(dir)?));
    }

    match Camera::open(&config.camera_device) {
        Ok(camera) => {
            tracing::info!(
                device = %config.camera_device,
                width = camera.width,
                height = camera.height,
                fourcc = ?camera.fourcc,
                "camera opened"
            );
            Ok(Box::new(camera))
        }
        Err(e) => {
            for dev in Camera::list_devices() {
                tracing::info!(
                    path = %dev.path,
                    name = %dev.name,
                    driver = %dev.driver,
                    "available capture device"
                );
            }
            Err(e.into())
        }
    }
}

/// Run `pipeline` on a dedicated OS thread, serving one request at a time.
fn spawn_pipeline(
    mut pipeline: Pipeline,
    frames: LatestFrame,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let (in_flight, _) = watch::channel(0usize);

    std::thread::Builder::new()
        .name("faceid-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify { reply, .. } if reply.is_closed() => {
                        tracing::debug!("verify request abandoned by caller; skipping");
                    }
                    EngineRequest::Verify { reply, .. } => {
                        let snapshot = frames.get();
                        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                            pipeline.verify(snapshot, Instant::now())
                        }))
                        .unwrap_or_else(|_| {
                            tracing::error!("verification pipeline panicked");
                            Err(AttemptError::Aborted)
                        });
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        in_flight: Arc::new(in_flight),
    })
}
