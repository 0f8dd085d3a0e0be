//! Fixed-cadence frame pump.
//!
//! The pump is the only owner of the capture source. It crops every pulled
//! frame and publishes it to a shared latest-frame slot that readers
//! snapshot without ever touching the device.

use crate::camera::{CameraError, CaptureSource};
use crate::frame::{CropWindow, Frame, FrameError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PumpError {
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(#[from] CameraError),
    #[error("frame rejected: {0}")]
    BadFrame(#[from] FrameError),
    #[error("failed to spawn pump thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Shared read handle to the most recently pumped frame.
#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<RwLock<Option<Arc<Frame>>>>,
}

impl LatestFrame {
    /// The latest frame, if any was ever captured. Never blocks on capture.
    pub fn get(&self) -> Option<Arc<Frame>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, frame: Arc<Frame>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }
}

pub struct FramePump {
    source: Box<dyn CaptureSource>,
    crop: CropWindow,
    latest: LatestFrame,
    failing: bool,
}

impl FramePump {
    pub fn new(source: Box<dyn CaptureSource>, crop: CropWindow) -> Self {
        Self {
            source,
            crop,
            latest: LatestFrame::default(),
            failing: false,
        }
    }

    /// Pull one frame, crop it and make it the latest frame.
    ///
    /// On failure the previous latest frame stays in place.
    pub fn tick(&mut self) -> Result<Arc<Frame>, PumpError> {
        match self.pull() {
            Ok(frame) => {
                if self.failing {
                    tracing::info!(source = %self.source.describe(), "capture recovered");
                    self.failing = false;
                }
                let frame = Arc::new(frame);
                self.latest.store(Arc::clone(&frame));
                Ok(frame)
            }
            Err(e) => {
                if self.failing {
                    tracing::debug!(error = %e, "capture still unavailable");
                } else {
                    tracing::warn!(
                        source = %self.source.describe(),
                        error = %e,
                        "capture unavailable; keeping last good frame"
                    );
                    self.failing = true;
                }
                Err(e)
            }
        }
    }

    fn pull(&mut self) -> Result<Frame, PumpError> {
        let raw = self.source.read()?;
        Ok(raw.crop(&self.crop)?)
    }

    /// The most recently stored frame.
    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.latest.get()
    }

    /// A read handle that stays valid after the pump moves to its thread.
    pub fn latest(&self) -> LatestFrame {
        self.latest.clone()
    }

    /// Read and discard `count` frames (exposure/gain stabilisation).
    pub fn warm_up(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        tracing::info!(count, "discarding warmup frames");
        for _ in 0..count {
            let _ = self.source.read();
        }
    }

    /// Move the pump onto a dedicated thread ticking every `period`.
    ///
    /// The capture source is dropped (and the device released) when the
    /// returned handle is stopped or dropped.
    pub fn spawn(self, period: Duration) -> Result<PumpHandle, PumpError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let mut pump = self;

        let join = std::thread::Builder::new()
            .name("faceid-pump".into())
            .spawn(move || {
                tracing::info!(
                    source = %pump.source.describe(),
                    period_ms = period.as_millis() as u64,
                    "frame pump started"
                );
                let mut next = Instant::now();
                while !thread_stop.load(Ordering::Relaxed) {
                    // Failures are logged inside tick().
                    let _ = pump.tick();

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        // Behind schedule: skip missed ticks instead of bursting.
                        next = now;
                    }
                }
                tracing::info!("frame pump stopped");
            })
            .map_err(PumpError::Spawn)?;

        Ok(PumpHandle {
            stop,
            join: Some(join),
        })
    }
}

/// Owns the pump thread; stops it on drop.
pub struct PumpHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PumpHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("frame pump thread panicked");
            }
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceid_core::ChannelOrder;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn frame(width: u32, height: u32, sequence: u32) -> Frame {
        Frame {
            data: vec![sequence as u8; (width * height * 3) as usize],
            width,
            height,
            order: ChannelOrder::Rgb,
            timestamp: Instant::now(),
            sequence,
        }
    }

    struct Scripted {
        reads: VecDeque<Result<Frame, CameraError>>,
    }

    impl CaptureSource for Scripted {
        fn read(&mut self) -> Result<Frame, CameraError> {
            self.reads.pop_front().unwrap_or(Err(CameraError::EndOfStream))
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    struct Counting {
        reads: Arc<AtomicUsize>,
    }

    impl CaptureSource for Counting {
        fn read(&mut self) -> Result<Frame, CameraError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(frame(8, 8, n as u32))
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    fn pump(reads: Vec<Result<Frame, CameraError>>) -> FramePump {
        FramePump::new(
            Box::new(Scripted { reads: reads.into() }),
            CropWindow {
                x: 2,
                y: 2,
                size: 4,
            },
        )
    }

    #[test]
    fn test_snapshot_empty_before_first_tick() {
        let p = pump(vec![]);
        assert!(p.snapshot().is_none());
    }

    #[test]
    fn test_tick_stores_cropped_frame() {
        let mut p = pump(vec![Ok(frame(10, 10, 1))]);
        p.tick().unwrap();

        let latest = p.snapshot().unwrap();
        assert_eq!((latest.width, latest.height), (4, 4));
        assert_eq!(latest.sequence, 1);
    }

    #[test]
    fn test_tick_replaces_previous() {
        let mut p = pump(vec![Ok(frame(10, 10, 1)), Ok(frame(10, 10, 2))]);
        p.tick().unwrap();
        p.tick().unwrap();
        assert_eq!(p.snapshot().unwrap().sequence, 2);
    }

    #[test]
    fn test_capture_failure_keeps_last_good_frame() {
        let mut p = pump(vec![
            Ok(frame(10, 10, 1)),
            Err(CameraError::CaptureFailed("unplugged".into())),
        ]);
        p.tick().unwrap();
        let err = p.tick().unwrap_err();

        assert!(matches!(err, PumpError::CaptureUnavailable(_)));
        assert_eq!(p.snapshot().unwrap().sequence, 1);
    }

    #[test]
    fn test_undersized_frame_never_stored() {
        let mut p = pump(vec![Ok(frame(10, 10, 1)), Ok(frame(5, 5, 2))]);
        p.tick().unwrap();
        let err = p.tick().unwrap_err();

        assert!(matches!(err, PumpError::BadFrame(FrameError::CropOutOfBounds { .. })));
        let latest = p.snapshot().unwrap();
        assert_eq!(latest.sequence, 1);
        assert_eq!(latest.width, 4);
    }

    #[test]
    fn test_recovers_after_failure() {
        let mut p = pump(vec![
            Err(CameraError::EndOfStream),
            Err(CameraError::EndOfStream),
            Ok(frame(10, 10, 3)),
        ]);
        assert!(p.tick().is_err());
        assert!(p.tick().is_err());
        assert!(p.snapshot().is_none());
        p.tick().unwrap();
        assert_eq!(p.snapshot().unwrap().sequence, 3);
    }

    #[test]
    fn test_latest_handle_sees_ticks() {
        let mut p = pump(vec![Ok(frame(10, 10, 9))]);
        let handle = p.latest();
        assert!(handle.get().is_none());
        p.tick().unwrap();
        assert_eq!(handle.get().unwrap().sequence, 9);
    }

    #[test]
    fn test_warm_up_discards_frames() {
        let mut p = pump(vec![Ok(frame(10, 10, 1)), Ok(frame(10, 10, 2)), Ok(frame(10, 10, 3))]);
        p.warm_up(2);
        assert!(p.snapshot().is_none());
        p.tick().unwrap();
        assert_eq!(p.snapshot().unwrap().sequence, 3);
    }

    #[test]
    fn test_spawned_pump_publishes_and_stops() {
        let reads = Arc::new(AtomicUsize::new(0));
        let p = FramePump::new(
            Box::new(Counting { reads: Arc::clone(&reads) }),
            CropWindow {
                x: 0,
                y: 0,
                size: 8,
            },
        );
        let latest = p.latest();
        let handle = p.spawn(Duration::from_millis(1)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while latest.get().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(latest.get().is_some());

        handle.stop();
        let after_stop = reads.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(reads.load(Ordering::SeqCst), after_stop);
    }
}
