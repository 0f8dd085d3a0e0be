//! Verification session state machine.
//!
//! Idle → Verifying → Displaying → Idle. The `watch` channel holding the
//! current [`SessionStatus`] is the single source of truth: a trigger is
//! admitted only by atomically flipping Idle to Verifying inside it.

use crate::engine::AttemptError;
use faceid_core::{Verdict, VerificationResult};
use faceid_hw::{Frame, LatestFrame};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Pause between admitting a trigger and starting the pipeline, so the
    /// busy indication can render first.
    pub start_delay: Duration,
    /// How long a verdict stays displayed before the session re-arms.
    pub cooldown: Duration,
    /// Upper bound on a single attempt.
    pub verify_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Verifying,
    Displaying,
}

/// What the presentation layer renders.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Set only while Displaying.
    pub verdict: Option<Verdict>,
    /// Scores behind the verdict, when the pipeline got that far.
    pub result: Option<Arc<VerificationResult>>,
    /// Why the attempt failed, when it did.
    pub failure: Option<String>,
    /// When this state was entered.
    pub since: Instant,
}

impl SessionStatus {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            verdict: None,
            result: None,
            failure: None,
            since: Instant::now(),
        }
    }

    fn verifying() -> Self {
        Self {
            state: SessionState::Verifying,
            ..Self::idle()
        }
    }

    fn displaying(outcome: Result<VerificationResult, AttemptError>, since: Instant) -> Self {
        let (verdict, result, failure) = match outcome {
            Ok(result) => (result.verdict(), Some(Arc::new(result)), None),
            Err(e) => (Verdict::Unverified, None, Some(e.to_string())),
        };
        Self {
            state: SessionState::Displaying,
            verdict: Some(verdict),
            result,
            failure,
            since,
        }
    }
}

/// Runs one complete verification attempt.
pub trait Verifier: Send + Sync + 'static {
    fn verify(&self) -> impl Future<Output = Result<VerificationResult, AttemptError>> + Send;

    /// Resolves once no attempt is still running, including ones whose
    /// caller gave up on them.
    fn settled(&self) -> impl Future<Output = ()> + Send;
}

struct Inner<V> {
    verifier: V,
    timings: SessionTimings,
    status: watch::Sender<SessionStatus>,
    frames: LatestFrame,
}

/// Presentation boundary: `latest_frame()`, `trigger()` and an observable status.
pub struct SessionController<V> {
    inner: Arc<Inner<V>>,
}

impl<V: Verifier> SessionController<V> {
    pub fn new(verifier: V, frames: LatestFrame, timings: SessionTimings) -> Self {
        let (status, _) = watch::channel(SessionStatus::idle());
        Self {
            inner: Arc::new(Inner {
                verifier,
                timings,
                status,
                frames,
            }),
        }
    }

    /// Start an attempt if the session is Idle. Returns whether it was admitted.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self) -> bool {
        let admitted = self.inner.status.send_if_modified(|status| {
            if status.state != SessionState::Idle {
                return false;
            }
            *status = SessionStatus::verifying();
            true
        });

        if !admitted {
            tracing::debug!(state = ?self.state(), "trigger ignored; attempt in progress");
            return false;
        }

        tracing::info!("verification triggered");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_attempt());
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.status.borrow().state
    }

    /// Most recent pumped frame, for the live preview.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.inner.frames.get()
    }
}

impl<V: Verifier> Inner<V> {
    async fn run_attempt(self: Arc<Self>) {
        tokio::time::sleep(self.timings.start_delay).await;

        // Run the pipeline as its own task so a panic still resolves the attempt.
        let worker = Arc::clone(&self);
        let mut task = tokio::spawn(async move { worker.verifier.verify().await });
        let limit = self.timings.verify_timeout;
        let outcome = match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                tracing::error!(error = %join_err, "verification task aborted");
                Err(AttemptError::Aborted)
            }
            Err(_) => {
                task.abort();
                Err(AttemptError::Timeout(limit))
            }
        };
        let timed_out = matches!(outcome, Err(AttemptError::Timeout(_)));

        match &outcome {
            Ok(result) => tracing::info!(
                verified = result.verified,
                ratio = result.ratio,
                "verdict displayed"
            ),
            Err(e) => tracing::warn!(error = %e, "verification failed; displaying Unverified"),
        }

        let shown = Instant::now();
        self.status.send_replace(SessionStatus::displaying(outcome, shown));

        tokio::time::sleep_until(shown + self.timings.cooldown).await;
        if timed_out {
            tracing::info!("waiting for the timed-out attempt to finish before re-arming");
        }
        // Only one attempt may be in flight, abandoned ones included.
        self.verifier.settled().await;
        self.status.send_replace(SessionStatus::idle());
        tracing::info!("session re-armed");
    }
}
