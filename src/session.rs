//! Recording session state machine.
//!
//! Coordinates the frame source, the PCM buffer, the duration policy, and
//! the transcription submission. All transitions are serialized through a
//! single owning pump task per session plus a lock-guarded state cell, so
//! frame arrival, user calls, and the watchdog never race.

use crate::audio::{FrameSource, SampleBlock};
use crate::client::{TranscriptionClient, TranscriptionResult};
use crate::container;
use crate::error::SessionError;
use crate::pcm;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Stopping,
    AwaitingResult,
    Error,
}

/// Duration and size bounds for a recording attempt.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Recordings shorter than this are discarded without submission.
    pub min_duration: Duration,
    /// The watchdog stops the recording automatically at this duration.
    pub max_duration: Duration,
    /// Assembled containers larger than this are discarded.
    pub max_payload_bytes: usize,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_millis(500),
            max_duration: Duration::from_secs(60),
            max_payload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Listener for session lifecycle and result callbacks.
///
/// Every hook has a no-op default, so collaborators implement only what
/// they present.
pub trait Notifier: Send + Sync {
    fn on_recording_start(&self) {}
    fn on_recording_stop(&self) {}
    fn on_transcription_received(&self, _result: &TranscriptionResult) {}
    fn on_error(&self, _message: &str) {}
}

/// Notifier that ignores every callback.
pub struct NullNotifier;

impl Notifier for NullNotifier {}

struct Shared<C> {
    state: RwLock<SessionState>,
    buffer: Mutex<Vec<i16>>,
    started_at: std::sync::Mutex<Option<Instant>>,
    last_error: std::sync::Mutex<Option<SessionError>>,
    policy: SessionPolicy,
    language: String,
    client: C,
    notifier: Arc<dyn Notifier>,
}

/// A recording session owning one buffer, one frame source subscription,
/// and at most one in-flight transcription request.
pub struct RecordingSession<S, C> {
    shared: Arc<Shared<C>>,
    source: Arc<Mutex<S>>,
    stop_token: Mutex<Option<CancellationToken>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<S, C> RecordingSession<S, C>
where
    S: FrameSource + 'static,
    C: TranscriptionClient + 'static,
{
    pub fn new(
        source: S,
        client: C,
        notifier: Arc<dyn Notifier>,
        policy: SessionPolicy,
        language: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(SessionState::Idle),
                buffer: Mutex::new(Vec::new()),
                started_at: std::sync::Mutex::new(None),
                last_error: std::sync::Mutex::new(None),
                policy,
                language: language.into(),
                client,
                notifier,
            }),
            source: Arc::new(Mutex::new(source)),
            stop_token: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    /// Begin a recording attempt: `Idle -> Recording`.
    ///
    /// Rejected while any attempt is in progress; the running session is
    /// left untouched. A device acquisition failure leaves the session
    /// `Idle` and is also reported through the notifier.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut state = self.shared.state.write().await;
        if *state != SessionState::Idle {
            return Err(SessionError::AlreadyRecording);
        }

        // Previous attempt has settled (state is Idle), so this is instant.
        if let Some(handle) = self.pump.lock().await.take() {
            let _ = handle.await;
        }

        let frames = match self.source.lock().await.open() {
            Ok(frames) => frames,
            Err(err) => {
                drop(state);
                self.fail_without_attempt(err.clone());
                return Err(err);
            }
        };

        self.shared.buffer.lock().await.clear();
        let started_at = Instant::now();
        *self.shared.started_at.lock().expect("lock poisoned") = Some(started_at);
        self.shared
            .last_error
            .lock()
            .expect("lock poisoned")
            .take();

        *state = SessionState::Recording;
        drop(state);

        let token = CancellationToken::new();
        *self.stop_token.lock().await = Some(token.clone());

        self.shared.notifier.on_recording_start();
        info!("Recording started");

        let handle = tokio::spawn(pump(
            self.shared.clone(),
            self.source.clone(),
            frames,
            token,
            started_at,
        ));
        *self.pump.lock().await = Some(handle);

        Ok(())
    }

    /// End the recording attempt: `Recording -> Stopping`.
    ///
    /// No-op outside `Recording`. Finalization (duration check, container
    /// assembly, submission) continues on the pump task; outcomes arrive
    /// through the notifier.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let mut state = self.shared.state.write().await;
        if *state != SessionState::Recording {
            return Ok(());
        }
        *state = SessionState::Stopping;
        drop(state);

        debug!("Stop requested");
        if let Some(token) = self.stop_token.lock().await.take() {
            token.cancel();
        }
        Ok(())
    }

    /// Wait until the in-flight attempt has fully settled.
    pub async fn join(&self) {
        if let Some(handle) = self.pump.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        *self.shared.state.read().await
    }

    /// Number of PCM samples buffered so far in the current attempt.
    pub async fn buffered_samples(&self) -> usize {
        self.shared.buffer.lock().await.len()
    }

    /// Elapsed time since the current or most recent attempt started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.shared
            .started_at
            .lock()
            .expect("lock poisoned")
            .map(|t| t.elapsed())
    }

    /// Error that ended the most recent attempt, if any.
    pub fn last_error(&self) -> Option<SessionError> {
        self.shared.last_error.lock().expect("lock poisoned").clone()
    }

    fn fail_without_attempt(&self, err: SessionError) {
        warn!(error = %err, "Recording could not start");
        self.shared.notifier.on_error(&err.to_string());
        *self.shared.last_error.lock().expect("lock poisoned") = Some(err);
    }
}

/// Single owning task for one recording attempt.
///
/// Runs the frame loop with the watchdog deadline, then finalizes: closes
/// the source, enforces the duration and size policy, assembles the
/// container, and drives the submission to completion.
async fn pump<S, C>(
    shared: Arc<Shared<C>>,
    source: Arc<Mutex<S>>,
    mut frames: UnboundedReceiver<SampleBlock>,
    stop: CancellationToken,
    started_at: Instant,
) where
    S: FrameSource,
    C: TranscriptionClient,
{
    let deadline = tokio::time::Instant::now() + shared.policy.max_duration;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                warn!(
                    max_secs = shared.policy.max_duration.as_secs_f32(),
                    "Maximum recording duration reached, stopping automatically"
                );
                let mut state = shared.state.write().await;
                if *state == SessionState::Recording {
                    *state = SessionState::Stopping;
                }
                break;
            }
            block = frames.recv() => match block {
                Some(block) => append_block(&shared, &block).await,
                None => {
                    // Source ended underneath us; treat as a stop.
                    let mut state = shared.state.write().await;
                    if *state == SessionState::Recording {
                        *state = SessionState::Stopping;
                    }
                    break;
                }
            }
        }
    }

    // Out of Recording: release the device before anything else so the
    // hardware is freed on every exit path.
    source.lock().await.close();
    shared.notifier.on_recording_stop();

    let elapsed = started_at.elapsed();
    let samples = std::mem::take(&mut *shared.buffer.lock().await);
    info!(
        secs = elapsed.as_secs_f32(),
        samples = samples.len(),
        "Recording stopped"
    );

    if elapsed < shared.policy.min_duration {
        fail(&shared, SessionError::DurationTooShort {
            elapsed,
            min: shared.policy.min_duration,
        })
        .await;
        return;
    }

    let audio = container::build(&samples);
    if audio.len() > shared.policy.max_payload_bytes {
        fail(&shared, SessionError::PayloadTooLarge {
            size: audio.len(),
            limit: shared.policy.max_payload_bytes,
        })
        .await;
        return;
    }

    *shared.state.write().await = SessionState::AwaitingResult;
    debug!(bytes = audio.len(), "Submitting for transcription");

    match shared
        .client
        .submit(audio, &shared.language, elapsed.as_secs_f64())
        .await
    {
        Ok(result) => {
            shared.notifier.on_transcription_received(&result);
            *shared.state.write().await = SessionState::Idle;
        }
        Err(err) => {
            *shared.state.write().await = SessionState::Error;
            fail(&shared, err).await;
        }
    }
}

/// Encode and append a block, only while still `Recording`.
async fn append_block<C>(shared: &Shared<C>, block: &[f32]) {
    if *shared.state.read().await != SessionState::Recording {
        return;
    }
    let mut buffer = shared.buffer.lock().await;
    buffer.extend(pcm::encode_block(block));
}

/// Record the error, report it, and resolve the session back to `Idle`.
async fn fail<C>(shared: &Shared<C>, err: SessionError) {
    warn!(error = %err, "Recording attempt failed");
    shared.notifier.on_error(&err.to_string());
    *shared.last_error.lock().expect("lock poisoned") = Some(err);
    *shared.state.write().await = SessionState::Idle;
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
