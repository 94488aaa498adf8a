//! Error taxonomy for the recording pipeline.
//!
//! Every error is terminal for the current attempt; the session resolves
//! back to `Idle` and a fresh `start()` is required.

use std::time::Duration;
use thiserror::Error;

/// Failure modes of a recording attempt.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The input device is unavailable or access was denied.
    #[error("microphone unavailable or access denied: {0}")]
    Permission(String),

    /// The recording ended before the minimum duration was reached.
    #[error("recording too short ({elapsed:?}, minimum {min:?})")]
    DurationTooShort { elapsed: Duration, min: Duration },

    /// The assembled container exceeds the configured size cap.
    #[error("recording too large ({size} bytes, cap {limit} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The transcription request exceeded its adaptive timeout.
    #[error("transcription request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure talking to the transcription service.
    #[error("network error: {0}")]
    Network(String),

    /// The transcription service answered but reported a failure.
    #[error("transcription rejected: {0}")]
    Rejected(String),

    /// `start()` was called while a session is already in progress.
    #[error("a recording is already in progress")]
    AlreadyRecording,
}
