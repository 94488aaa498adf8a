//! Transcription submission over HTTP.
//!
//! Sends the assembled container to the remote transcription endpoint as a
//! multipart form and maps the JSON reply onto [`TranscriptionResult`].

use crate::error::SessionError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Floor for the request timeout regardless of recording length.
const MIN_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Extra timeout budget per second of recorded audio.
const TIMEOUT_PER_SECOND_MS: f64 = 2_000.0;

/// Outcome of a successful transcription request.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    /// Backend-reported certainty, passed through unmodified, in [0, 1].
    pub confidence: f32,
    pub success: bool,
}

/// Wire format of the transcription endpoint's JSON reply.
#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    success: bool,
    transcription: Option<String>,
    confidence: Option<f32>,
    error: Option<String>,
}

/// Adaptive request timeout: at least 30s, or twice the recording length.
pub fn submit_timeout(duration_secs: f64) -> Duration {
    Duration::from_millis((duration_secs * TIMEOUT_PER_SECOND_MS) as u64).max(MIN_TIMEOUT)
}

/// Client submitting assembled recordings for transcription.
///
/// Implementations make exactly one attempt per call; a failure is terminal
/// for that attempt and is never retried internally.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn submit(
        &self,
        container: Vec<u8>,
        language: &str,
        duration_secs: f64,
    ) -> Result<TranscriptionResult, SessionError>;
}

/// [`TranscriptionClient`] talking to the speech endpoint over HTTP.
pub struct HttpTranscriptionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriptionClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn submit(
        &self,
        container: Vec<u8>,
        language: &str,
        duration_secs: f64,
    ) -> Result<TranscriptionResult, SessionError> {
        let timeout = submit_timeout(duration_secs);

        let audio = reqwest::multipart::Part::bytes(container)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| SessionError::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("audio", audio)
            .text("language", language.to_string())
            .text("duration", duration_secs.to_string());

        debug!(
            endpoint = %self.endpoint,
            timeout_ms = timeout.as_millis() as u64,
            duration_secs = duration_secs,
            "Submitting recording"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SessionError::Timeout(timeout)
                } else {
                    SessionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body: TranscribeResponse = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(SessionError::Network(format!(
                    "transcription endpoint returned HTTP {status}"
                )));
            }
            Err(e) => return Err(SessionError::Network(e.to_string())),
        };

        if !body.success {
            return Err(SessionError::Rejected(
                body.error
                    .unwrap_or_else(|| "transcription failed".to_string()),
            ));
        }

        let result = TranscriptionResult {
            text: body.transcription.unwrap_or_default(),
            confidence: body.confidence.unwrap_or(0.0),
            success: true,
        };
        info!(confidence = result.confidence, "Transcription received");
        Ok(result)
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
