//! Interactive capture loop for the binary.
//!
//! Wires the real microphone source and HTTP client into a recording
//! session and toggles it from stdin. The presentation layer proper lives
//! outside this crate; the notifier here just logs what a UI would render.

use crate::audio::CpalFrameSource;
use crate::client::{HttpTranscriptionClient, TranscriptionClient, TranscriptionResult};
use crate::config::Config;
use crate::error::SessionError;
use crate::session::{Notifier, RecordingSession, SessionState};
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Notifier that logs session callbacks the way the kiosk UI presents them.
struct LogNotifier {
    low_confidence_threshold: f32,
}

impl Notifier for LogNotifier {
    fn on_recording_start(&self) {
        info!("Listening... press Enter to stop");
    }

    fn on_recording_stop(&self) {
        info!("Recording finished, transcribing");
    }

    fn on_transcription_received(&self, result: &TranscriptionResult) {
        info!(
            text = %result.text,
            confidence = result.confidence,
            "Transcription"
        );
        if result.confidence < self.low_confidence_threshold {
            warn!(
                confidence = result.confidence,
                threshold = self.low_confidence_threshold,
                "Low confidence, please verify the order"
            );
        }
    }

    fn on_error(&self, message: &str) {
        error!(message = message, "Recording failed");
    }
}

/// Run the interactive loop: Enter toggles recording, Ctrl-C quits.
pub async fn run(config: Config) -> Result<()> {
    let notifier = Arc::new(LogNotifier {
        low_confidence_threshold: config.transcription.low_confidence_threshold,
    });
    let session = RecordingSession::new(
        CpalFrameSource::new(),
        HttpTranscriptionClient::new(config.transcription.endpoint.clone()),
        notifier,
        config.recording.policy(),
        config.transcription.language.clone(),
    );

    info!(
        endpoint = %config.transcription.endpoint,
        language = %config.transcription.language,
        "Ready. Press Enter to start recording, Ctrl-C to quit"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                if line?.is_none() {
                    break;
                }
                toggle(&session).await;
            }
        }
    }

    let _ = session.stop().await;
    session.join().await;
    info!("Bye");
    Ok(())
}

async fn toggle<C: TranscriptionClient + 'static>(
    session: &RecordingSession<CpalFrameSource, C>,
) {
    match session.state().await {
        SessionState::Idle => {
            if let Err(err) = session.start().await {
                match err {
                    SessionError::Permission(_) => {
                        error!(error = %err, "Check microphone permissions and retry");
                    }
                    other => error!(error = %other, "Could not start recording"),
                }
            }
        }
        SessionState::Recording => {
            let _ = session.stop().await;
            session.join().await;
        }
        state => {
            info!(?state, "Busy, try again shortly");
        }
    }
}
