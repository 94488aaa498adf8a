use super::*;
use crate::audio::BLOCK_SIZE;
use crate::container::HEADER_LEN;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Frame source driven by the test instead of a microphone.
struct ScriptedSource {
    handle: Arc<ScriptedHandle>,
}

#[derive(Default)]
struct ScriptedHandle {
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<SampleBlock>>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedHandle {
    fn push(&self, block: SampleBlock) {
        let sender = self.sender.lock().unwrap();
        sender
            .as_ref()
            .expect("source not open")
            .send(block)
            .expect("subscription dropped");
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

fn scripted_source() -> (ScriptedSource, Arc<ScriptedHandle>) {
    let handle = Arc::new(ScriptedHandle::default());
    (
        ScriptedSource {
            handle: handle.clone(),
        },
        handle,
    )
}

impl FrameSource for ScriptedSource {
    fn open(&mut self) -> Result<mpsc::UnboundedReceiver<SampleBlock>, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.handle.sender.lock().unwrap() = Some(tx);
        self.handle.opens.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    fn close(&mut self) {
        *self.handle.sender.lock().unwrap() = None;
        self.handle.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Frame source that always refuses to open.
struct DeniedSource;

impl FrameSource for DeniedSource {
    fn open(&mut self) -> Result<mpsc::UnboundedReceiver<SampleBlock>, SessionError> {
        Err(SessionError::Permission("access denied".to_string()))
    }

    fn close(&mut self) {}
}

struct SubmittedRequest {
    container_len: usize,
    language: String,
    duration_secs: f64,
}

/// Client that records submissions and replies with a canned outcome.
struct FakeClient {
    calls: Arc<std::sync::Mutex<Vec<SubmittedRequest>>>,
    response: Result<TranscriptionResult, SessionError>,
}

impl FakeClient {
    fn succeeding(confidence: f32) -> (Self, Arc<std::sync::Mutex<Vec<SubmittedRequest>>>) {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        (
            Self {
                calls: calls.clone(),
                response: Ok(TranscriptionResult {
                    text: "兩杯凍檸茶".to_string(),
                    confidence,
                    success: true,
                }),
            },
            calls,
        )
    }

    fn failing(err: SessionError) -> (Self, Arc<std::sync::Mutex<Vec<SubmittedRequest>>>) {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        (
            Self {
                calls: calls.clone(),
                response: Err(err),
            },
            calls,
        )
    }
}

#[async_trait]
impl TranscriptionClient for FakeClient {
    async fn submit(
        &self,
        container: Vec<u8>,
        language: &str,
        duration_secs: f64,
    ) -> Result<TranscriptionResult, SessionError> {
        self.calls.lock().unwrap().push(SubmittedRequest {
            container_len: container.len(),
            language: language.to_string(),
            duration_secs,
        });
        self.response.clone()
    }
}

/// Notifier that records callback order for assertions.
#[derive(Default)]
struct EventLog {
    events: std::sync::Mutex<Vec<String>>,
}

impl EventLog {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for EventLog {
    fn on_recording_start(&self) {
        self.events.lock().unwrap().push("start".to_string());
    }

    fn on_recording_stop(&self) {
        self.events.lock().unwrap().push("stop".to_string());
    }

    fn on_transcription_received(&self, result: &TranscriptionResult) {
        self.events
            .lock()
            .unwrap()
            .push(format!("result:{}", result.confidence));
    }

    fn on_error(&self, message: &str) {
        self.events.lock().unwrap().push(format!("error:{message}"));
    }
}

fn policy(min: Duration, max: Duration) -> SessionPolicy {
    SessionPolicy {
        min_duration: min,
        max_duration: max,
        ..SessionPolicy::default()
    }
}

async fn wait_for_samples<S, C>(session: &RecordingSession<S, C>, count: usize)
where
    S: FrameSource + 'static,
    C: TranscriptionClient + 'static,
{
    for _ in 0..200 {
        if session.buffered_samples().await >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("samples never arrived");
}

#[tokio::test]
async fn test_start_transitions_to_recording() {
    let (source, handle) = scripted_source();
    let (client, _) = FakeClient::succeeding(0.9);
    let notifier = Arc::new(EventLog::default());
    let session = RecordingSession::new(
        source,
        client,
        notifier.clone(),
        SessionPolicy::default(),
        "zh-HK",
    );

    session.start().await.unwrap();

    assert_eq!(session.state().await, SessionState::Recording);
    assert_eq!(handle.opens(), 1);
    assert_eq!(notifier.events(), vec!["start"]);

    session.stop().await.unwrap();
    session.join().await;
}

#[tokio::test]
async fn test_second_start_is_rejected_and_buffer_unchanged() {
    let (source, handle) = scripted_source();
    let (client, _) = FakeClient::succeeding(0.9);
    let session = RecordingSession::new(
        source,
        client,
        Arc::new(NullNotifier),
        SessionPolicy::default(),
        "zh-HK",
    );

    session.start().await.unwrap();
    handle.push(vec![0.25; BLOCK_SIZE]);
    wait_for_samples(&session, BLOCK_SIZE).await;

    let result = session.start().await;

    assert!(matches!(result, Err(SessionError::AlreadyRecording)));
    assert_eq!(session.state().await, SessionState::Recording);
    assert_eq!(session.buffered_samples().await, BLOCK_SIZE);
    assert_eq!(handle.opens(), 1);

    session.stop().await.unwrap();
    session.join().await;
}

#[tokio::test]
async fn test_concurrent_starts_yield_one_recording() {
    let (source, handle) = scripted_source();
    let (client, _) = FakeClient::succeeding(0.9);
    let session = Arc::new(RecordingSession::new(
        source,
        client,
        Arc::new(NullNotifier),
        SessionPolicy::default(),
        "zh-HK",
    ));

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };
    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();

    assert_eq!(successes, 1);
    assert_eq!(handle.opens(), 1);
    assert_eq!(session.state().await, SessionState::Recording);

    session.stop().await.unwrap();
    session.join().await;
}

#[tokio::test]
async fn test_short_recording_is_discarded_without_submission() {
    let (source, handle) = scripted_source();
    let (client, calls) = FakeClient::succeeding(0.9);
    let notifier = Arc::new(EventLog::default());
    let session = RecordingSession::new(
        source,
        client,
        notifier.clone(),
        policy(Duration::from_secs(5), Duration::from_secs(60)),
        "zh-HK",
    );

    session.start().await.unwrap();
    handle.push(vec![0.1; BLOCK_SIZE]);
    wait_for_samples(&session, BLOCK_SIZE).await;
    session.stop().await.unwrap();
    session.join().await;

    assert_eq!(session.state().await, SessionState::Idle);
    assert_eq!(session.buffered_samples().await, 0);
    assert!(calls.lock().unwrap().is_empty(), "client must not be called");
    assert!(matches!(
        session.last_error(),
        Some(SessionError::DurationTooShort { .. })
    ));

    let events = notifier.events();
    assert_eq!(events[0], "start");
    assert_eq!(events[1], "stop");
    assert!(events[2].starts_with("error:"));
    assert_eq!(handle.closes(), 1);
}

#[tokio::test]
async fn test_full_cycle_submits_container_and_delivers_result() {
    let (source, handle) = scripted_source();
    let (client, calls) = FakeClient::succeeding(0.92);
    let notifier = Arc::new(EventLog::default());
    let session = RecordingSession::new(
        source,
        client,
        notifier.clone(),
        policy(Duration::ZERO, Duration::from_secs(60)),
        "zh-HK",
    );

    session.start().await.unwrap();
    handle.push(vec![0.0; BLOCK_SIZE]);
    handle.push(vec![0.5; BLOCK_SIZE]);
    wait_for_samples(&session, BLOCK_SIZE * 2).await;
    session.stop().await.unwrap();
    session.join().await;

    assert_eq!(session.state().await, SessionState::Idle);
    assert!(session.last_error().is_none());

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].container_len, HEADER_LEN + 2 * BLOCK_SIZE * 2);
    assert_eq!(calls[0].language, "zh-HK");
    assert!(calls[0].duration_secs >= 0.0);

    assert_eq!(notifier.events(), vec!["start", "stop", "result:0.92"]);
}

#[tokio::test]
async fn test_low_confidence_result_is_still_delivered() {
    let (source, handle) = scripted_source();
    let (client, _) = FakeClient::succeeding(0.6);
    let notifier = Arc::new(EventLog::default());
    let session = RecordingSession::new(
        source,
        client,
        notifier.clone(),
        policy(Duration::ZERO, Duration::from_secs(60)),
        "zh-HK",
    );

    session.start().await.unwrap();
    handle.push(vec![0.1; BLOCK_SIZE]);
    wait_for_samples(&session, BLOCK_SIZE).await;
    session.stop().await.unwrap();
    session.join().await;

    // Confidence passes through unmodified; thresholds are the
    // collaborator's concern.
    assert_eq!(notifier.events(), vec!["start", "stop", "result:0.6"]);
}

#[tokio::test]
async fn test_watchdog_stops_recording_automatically() {
    let (source, handle) = scripted_source();
    let (client, calls) = FakeClient::succeeding(0.9);
    let notifier = Arc::new(EventLog::default());
    let session = RecordingSession::new(
        source,
        client,
        notifier.clone(),
        policy(Duration::ZERO, Duration::from_millis(150)),
        "zh-HK",
    );

    let begun = Instant::now();
    session.start().await.unwrap();
    handle.push(vec![0.1; BLOCK_SIZE]);

    // No manual stop(): the watchdog must fire on its own.
    session.join().await;
    let elapsed = begun.elapsed();

    assert!(elapsed >= Duration::from_millis(150), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "fired late: {elapsed:?}");
    assert_eq!(session.state().await, SessionState::Idle);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert!(notifier.events().contains(&"stop".to_string()));
    assert_eq!(handle.closes(), 1);
}

#[tokio::test]
async fn test_submission_failure_resets_to_idle() {
    let (source, handle) = scripted_source();
    let (client, _) = FakeClient::failing(SessionError::Network("connection refused".to_string()));
    let notifier = Arc::new(EventLog::default());
    let session = RecordingSession::new(
        source,
        client,
        notifier.clone(),
        policy(Duration::ZERO, Duration::from_secs(60)),
        "zh-HK",
    );

    session.start().await.unwrap();
    handle.push(vec![0.1; BLOCK_SIZE]);
    wait_for_samples(&session, BLOCK_SIZE).await;
    session.stop().await.unwrap();
    session.join().await;

    assert_eq!(session.state().await, SessionState::Idle);
    assert!(matches!(
        session.last_error(),
        Some(SessionError::Network(_))
    ));
    assert!(
        notifier
            .events()
            .iter()
            .any(|e| e.starts_with("error:network error")),
        "events: {:?}",
        notifier.events()
    );

    // A fresh attempt must be possible after the failure.
    session.start().await.unwrap();
    assert_eq!(session.state().await, SessionState::Recording);
    session.stop().await.unwrap();
    session.join().await;
}

#[tokio::test]
async fn test_oversized_payload_is_discarded() {
    let (source, handle) = scripted_source();
    let (client, calls) = FakeClient::succeeding(0.9);
    let session = RecordingSession::new(
        source,
        client,
        Arc::new(NullNotifier),
        SessionPolicy {
            min_duration: Duration::ZERO,
            max_duration: Duration::from_secs(60),
            max_payload_bytes: 1024,
        },
        "zh-HK",
    );

    session.start().await.unwrap();
    handle.push(vec![0.1; BLOCK_SIZE]);
    wait_for_samples(&session, BLOCK_SIZE).await;
    session.stop().await.unwrap();
    session.join().await;

    assert_eq!(session.state().await, SessionState::Idle);
    assert!(calls.lock().unwrap().is_empty());
    assert!(matches!(
        session.last_error(),
        Some(SessionError::PayloadTooLarge { .. })
    ));
}

#[tokio::test]
async fn test_permission_error_keeps_session_idle() {
    let (client, calls) = FakeClient::succeeding(0.9);
    let notifier = Arc::new(EventLog::default());
    let session = RecordingSession::new(
        DeniedSource,
        client,
        notifier.clone(),
        SessionPolicy::default(),
        "zh-HK",
    );

    let result = session.start().await;

    assert!(matches!(result, Err(SessionError::Permission(_))));
    assert_eq!(session.state().await, SessionState::Idle);
    assert!(calls.lock().unwrap().is_empty());
    assert!(
        notifier
            .events()
            .iter()
            .any(|e| e.starts_with("error:microphone"))
    );
}

#[tokio::test]
async fn test_stop_when_idle_is_a_noop() {
    let (source, handle) = scripted_source();
    let (client, _) = FakeClient::succeeding(0.9);
    let session = RecordingSession::new(
        source,
        client,
        Arc::new(NullNotifier),
        SessionPolicy::default(),
        "zh-HK",
    );

    session.stop().await.unwrap();

    assert_eq!(session.state().await, SessionState::Idle);
    assert_eq!(handle.opens(), 0);
    assert_eq!(handle.closes(), 0);
}

#[tokio::test]
async fn test_source_reopens_across_attempts() {
    let (source, handle) = scripted_source();
    let (client, _) = FakeClient::succeeding(0.9);
    let session = RecordingSession::new(
        source,
        client,
        Arc::new(NullNotifier),
        policy(Duration::ZERO, Duration::from_secs(60)),
        "zh-HK",
    );

    for attempt in 1..=2 {
        session.start().await.unwrap();
        handle.push(vec![0.1; BLOCK_SIZE]);
        wait_for_samples(&session, BLOCK_SIZE).await;
        session.stop().await.unwrap();
        session.join().await;

        assert_eq!(session.state().await, SessionState::Idle);
        assert_eq!(handle.opens(), attempt);
        assert_eq!(handle.closes(), attempt);
    }
}
