//! Recognition-analysis orchestration
//!
//! Turns a finished speech segment plus its capture session into a
//! conversation reply: recognize the PCM, send the text and screenshots for
//! AI analysis, emit the reply, and fold the reply's control block into the
//! capture strategy.
//!
//! Only one recognize→analyze chain runs at a time. The lock is a plain
//! boolean, not a queue: a segment submitted while a chain is in flight is
//! dropped, because replaying a stale utterance seconds later is worse than
//! losing it. The lock is scoped to one listening session.

use crate::bus::{topics, EventBus};
use crate::cadence::{self, CaptureStrategy};
use crate::capture::CaptureSession;
use crate::conversation::ConversationMessage;
use crate::listener::vad::SpeechSegment;
use crate::services::{AnalysisRequest, Services};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Terminal result of a `submit` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Full chain ran and a reply was emitted
    Completed,
    /// Another chain was in flight; the segment was dropped
    Dropped,
    /// Recognition credentials are missing; the lock was never acquired
    NotConfigured,
    /// The recognition call failed
    RecognitionFailed,
    /// Recognition succeeded but produced no text
    NothingRecognized,
    /// The analysis call failed; a diagnostic message was emitted
    AnalysisFailed,
}

/// RAII guard that releases the in-flight lock on every terminal path,
/// including panics inside a chain.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives the recognize→analyze chain for one listening session
pub struct Orchestrator {
    services: Services,
    bus: EventBus,
    strategy: Arc<RwLock<CaptureStrategy>>,
    in_flight: AtomicBool,
    speak_replies: bool,
    interrupt_previous: bool,
}

impl Orchestrator {
    pub fn new(
        services: Services,
        bus: EventBus,
        strategy: Arc<RwLock<CaptureStrategy>>,
        speak_replies: bool,
        interrupt_previous: bool,
    ) -> Self {
        Self {
            services,
            bus,
            strategy,
            in_flight: AtomicBool::new(false),
            speak_replies,
            interrupt_previous,
        }
    }

    /// Whether a chain is currently running
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run the recognize→analyze chain for one segment
    ///
    /// A concurrent call while a chain is in flight is a silent no-op - the
    /// segment is dropped as intentional backpressure, not an error.
    pub async fn submit(
        &self,
        segment: SpeechSegment,
        session: CaptureSession,
    ) -> SubmitOutcome {
        // Credentials are checked before the lock so a misconfigured setup
        // surfaces immediately instead of tying up the chain.
        if let Err(e) = self.services.recognition.ensure_ready() {
            tracing::error!("Orchestrator: recognition not configured: {}", e);
            self.bus
                .publish(topics::VOICE_ERROR, json!({ "message": e.to_string() }));
            return SubmitOutcome::NotConfigured;
        }

        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!("Orchestrator: chain in flight, dropping segment");
            return SubmitOutcome::Dropped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        self.bus.publish(
            topics::AI_THINKING,
            json!({ "durationSeconds": segment.duration_seconds }),
        );

        let text = match self
            .services
            .recognition
            .recognize(&segment.pcm, segment.sample_rate)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Orchestrator: recognition failed: {}", e);
                self.bus
                    .publish(topics::VOICE_ERROR, json!({ "message": e.to_string() }));
                return SubmitOutcome::RecognitionFailed;
            }
        };

        if text.trim().is_empty() {
            tracing::debug!("Orchestrator: nothing recognized, skipping analysis");
            return SubmitOutcome::NothingRecognized;
        }

        tracing::info!("Orchestrator: recognized \"{}\"", text);

        // Missing captures degrade to empty strings rather than aborting
        let encode = |shot: Option<crate::capture::Screenshot>| {
            shot.map(|s| BASE64.encode(&s.data)).unwrap_or_default()
        };
        let request = AnalysisRequest {
            speech_text: text,
            screenshot_before: encode(session.before),
            screenshot_after: encode(session.after),
        };

        match self.services.analysis.analyze(&request).await {
            Ok(reply) => {
                let parsed = cadence::parse_reply(&reply);
                cadence::apply(&parsed.directive, &mut self.strategy.write());

                let message = ConversationMessage::assistant(parsed.display_text.clone());
                self.publish_message(&message);

                if self.speak_replies {
                    if let Some(speech) = &self.services.speech {
                        speech.speak(&parsed.display_text, self.interrupt_previous);
                    }
                }

                SubmitOutcome::Completed
            }
            Err(e) => {
                tracing::warn!("Orchestrator: analysis failed: {}", e);
                // The user always sees something - a silent drop would look
                // like the companion ignored them.
                let message = ConversationMessage::assistant(format!(
                    "I couldn't analyze that ({}). I'm still listening.",
                    e
                ));
                self.publish_message(&message);
                SubmitOutcome::AnalysisFailed
            }
        }
    }

    fn publish_message(&self, message: &ConversationMessage) {
        let payload = serde_json::to_value(message).expect("message serializes");
        self.bus.publish(topics::AI_RESPONSE_READY, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventEnvelope;
    use crate::capture::Screenshot;
    use crate::services::{
        AnalysisService, RecognitionService, ScreenshotService, ServiceError, SpeechService,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct NoShots;

    #[async_trait]
    impl ScreenshotService for NoShots {
        async fn capture_before(&self) -> Option<Screenshot> {
            None
        }
        async fn capture_after(&self) -> Option<Screenshot> {
            None
        }
    }

    struct MockRecognition {
        result: Result<String, ServiceError>,
        delay: Option<Duration>,
        configured: bool,
        calls: AtomicUsize,
    }

    impl MockRecognition {
        fn ok(text: &str) -> Self {
            Self {
                result: Ok(text.to_string()),
                delay: None,
                configured: true,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                result: Err(ServiceError::Transport("connection refused".to_string())),
                delay: None,
                configured: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RecognitionService for MockRecognition {
        fn ensure_ready(&self) -> Result<(), ServiceError> {
            if self.configured {
                Ok(())
            } else {
                Err(ServiceError::MissingCredentials("asr token".to_string()))
            }
        }

        async fn recognize(&self, _pcm: &[u8], _rate: u32) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    struct MockAnalysis {
        result: Result<String, ServiceError>,
        requests: Mutex<Vec<AnalysisRequest>>,
    }

    impl MockAnalysis {
        fn ok(reply: &str) -> Self {
            Self {
                result: Ok(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                result: Err(ServiceError::Api {
                    status: 429,
                    message: "quota exceeded".to_string(),
                }),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AnalysisService for MockAnalysis {
        async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ServiceError> {
            self.requests.lock().push(request.clone());
            self.result.clone()
        }
    }

    #[derive(Default)]
    struct RecordingSpeech {
        spoken: Mutex<Vec<(String, bool)>>,
    }

    impl SpeechService for RecordingSpeech {
        fn speak(&self, text: &str, interrupt: bool) {
            self.spoken.lock().push((text.to_string(), interrupt));
        }
    }

    fn collect(bus: &EventBus, topic: &str) -> Arc<Mutex<Vec<EventEnvelope>>> {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        // Dropping the subscription handle leaves the handler registered.
        let _sub = bus.subscribe(topic, move |env| sink.lock().push(env.clone()));
        collected
    }

    fn segment() -> SpeechSegment {
        SpeechSegment {
            pcm: vec![0u8; 3200],
            sample_rate: 16_000,
            duration_seconds: 0.5,
        }
    }

    fn session_with(before: Option<&[u8]>, after: Option<&[u8]>) -> CaptureSession {
        let shot = |data: &[u8]| Screenshot {
            data: data.to_vec(),
            width: 640,
            height: 480,
            timestamp: 0,
        };
        CaptureSession {
            before: before.map(shot),
            after: after.map(shot),
            opened_at: chrono::Utc::now(),
        }
    }

    fn orchestrator(
        recognition: MockRecognition,
        analysis: MockAnalysis,
        bus: EventBus,
    ) -> (Arc<Orchestrator>, Arc<MockRecognition>, Arc<MockAnalysis>) {
        let recognition = Arc::new(recognition);
        let analysis = Arc::new(analysis);
        let services = Services {
            screenshots: Arc::new(NoShots),
            recognition: recognition.clone(),
            analysis: analysis.clone(),
            speech: None,
        };
        let strategy = Arc::new(RwLock::new(CaptureStrategy::default()));
        (
            Arc::new(Orchestrator::new(services, bus, strategy, false, true)),
            recognition,
            analysis,
        )
    }

    #[tokio::test]
    async fn test_full_chain_emits_reply_and_applies_cadence() {
        let bus = EventBus::new();
        let thinking = collect(&bus, topics::AI_THINKING);
        let replies = collect(&bus, topics::AI_RESPONSE_READY);

        let recognition = MockRecognition::ok("watch out behind you");
        let analysis =
            MockAnalysis::ok("On it! ```json\n{\"active\":true,\"now\":true,\"suggested_interval\":2}\n```");

        let services = Services {
            screenshots: Arc::new(NoShots),
            recognition: Arc::new(recognition),
            analysis: Arc::new(analysis),
            speech: None,
        };
        let strategy = Arc::new(RwLock::new(CaptureStrategy::default()));
        let orchestrator =
            Orchestrator::new(services, bus.clone(), strategy.clone(), false, true);

        let outcome = orchestrator
            .submit(
                segment(),
                session_with(Some(b"ABC".as_slice()), Some(b"DEF".as_slice())),
            )
            .await;

        assert_eq!(outcome, SubmitOutcome::Completed);
        assert_eq!(thinking.lock().len(), 1);

        let replies = replies.lock();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].payload["content"], "On it!");
        assert_eq!(replies[0].payload["role"], "assistant");

        let strategy = strategy.read();
        assert!(strategy.is_active);
        assert!(strategy.need_immediate_capture);
        assert_eq!(strategy.active_interval_seconds, 2.0);

        assert!(!orchestrator.is_in_flight());
    }

    #[tokio::test]
    async fn test_screenshots_flow_into_request_with_empty_fallback() {
        let bus = EventBus::new();
        let (orchestrator, _, analysis) =
            orchestrator(MockRecognition::ok("hello"), MockAnalysis::ok("hi"), bus);

        orchestrator
            .submit(segment(), session_with(None, Some(b"DEF".as_slice())))
            .await;

        let requests = analysis.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].speech_text, "hello");
        assert_eq!(requests[0].screenshot_before, "");
        // Raw PNG bytes are base64-encoded at the analysis boundary
        assert_eq!(requests[0].screenshot_after, "REVG");
    }

    #[tokio::test]
    async fn test_overlapping_submits_run_exactly_one_chain() {
        let bus = EventBus::new();
        let recognition = MockRecognition {
            delay: Some(Duration::from_millis(100)),
            ..MockRecognition::ok("only once")
        };
        let (orchestrator, recognition, _) =
            orchestrator(recognition, MockAnalysis::ok("reply"), bus);

        let first = orchestrator.clone();
        let second = orchestrator.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move {
                first.submit(segment(), session_with(None, None)).await
            }),
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                second.submit(segment(), session_with(None, None)).await
            }),
        );

        let outcomes = [a.unwrap(), b.unwrap()];
        assert!(outcomes.contains(&SubmitOutcome::Completed));
        assert!(outcomes.contains(&SubmitOutcome::Dropped));
        assert_eq!(recognition.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recognition_failure_emits_voice_error_and_releases_lock() {
        let bus = EventBus::new();
        let errors = collect(&bus, topics::VOICE_ERROR);
        let replies = collect(&bus, topics::AI_RESPONSE_READY);

        let (orchestrator, _, analysis) =
            orchestrator(MockRecognition::failing(), MockAnalysis::ok("unused"), bus);

        let outcome = orchestrator
            .submit(segment(), session_with(None, None))
            .await;

        assert_eq!(outcome, SubmitOutcome::RecognitionFailed);
        assert_eq!(errors.lock().len(), 1);
        assert!(replies.lock().is_empty());
        assert!(analysis.requests.lock().is_empty());
        assert!(!orchestrator.is_in_flight());
    }

    #[tokio::test]
    async fn test_missing_credentials_abort_before_lock() {
        let bus = EventBus::new();
        let errors = collect(&bus, topics::VOICE_ERROR);

        let recognition = MockRecognition {
            configured: false,
            ..MockRecognition::ok("unused")
        };
        let (orchestrator, recognition, _) =
            orchestrator(recognition, MockAnalysis::ok("unused"), bus);

        let outcome = orchestrator
            .submit(segment(), session_with(None, None))
            .await;

        assert_eq!(outcome, SubmitOutcome::NotConfigured);
        assert_eq!(recognition.calls.load(Ordering::SeqCst), 0);
        assert!(!orchestrator.is_in_flight());
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].payload["message"]
            .as_str()
            .unwrap()
            .contains("missing credentials"));
    }

    #[tokio::test]
    async fn test_analysis_failure_emits_diagnostic_message() {
        let bus = EventBus::new();
        let replies = collect(&bus, topics::AI_RESPONSE_READY);

        let (orchestrator, _, _) =
            orchestrator(MockRecognition::ok("hello"), MockAnalysis::failing(), bus);

        let outcome = orchestrator
            .submit(segment(), session_with(None, None))
            .await;

        assert_eq!(outcome, SubmitOutcome::AnalysisFailed);
        let replies = replies.lock();
        assert_eq!(replies.len(), 1);
        let content = replies[0].payload["content"].as_str().unwrap();
        assert!(content.contains("couldn't analyze"));
        assert!(content.contains("quota exceeded"));
        assert!(!orchestrator.is_in_flight());
    }

    #[tokio::test]
    async fn test_empty_recognition_skips_analysis_silently() {
        let bus = EventBus::new();
        let replies = collect(&bus, topics::AI_RESPONSE_READY);
        let errors = collect(&bus, topics::VOICE_ERROR);

        let (orchestrator, _, analysis) =
            orchestrator(MockRecognition::ok("   "), MockAnalysis::ok("unused"), bus);

        let outcome = orchestrator
            .submit(segment(), session_with(None, None))
            .await;

        assert_eq!(outcome, SubmitOutcome::NothingRecognized);
        assert!(analysis.requests.lock().is_empty());
        assert!(replies.lock().is_empty());
        assert!(errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_replies_are_spoken_without_control_block() {
        let bus = EventBus::new();
        let speech = Arc::new(RecordingSpeech::default());
        let services = Services {
            screenshots: Arc::new(NoShots),
            recognition: Arc::new(MockRecognition::ok("hello")),
            analysis: Arc::new(MockAnalysis::ok(
                "Nice move! ```json\n{\"active\":false}\n```",
            )),
            speech: Some(speech.clone()),
        };
        let strategy = Arc::new(RwLock::new(CaptureStrategy::default()));
        let orchestrator = Orchestrator::new(services, bus, strategy, true, true);

        orchestrator
            .submit(segment(), session_with(None, None))
            .await;

        let spoken = speech.spoken.lock();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0], ("Nice move!".to_string(), true));
    }
}
