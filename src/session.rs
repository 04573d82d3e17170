//! Listening session lifecycle
//!
//! A listening session is the unit everything else is scoped to: the
//! listener task, the capture correlator, the orchestrator's in-flight
//! lock, the capture strategy, and the failure counter are created on
//! `start_listening` and discarded on `stop_listening`. Nothing mutable
//! outlives a session boundary.

use crate::bus::{topics, EventBus};
use crate::cadence::CaptureStrategy;
use crate::capture::{CaptureCorrelator, CaptureVerdict};
use crate::config::AppSettings;
use crate::listener::{
    AudioFeed, Listener, ListenerConfig, ListenerControl, ListenerSnapshot, VadEvent,
};
use crate::pipeline::Orchestrator;
use crate::services::{ScreenshotService, Services};
use anyhow::{bail, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Scheduler poll granularity; bounds how late an immediate capture fires
const SCHEDULER_TICK: Duration = Duration::from_millis(200);

/// Configuration for one listening session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Voice-activity thresholds
    pub listener: ListenerConfig,
    /// Initial capture cadence
    pub strategy: CaptureStrategy,
    /// Consecutive blind sessions before forced shutdown
    pub escalation_threshold: u32,
    /// Whether AI replies are spoken aloud
    pub speak_replies: bool,
    /// Whether a new spoken reply interrupts the previous one
    pub interrupt_previous: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            strategy: CaptureStrategy::default(),
            escalation_threshold: crate::capture::DEFAULT_ESCALATION_THRESHOLD,
            speak_replies: false,
            interrupt_previous: true,
        }
    }
}

impl SessionConfig {
    /// Derive a session configuration from the persisted settings store
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            listener: settings.listener,
            strategy: CaptureStrategy {
                active_interval_seconds: settings.capture.active_interval_seconds,
                idle_interval_seconds: settings.capture.idle_interval_seconds,
                ..CaptureStrategy::default()
            },
            escalation_threshold: settings.capture.escalation_threshold,
            speak_replies: settings.speech.enabled,
            interrupt_previous: settings.speech.interrupt_previous,
        }
    }
}

struct ActiveSession {
    listener: Listener,
    event_task: JoinHandle<()>,
    scheduler_task: JoinHandle<()>,
    strategy: Arc<RwLock<CaptureStrategy>>,
    /// Set on stop or escalation; read by the scheduler and event loop
    stopped: Arc<AtomicBool>,
}

/// Owns the start/stop lifecycle of listening sessions
pub struct SessionManager {
    bus: EventBus,
    services: Services,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionManager {
    pub fn new(bus: EventBus, services: Services) -> Self {
        Self {
            bus,
            services,
            active: Mutex::new(None),
        }
    }

    /// Start a listening session over an audio feed
    ///
    /// Errors if a session is already running. Must be called from within
    /// the tokio runtime.
    pub fn start_listening(
        &self,
        config: SessionConfig,
        feed: impl AudioFeed,
    ) -> Result<()> {
        let mut active = self.active.lock();

        if let Some(session) = active.as_ref() {
            if !session.stopped.load(Ordering::SeqCst) {
                bail!("listening session already running");
            }
        }
        // Clean up a session that stopped itself (escalation)
        if let Some(mut old) = active.take() {
            old.listener.stop();
            old.event_task.abort();
            old.scheduler_task.abort();
        }

        let strategy = Arc::new(RwLock::new(config.strategy));
        let stopped = Arc::new(AtomicBool::new(false));
        let orchestrator = Arc::new(Orchestrator::new(
            self.services.clone(),
            self.bus.clone(),
            strategy.clone(),
            config.speak_replies,
            config.interrupt_previous,
        ));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let listener = Listener::spawn(config.listener, feed, event_tx)?;

        let event_task = tokio::spawn(run_event_loop(
            event_rx,
            EventLoopContext {
                bus: self.bus.clone(),
                screenshots: self.services.screenshots.clone(),
                orchestrator,
                listener: listener.control(),
                stopped: stopped.clone(),
                escalation_threshold: config.escalation_threshold,
            },
        ));

        let scheduler_task = tokio::spawn(run_capture_scheduler(
            self.bus.clone(),
            self.services.screenshots.clone(),
            strategy.clone(),
            stopped.clone(),
        ));

        *active = Some(ActiveSession {
            listener,
            event_task,
            scheduler_task,
            strategy,
            stopped,
        });

        tracing::info!("Listening session started");
        Ok(())
    }

    /// Stop the current session
    ///
    /// Clears any not-yet-consumed capture session, but deliberately does
    /// not abort an in-flight recognize→analyze chain - the user's last
    /// utterance still produces its reply.
    pub fn stop_listening(&self) {
        let mut active = self.active.lock();
        if let Some(mut session) = active.take() {
            session.stopped.store(true, Ordering::SeqCst);
            session.listener.stop();
            session.event_task.abort();
            session.scheduler_task.abort();
            tracing::info!("Listening session stopped");
        }
    }

    /// Whether a session is currently running
    pub fn is_listening(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|s| !s.stopped.load(Ordering::SeqCst) && s.listener.is_listening())
    }

    /// Poll-able listener state for the window surfaces
    pub fn snapshot(&self) -> Option<ListenerSnapshot> {
        self.active.lock().as_ref().map(|s| s.listener.snapshot())
    }

    /// Current capture strategy (for display/debugging)
    pub fn capture_strategy(&self) -> Option<CaptureStrategy> {
        self.active.lock().as_ref().map(|s| *s.strategy.read())
    }
}

struct EventLoopContext {
    bus: EventBus,
    screenshots: Arc<dyn ScreenshotService>,
    orchestrator: Arc<Orchestrator>,
    listener: ListenerControl,
    stopped: Arc<AtomicBool>,
    escalation_threshold: u32,
}

/// Reacts to listener boundary events for one session
///
/// The correlator lives here, so before/after captures are strictly ordered
/// and sessions are opened and closed by a single task. Submissions run in
/// their own task so the loop keeps draining events while a chain is in
/// flight.
async fn run_event_loop(
    mut events: mpsc::UnboundedReceiver<VadEvent>,
    ctx: EventLoopContext,
) {
    let mut correlator = CaptureCorrelator::new(ctx.escalation_threshold);

    while let Some(event) = events.recv().await {
        if ctx.stopped.load(Ordering::SeqCst) {
            break;
        }

        match event {
            VadEvent::SpeechStarted => {
                ctx.bus.publish(topics::SPEECH_STARTED, json!({}));
                ctx.bus.publish(
                    topics::SCREENSHOT_STARTED,
                    json!({ "reason": "speech_started" }),
                );
                correlator.on_speech_started(ctx.screenshots.as_ref()).await;
            }

            VadEvent::SpeechEnded { segment } => {
                ctx.bus.publish(
                    topics::SPEECH_ENDED,
                    json!({ "durationSeconds": segment.duration_seconds }),
                );
                ctx.bus.publish(
                    topics::SCREENSHOT_STARTED,
                    json!({ "reason": "speech_ended" }),
                );

                match correlator.on_speech_ended(ctx.screenshots.as_ref()).await {
                    Some((_session, CaptureVerdict::Escalate)) => {
                        tracing::error!(
                            "Capture subsystem failed {} consecutive times, stopping session",
                            ctx.escalation_threshold
                        );
                        ctx.stopped.store(true, Ordering::SeqCst);
                        ctx.listener.halt();
                        ctx.bus.publish(
                            topics::CAPTURE_FAILURE,
                            json!({
                                "message": "Screen capture is failing repeatedly; \
                                            listening has been stopped."
                            }),
                        );
                        break;
                    }
                    Some((session, CaptureVerdict::Healthy)) => {
                        let orchestrator = ctx.orchestrator.clone();
                        let listener = ctx.listener.clone();
                        tokio::spawn(async move {
                            let outcome = orchestrator.submit(segment, session).await;
                            tracing::debug!("Chain finished: {:?}", outcome);
                            listener.finish_processing();
                        });
                    }
                    None => ctx.listener.finish_processing(),
                }
            }

            VadEvent::SegmentDiscarded { duration_seconds } => {
                tracing::debug!(
                    "Segment discarded as noise ({:.2}s), clearing capture session",
                    duration_seconds
                );
                correlator.discard_open_session();
            }
        }
    }

    tracing::debug!("Session event loop ended");
}

/// Ambient capture ticks paced by the capture strategy
///
/// Sleeps in small steps so a freshly-set immediate-capture flag or a stop
/// signal is honored promptly rather than after a full interval.
async fn run_capture_scheduler(
    bus: EventBus,
    screenshots: Arc<dyn ScreenshotService>,
    strategy: Arc<RwLock<CaptureStrategy>>,
    stopped: Arc<AtomicBool>,
) {
    let mut elapsed = Duration::ZERO;

    loop {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(SCHEDULER_TICK).await;
        elapsed += SCHEDULER_TICK;

        let (interval, immediate) = {
            let mut strategy = strategy.write();
            let immediate = strategy.need_immediate_capture;
            if immediate {
                strategy.need_immediate_capture = false;
            }
            let seconds = if strategy.is_active {
                strategy.active_interval_seconds
            } else {
                strategy.idle_interval_seconds
            };
            let seconds = if seconds.is_finite() && seconds > 0.2 {
                seconds
            } else {
                0.2
            };
            (Duration::from_secs_f32(seconds), immediate)
        };

        if !immediate && elapsed < interval {
            continue;
        }
        elapsed = Duration::ZERO;

        let reason = if immediate { "immediate" } else { "interval" };
        bus.publish(topics::SCREENSHOT_STARTED, json!({ "reason": reason }));
        match screenshots.capture_before().await {
            Some(shot) => {
                tracing::debug!("Ambient capture {}x{}", shot.width, shot.height)
            }
            None => tracing::debug!("Ambient capture missed"),
        }
    }

    tracing::debug!("Capture scheduler ended");
}
