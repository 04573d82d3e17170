//! GameSage core - the perception-to-response pipeline of an AI game
//! companion.
//!
//! Listens to the player's microphone, correlates detected speech with
//! before/after screen captures, runs a recognize→analyze chain against
//! external services, and propagates progress and replies as idempotent
//! events to the application's independently-lived window surfaces.
//!
//! The surrounding application (game library, settings UI, wiki search)
//! and the concrete capture/ASR/LLM/TTS engines live outside this crate;
//! they plug in through the traits in [`services`].

pub mod bus;
pub mod cadence;
pub mod capture;
pub mod config;
pub mod conversation;
pub mod listener;
pub mod pipeline;
pub mod services;
pub mod session;
pub mod simulation;
pub mod sync;

pub use bus::{topics, DedupWindow, EventBus, EventEnvelope, RegistrationGuard};
pub use cadence::{CaptureStrategy, ControlDirective};
pub use capture::{CaptureCorrelator, CaptureSession, Screenshot};
pub use conversation::{ConversationMessage, Role};
pub use listener::{AudioFeed, Listener, ListenerConfig, ListenerState, SpeechSegment};
pub use pipeline::{Orchestrator, SubmitOutcome};
pub use services::{
    AnalysisRequest, AnalysisService, RecognitionService, ScreenshotService, ServiceError,
    Services, SpeechService,
};
pub use session::{SessionConfig, SessionManager};
pub use simulation::{StageEvent, StageEventKind};
pub use sync::{WindowProjection, WindowSyncFacade};

/// Initialise tracing output for binaries and tests
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once;
/// later calls are no-ops.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
