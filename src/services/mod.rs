//! External service contracts
//!
//! The pipeline talks to its collaborators - screen capture, speech
//! recognition, AI analysis, and spoken output - through these traits.
//! The concrete engines behind them (capture backends, ASR models, LLMs,
//! TTS voices) live outside this crate.

pub mod analysis;
pub mod recognition;
pub mod speech;

use crate::capture::Screenshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use analysis::ChatAnalysisClient;
pub use recognition::OneSentenceAsrClient;
pub use speech::{SpeechQueue, SpeechSink};

/// Errors surfaced by the external services
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ServiceError {
    /// Whether the error is a configuration problem rather than a runtime
    /// service failure
    pub fn is_configuration(&self) -> bool {
        matches!(self, ServiceError::MissingCredentials(_))
    }
}

/// Best-effort screen capture tied to speech boundaries
///
/// Both calls may legitimately return `None`; the pipeline degrades rather
/// than fails on a miss.
#[async_trait]
pub trait ScreenshotService: Send + Sync {
    /// Capture issued when a speech segment opens
    async fn capture_before(&self) -> Option<Screenshot>;

    /// Capture issued when a speech segment closes
    async fn capture_after(&self) -> Option<Screenshot>;
}

/// Speech-to-text over a finished PCM segment
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// Verify the service is configured, without touching the network
    ///
    /// Checked eagerly before a recognize→analyze chain acquires its lock,
    /// so missing credentials surface immediately.
    fn ensure_ready(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Recognize 16-bit little-endian mono PCM into text
    async fn recognize(&self, pcm: &[u8], sample_rate: u32) -> Result<String, ServiceError>;
}

/// The correlated evidence sent for AI analysis
///
/// Screenshot fields hold base64 image data and may be empty strings when
/// the corresponding capture missed - deliberate degrade-not-fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Recognized player speech
    pub speech_text: String,
    /// Screen state when speech started, base64 (possibly empty)
    pub screenshot_before: String,
    /// Screen state when speech ended, base64 (possibly empty)
    pub screenshot_after: String,
}

/// Multimodal AI analysis of a speech/screen bundle
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Analyze the bundle and return the AI's free-text reply
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ServiceError>;
}

/// Fire-and-forget spoken output
pub trait SpeechService: Send + Sync {
    /// Queue text for playback; `interrupt` stops any current utterance first
    fn speak(&self, text: &str, interrupt: bool);
}

/// The bundle of collaborators one listening session runs against
#[derive(Clone)]
pub struct Services {
    pub screenshots: Arc<dyn ScreenshotService>,
    pub recognition: Arc<dyn RecognitionService>,
    pub analysis: Arc<dyn AnalysisService>,
    /// Spoken playback is optional; `None` disables it
    pub speech: Option<Arc<dyn SpeechService>>,
}
