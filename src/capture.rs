//! Screenshot correlation for speech segments
//!
//! Binds a "before" and an "after" screen capture to each speech segment so
//! the AI can see what changed while the player was talking. Captures are
//! best-effort: a miss leaves the slot empty and the pipeline degrades
//! rather than fails. Two consecutive segments with *both* slots empty are
//! treated as evidence that the capture subsystem itself is broken and
//! escalate into a session shutdown.

use crate::services::ScreenshotService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Escalate after this many consecutive both-missing sessions
pub const DEFAULT_ESCALATION_THRESHOLD: u32 = 2;

/// One screen capture as returned by the screenshot service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    /// Raw PNG bytes; base64-encoded at the analysis boundary
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Capture time in Unix seconds
    pub timestamp: u64,
}

/// The paired before/after capture context for one speech segment
///
/// Exactly one session is open at a time: opened on the Speaking
/// transition, closed on hand-off to the orchestrator or on failure.
/// Never persisted.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    /// Capture taken when speech started
    pub before: Option<Screenshot>,
    /// Capture taken when speech ended
    pub after: Option<Screenshot>,
    /// When the session was opened
    pub opened_at: DateTime<Utc>,
}

impl CaptureSession {
    fn open() -> Self {
        Self {
            before: None,
            after: None,
            opened_at: Utc::now(),
        }
    }

    /// Both captures missed
    pub fn is_blind(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }
}

/// Health verdict attached to a closing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureVerdict {
    /// Normal close; hand the session to the orchestrator
    Healthy,
    /// The blind-session threshold was reached; stop the listening session
    Escalate,
}

/// Correlates screen captures with speech segments
pub struct CaptureCorrelator {
    session: Option<CaptureSession>,
    consecutive_blind_sessions: u32,
    escalation_threshold: u32,
}

impl CaptureCorrelator {
    pub fn new(escalation_threshold: u32) -> Self {
        Self {
            session: None,
            consecutive_blind_sessions: 0,
            escalation_threshold: escalation_threshold.max(1),
        }
    }

    /// Open a session and request the "before" capture
    pub async fn on_speech_started(&mut self, shots: &dyn ScreenshotService) {
        if self.session.is_some() {
            tracing::warn!("Capture: replacing an unclosed session");
        }

        let mut session = CaptureSession::open();
        match shots.capture_before().await {
            Some(screenshot) => {
                tracing::debug!(
                    "Capture: before shot {}x{}",
                    screenshot.width,
                    screenshot.height
                );
                session.before = Some(screenshot);
            }
            None => tracing::warn!("Capture: before shot missed"),
        }
        self.session = Some(session);
    }

    /// Request the "after" capture and close the session
    ///
    /// Returns the closed session together with its health verdict, or
    /// `None` when no session was open (speech ended without a matching
    /// start, e.g. right after a restart).
    pub async fn on_speech_ended(
        &mut self,
        shots: &dyn ScreenshotService,
    ) -> Option<(CaptureSession, CaptureVerdict)> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => {
                tracing::warn!("Capture: speech ended with no open session");
                return None;
            }
        };

        match shots.capture_after().await {
            Some(screenshot) => {
                tracing::debug!(
                    "Capture: after shot {}x{}",
                    screenshot.width,
                    screenshot.height
                );
                session.after = Some(screenshot);
            }
            None => tracing::warn!("Capture: after shot missed"),
        }

        let verdict = if session.is_blind() {
            self.consecutive_blind_sessions += 1;
            tracing::warn!(
                "Capture: session closed blind ({}/{})",
                self.consecutive_blind_sessions,
                self.escalation_threshold
            );
            if self.consecutive_blind_sessions >= self.escalation_threshold {
                CaptureVerdict::Escalate
            } else {
                CaptureVerdict::Healthy
            }
        } else {
            self.consecutive_blind_sessions = 0;
            CaptureVerdict::Healthy
        };

        Some((session, verdict))
    }

    /// Drop an open session without a correlation verdict
    ///
    /// Used when a segment is discarded as noise or listening stops: no
    /// after-capture was attempted, so the blind-session counter is left
    /// untouched.
    pub fn discard_open_session(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("Capture: discarded open session");
        }
    }

    pub fn has_open_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn consecutive_blind_sessions(&self) -> u32 {
        self.consecutive_blind_sessions
    }
}
