//! Queued spoken output
//!
//! `speak` must never block the pipeline, so playback requests go through
//! an unbounded channel consumed by a background task. The actual voice
//! engine sits behind [`SpeechSink`]; playback failures are logged and
//! dropped.

use super::SpeechService;
use tokio::sync::mpsc;

/// Low-level synthesis engine behind the queue
pub trait SpeechSink: Send + 'static {
    /// Start speaking the text
    fn speak(&mut self, text: &str) -> anyhow::Result<()>;

    /// Stop the current utterance
    fn stop(&mut self) -> anyhow::Result<()>;
}

struct SpeakRequest {
    text: String,
    interrupt: bool,
}

/// Fire-and-forget playback queue
#[derive(Clone)]
pub struct SpeechQueue {
    tx: mpsc::UnboundedSender<SpeakRequest>,
}

impl SpeechQueue {
    /// Spawn the playback task around a sink
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut sink: impl SpeechSink) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SpeakRequest>();

        tokio::spawn(async move {
            tracing::debug!("Speech queue started");
            while let Some(request) = rx.recv().await {
                if request.interrupt {
                    if let Err(e) = sink.stop() {
                        tracing::warn!("Failed to stop current utterance: {}", e);
                    }
                }
                match sink.speak(&request.text) {
                    Ok(()) => tracing::debug!(
                        "Speaking {} characters",
                        request.text.len()
                    ),
                    Err(e) => tracing::error!("Playback failed: {}", e),
                }
            }
            tracing::debug!("Speech queue closed");
        });

        Self { tx }
    }
}

impl SpeechService for SpeechQueue {
    fn speak(&self, text: &str, interrupt: bool) {
        let request = SpeakRequest {
            text: text.to_string(),
            interrupt,
        };
        if self.tx.send(request).is_err() {
            tracing::warn!("Speech queue is closed, dropping utterance");
        }
    }
}
