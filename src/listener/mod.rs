//! Continuous microphone monitoring
//!
//! Polls an [`AudioFeed`] for PCM chunks, runs them through the
//! voice-activity detector, and forwards boundary events to the listening
//! session. The microphone itself lives behind the feed trait - production
//! wires a capture backend, tests script the chunks.

pub mod vad;

pub use vad::{
    ListenerConfig, ListenerState, SpeechSegment, VadError, VadEvent, VoiceActivityDetector,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Source of mono f32 PCM chunks
#[async_trait]
pub trait AudioFeed: Send + 'static {
    /// Await the next chunk; `None` means the feed is exhausted
    async fn next_chunk(&mut self) -> Option<Vec<f32>>;

    /// Sample rate of the chunks in Hz
    fn sample_rate(&self) -> u32;
}

/// Poll-able listener state exposed to the window surfaces
#[derive(Debug, Clone, Serialize)]
pub struct ListenerSnapshot {
    /// Current voice-activity state
    pub state: ListenerState,
    /// Whether the monitoring loop is running
    pub is_listening: bool,
    /// Length of the open segment in seconds
    pub recording_duration: f32,
    /// Accumulated samples in the open segment
    pub buffer_size: usize,
}

struct ListenerShared {
    detector: Mutex<VoiceActivityDetector>,
    listening: AtomicBool,
}

/// Cheap clone of the listener's shared state for use by other tasks
///
/// The session's event loop holds one so it can complete the Processing
/// cycle or halt monitoring without owning the [`Listener`] itself.
#[derive(Clone)]
pub struct ListenerControl {
    shared: Arc<ListenerShared>,
}

impl ListenerControl {
    /// Signal that the downstream chain for the last segment terminated
    pub fn finish_processing(&self) {
        self.shared.detector.lock().finish_processing();
    }

    /// Halt monitoring; the poll loop exits at its next iteration
    pub fn halt(&self) {
        self.shared.listening.store(false, Ordering::SeqCst);
        self.shared.detector.lock().reset();
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }
}

/// Handle to the monitoring loop of one listening session
pub struct Listener {
    shared: Arc<ListenerShared>,
    task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Start monitoring a feed, forwarding boundary events to `events`
    pub fn spawn(
        config: ListenerConfig,
        mut feed: impl AudioFeed,
        events: mpsc::UnboundedSender<VadEvent>,
    ) -> Result<Self, VadError> {
        let detector = VoiceActivityDetector::new(config, feed.sample_rate())?;
        let shared = Arc::new(ListenerShared {
            detector: Mutex::new(detector),
            listening: AtomicBool::new(true),
        });

        let loop_shared = shared.clone();
        let task = tokio::spawn(async move {
            while loop_shared.listening.load(Ordering::SeqCst) {
                let Some(chunk) = feed.next_chunk().await else {
                    break;
                };
                let event = loop_shared.detector.lock().process_chunk(&chunk);
                if let Some(event) = event {
                    if events.send(event).is_err() {
                        break;
                    }
                }
            }
            loop_shared.listening.store(false, Ordering::SeqCst);
            tracing::debug!("Listener loop ended");
        });

        tracing::info!("Listener started");
        Ok(Self {
            shared,
            task: Some(task),
        })
    }

    /// Halt monitoring and drop any open segment
    pub fn stop(&mut self) {
        self.shared.listening.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::info!("Listener stopped");
        }
        self.shared.detector.lock().reset();
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    /// Signal that the downstream chain for the last segment terminated
    pub fn finish_processing(&self) {
        self.shared.detector.lock().finish_processing();
    }

    /// Shared control handle for other tasks
    pub fn control(&self) -> ListenerControl {
        ListenerControl {
            shared: self.shared.clone(),
        }
    }

    /// Current poll-able state
    pub fn snapshot(&self) -> ListenerSnapshot {
        let detector = self.shared.detector.lock();
        ListenerSnapshot {
            state: detector.state(),
            is_listening: self.is_listening(),
            recording_duration: detector.recording_duration(),
            buffer_size: detector.buffer_size(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}
