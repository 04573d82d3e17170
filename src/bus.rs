//! In-process event bus with at-least-once topic delivery
//!
//! Window surfaces live in independent webviews and must converge without
//! shared memory, so every cross-window signal travels through here as a
//! named-topic event. Delivery to a single subscriber preserves publish
//! order; no order is guaranteed between subscribers. Subscribers that must
//! not process the same logical event twice deduplicate with [`DedupWindow`].

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Topic names exposed to the window surfaces
pub mod topics {
    /// Voice activity detected, a speech segment has opened
    pub const SPEECH_STARTED: &str = "speech_started";
    /// Speech segment closed; payload carries `durationSeconds`
    pub const SPEECH_ENDED: &str = "speech_ended";
    /// A recognize→analyze chain is in flight
    pub const AI_THINKING: &str = "ai_thinking";
    /// A new conversation message is ready; payload is the message
    pub const AI_RESPONSE_READY: &str = "ai_response_ready";
    /// Recognition failed; payload carries `message`
    pub const VOICE_ERROR: &str = "voice_error";
    /// An ambient or correlated screen capture was initiated
    pub const SCREENSHOT_STARTED: &str = "screenshot_started";
    /// Fatal capture escalation; the listening session has been stopped
    pub const CAPTURE_FAILURE: &str = "capture_failure";
    /// The active game selection changed; payload carries `gameId`
    pub const GAME_CHANGED: &str = "game-changed";
    /// A simulated-livestream viewer interaction occurred
    pub const SIMULATION_EVENT: &str = "simulation_event";
}

/// A published event as delivered to subscribers
///
/// `emitted_at_millis` doubles as the idempotency key for deduplicating
/// subscribers, so the bus guarantees it is unique per event.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Topic the event was published on
    pub topic: String,
    /// Opaque JSON payload
    pub payload: Value,
    /// Publish time in Unix milliseconds, unique per event
    pub emitted_at_millis: i64,
}

type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

struct SubscriberEntry {
    id: u64,
    handler: Handler,
}

struct BusInner {
    subscribers: Mutex<HashMap<String, Vec<SubscriberEntry>>>,
    next_id: AtomicU64,
    last_millis: AtomicI64,
}

/// Cheaply cloneable handle to the shared bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                last_millis: AtomicI64::new(0),
            }),
        }
    }

    /// Publish an event to every current subscriber of `topic`
    ///
    /// Fire-and-forget: handlers run synchronously on the publishing thread,
    /// outside the registry lock so a handler may itself publish or
    /// subscribe.
    pub fn publish(&self, topic: &str, payload: Value) {
        let envelope = EventEnvelope {
            topic: topic.to_string(),
            payload,
            emitted_at_millis: self.next_event_millis(),
        };

        let handlers: Vec<Handler> = {
            let subscribers = self.inner.subscribers.lock();
            match subscribers.get(topic) {
                Some(entries) => entries.iter().map(|e| e.handler.clone()).collect(),
                None => Vec::new(),
            }
        };

        tracing::trace!(
            "Bus: publishing '{}' to {} subscriber(s)",
            topic,
            handlers.len()
        );

        for handler in handlers {
            handler(&envelope);
        }
    }

    /// Register a handler for `topic`
    ///
    /// Returns a [`Subscription`] whose `unsubscribe` removes the handler.
    /// Dropping the subscription without unsubscribing leaves the handler
    /// registered for the lifetime of the bus.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = SubscriberEntry {
            id,
            handler: Arc::new(handler),
        };

        self.inner
            .subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(entry);

        Subscription {
            inner: Arc::downgrade(&self.inner),
            topic: topic.to_string(),
            id,
        }
    }

    /// Number of current subscribers for a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Current wall-clock millis, clamped monotonic so two events published
    /// in the same millisecond never share an idempotency key.
    fn next_event_millis(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.inner.last_millis.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.inner.last_millis.compare_exchange_weak(
                last,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}

/// Handle for removing a registered subscriber
pub struct Subscription {
    inner: Weak<BusInner>,
    topic: String,
    id: u64,
}

impl Subscription {
    /// Remove the handler from the bus
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut subscribers = inner.subscribers.lock();
            if let Some(entries) = subscribers.get_mut(&self.topic) {
                entries.retain(|e| e.id != self.id);
                if entries.is_empty() {
                    subscribers.remove(&self.topic);
                }
            }
        }
    }
}

/// Default dedup window bound
const DEDUP_CAPACITY: usize = 100;

/// Number of oldest entries evicted when the bound is reached
const DEDUP_EVICT_BATCH: usize = 50;

/// Bounded recent-event-id set for at-least-once consumers
///
/// Holds the last `capacity` observed idempotency keys; on reaching the
/// bound the oldest `evict_batch` are dropped in one sweep. The coarse
/// batch eviction reduces churn at negligible staleness cost and is
/// preserved from the source design.
pub struct DedupWindow {
    capacity: usize,
    evict_batch: usize,
    seen: HashSet<i64>,
    order: VecDeque<i64>,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupWindow {
    pub fn new() -> Self {
        Self::with_bounds(DEDUP_CAPACITY, DEDUP_EVICT_BATCH)
    }

    /// Create a window with a custom bound and eviction batch size
    pub fn with_bounds(capacity: usize, evict_batch: usize) -> Self {
        assert!(capacity > 0 && evict_batch > 0 && evict_batch <= capacity);
        Self {
            capacity,
            evict_batch,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record an idempotency key
    ///
    /// Returns `true` if the key has not been seen within the window (the
    /// caller should process the event), `false` for a replay.
    pub fn observe(&mut self, id: i64) -> bool {
        if self.seen.contains(&id) {
            return false;
        }

        if self.order.len() >= self.capacity {
            for _ in 0..self.evict_batch {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
            tracing::debug!(
                "Dedup window full, evicted {} oldest entries",
                self.evict_batch
            );
        }

        self.order.push_back(id);
        self.seen.insert(id);
        true
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Re-entrant subscription guard
///
/// The hosting window-lifecycle framework may re-invoke setup logic without
/// a matching teardown, so a subscriber records which topics it has already
/// registered for in the current component lifetime and refuses a second
/// registration.
#[derive(Default)]
pub struct RegistrationGuard {
    registered: Mutex<HashSet<String>>,
}

impl RegistrationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a topic registration
    ///
    /// Returns `true` the first time a topic is claimed, `false` on every
    /// repeat within this guard's lifetime.
    pub fn try_register(&self, topic: &str) -> bool {
        let fresh = self.registered.lock().insert(topic.to_string());
        if !fresh {
            tracing::warn!(
                "Refusing re-entrant subscription to '{}' (setup re-ran without teardown)",
                topic
            );
        }
        fresh
    }

    /// Whether a topic has already been claimed
    pub fn is_registered(&self, topic: &str) -> bool {
        self.registered.lock().contains(topic)
    }
}
