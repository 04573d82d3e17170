//! Cross-window state synchronization
//!
//! The main window, the always-on-top overlay, and the livestream view are
//! independently-lived surfaces with no shared memory. Shared state -
//! which game the conversation is scoped to, simulated viewer traffic -
//! converges through bus events plus a per-window read-only projection.

use crate::bus::{topics, DedupWindow, EventBus, EventEnvelope, RegistrationGuard};
use crate::simulation::StageEvent;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Facade through which windows mutate shared state
pub struct WindowSyncFacade {
    bus: EventBus,
    active_game: RwLock<Option<String>>,
    simulation_enabled: AtomicBool,
}

impl WindowSyncFacade {
    pub fn new(bus: EventBus) -> Arc<Self> {
        let facade = Arc::new(Self {
            bus: bus.clone(),
            active_game: RwLock::new(None),
            simulation_enabled: AtomicBool::new(true),
        });

        // A capture escalation stops the dependent simulation as well.
        let weak = Arc::downgrade(&facade);
        let _sub = bus.subscribe(topics::CAPTURE_FAILURE, move |_| {
            if let Some(facade) = weak.upgrade() {
                tracing::warn!("Sync: capture failure, disabling simulation broadcasts");
                facade.simulation_enabled.store(false, Ordering::SeqCst);
            }
        });

        facade
    }

    /// Switch the active game and propagate the change to every window
    pub fn game_changed(&self, game_id: &str) {
        tracing::info!("Sync: active game -> {}", game_id);
        *self.active_game.write() = Some(game_id.to_string());
        self.bus
            .publish(topics::GAME_CHANGED, json!({ "gameId": game_id }));
    }

    /// The facade's own view of the active game
    pub fn active_game(&self) -> Option<String> {
        self.active_game.read().clone()
    }

    /// Whether stage-event broadcasting is currently allowed
    pub fn simulation_enabled(&self) -> bool {
        self.simulation_enabled.load(Ordering::SeqCst)
    }

    /// Re-arm simulation broadcasting (user restarted the session)
    pub fn enable_simulation(&self) {
        self.simulation_enabled.store(true, Ordering::SeqCst);
    }

    /// Inject simulated viewer interactions into the conversation
    ///
    /// Each event becomes an ordinary conversation message with a synthetic
    /// viewer role and persona - dispatched directly, never through the
    /// recognition-analysis orchestrator - plus a `simulation_event` signal
    /// for the livestream view. Returns the number of events broadcast.
    pub fn broadcast_stage_events(&self, events: &[StageEvent]) -> usize {
        if !self.simulation_enabled() {
            tracing::warn!(
                "Sync: simulation disabled, dropping {} stage event(s)",
                events.len()
            );
            return 0;
        }

        for event in events {
            let message = event.to_message();
            let payload = serde_json::to_value(&message).expect("message serializes");
            self.bus.publish(topics::AI_RESPONSE_READY, payload);
            self.bus.publish(
                topics::SIMULATION_EVENT,
                json!({
                    "eventType": event.kind_name(),
                    "timestamp": event.timestamp,
                }),
            );
        }

        events.len()
    }
}

/// Read-only view of shared state held by one window surface
///
/// Converges on the facade's state purely through bus events. Deduplicates
/// with a bounded recent-id window because delivery is at-least-once, and
/// guards against the hosting window framework re-running subscription
/// setup without a matching teardown.
pub struct WindowProjection {
    name: String,
    active_game: RwLock<Option<String>>,
    dedup: Mutex<DedupWindow>,
    guard: RegistrationGuard,
    updates: AtomicUsize,
}

impl WindowProjection {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            active_game: RwLock::new(None),
            dedup: Mutex::new(DedupWindow::new()),
            guard: RegistrationGuard::new(),
            updates: AtomicUsize::new(0),
        })
    }

    /// Attach this projection to the bus
    ///
    /// Returns `false` (and registers nothing) when the projection is
    /// already attached - window setup logic may run twice.
    pub fn subscribe_game_changes(self: &Arc<Self>, bus: &EventBus) -> bool {
        if !self.guard.try_register(topics::GAME_CHANGED) {
            return false;
        }

        let weak = Arc::downgrade(self);
        let _sub = bus.subscribe(topics::GAME_CHANGED, move |envelope| {
            if let Some(projection) = weak.upgrade() {
                projection.apply_game_changed(envelope);
            }
        });

        tracing::debug!("Projection '{}' attached", self.name);
        true
    }

    /// Apply a `game-changed` envelope, once per idempotency key
    fn apply_game_changed(&self, envelope: &EventEnvelope) {
        if !self.dedup.lock().observe(envelope.emitted_at_millis) {
            tracing::debug!(
                "Projection '{}': duplicate event {}, skipping",
                self.name,
                envelope.emitted_at_millis
            );
            return;
        }

        if let Some(game_id) = envelope.payload["gameId"].as_str() {
            *self.active_game.write() = Some(game_id.to_string());
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// This window's view of the active game
    pub fn active_game(&self) -> Option<String> {
        self.active_game.read().clone()
    }

    /// Number of state updates actually applied (duplicates excluded)
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}
