//! Echo suppression for in-flight local writes.
//!
//! Before a local mutation issues a remote update, the card id is marked here.
//! While marked, inbound update events for that id are dropped: the store
//! fans our own writes back to us, and reprocessing them would re-home the
//! card mid-gesture. The marker is released a fixed delay after the write
//! completes; the delay must outlast the store's change-event round trip.
//! Best-effort race suppression, not a correctness guarantee.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use shared::domain::CardId;

/// How long a marker outlives its write's completion.
pub const ECHO_SUPPRESS_WINDOW: Duration = Duration::from_secs(1);

/// Safety-net expiry for markers whose write never completes (hung call,
/// dropped task). Markers are normally released explicitly.
const MARKER_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct PendingWrites {
    marked: HashMap<CardId, Instant>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an id before issuing its remote write. Re-marking refreshes the
    /// TTL, which is what an overlapping second write wants.
    pub fn mark(&mut self, id: CardId) {
        self.marked.insert(id, Instant::now());
    }

    /// True while update events for this id should be treated as our own echo.
    pub fn suppresses(&mut self, id: CardId) -> bool {
        self.sweep_expired();
        self.marked.contains_key(&id)
    }

    pub fn release(&mut self, id: CardId) {
        self.marked.remove(&id);
    }

    fn sweep_expired(&mut self) {
        let now = Instant::now();
        self.marked
            .retain(|_, marked_at| now.duration_since(*marked_at) < MARKER_TTL);
    }
}
