//! Diagnostic events for the brick catalog cache
//!
//! Components never print; they emit `CacheEvent`s through an `EventBus`
//! handed to them at construction (and log through `tracing`). Operators or
//! front ends subscribe to whatever they want to surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Cache diagnostic event
///
/// Serializable so it can be forwarded as JSON (e.g. to a log sink).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// A provider started fetching a record from its source
    FetchStarted {
        provider: String,
        id: i32,
        timestamp: DateTime<Utc>,
    },

    /// A provider stored a freshly fetched record
    FetchCompleted {
        provider: String,
        id: i32,
        /// Number of variations that made it into the record
        variations: usize,
        /// Number of variations that failed and were skipped
        failed_variations: usize,
        timestamp: DateTime<Utc>,
    },

    /// A fetch failed; the in-flight record was discarded
    FetchFailed {
        provider: String,
        id: i32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A retryable request failure; another attempt follows
    RetryScheduled {
        operation: String,
        attempt: u32,
        status: Option<u16>,
        timestamp: DateTime<Utc>,
    },

    /// Connection/session state was discarded and recreated
    SessionReset {
        operation: String,
        timestamp: DateTime<Utc>,
    },

    /// All attempts exhausted, cooling down before giving up
    CooldownStarted {
        operation: String,
        cooldown_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A provider snapshot was written to disk
    SnapshotSaved {
        provider: String,
        bricks: usize,
        colors: usize,
        prices: usize,
        timestamp: DateTime<Utc>,
    },

    /// A provider snapshot was merged into memory
    SnapshotLoaded {
        provider: String,
        bricks: usize,
        colors: usize,
        prices: usize,
        timestamp: DateTime<Utc>,
    },

    /// A snapshot file could not be read; memory was left untouched
    SnapshotRejected {
        provider: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A stale or incomplete record was re-fetched during load
    RecordRefreshed {
        provider: String,
        id: i32,
        timestamp: DateTime<Utc>,
    },

    /// A design kept resolving to zero variations and is now retired
    RecordOrphaned {
        provider: String,
        design_id: i32,
        empty_refreshes: u32,
        timestamp: DateTime<Utc>,
    },

    /// A provider failed during a fallback query and was skipped
    ProviderSkipped {
        provider: String,
        capability: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A resolved brick was written back into every brick provider
    CrossPopulated {
        design_id: i32,
        source: String,
        providers: usize,
        timestamp: DateTime<Utc>,
    },

    /// Price bands were folded into a brick's variations
    PriceUpdated {
        design_id: i32,
        priced_variations: usize,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEvent {
    /// Event type name (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::FetchStarted { .. } => "FetchStarted",
            CacheEvent::FetchCompleted { .. } => "FetchCompleted",
            CacheEvent::FetchFailed { .. } => "FetchFailed",
            CacheEvent::RetryScheduled { .. } => "RetryScheduled",
            CacheEvent::SessionReset { .. } => "SessionReset",
            CacheEvent::CooldownStarted { .. } => "CooldownStarted",
            CacheEvent::SnapshotSaved { .. } => "SnapshotSaved",
            CacheEvent::SnapshotLoaded { .. } => "SnapshotLoaded",
            CacheEvent::SnapshotRejected { .. } => "SnapshotRejected",
            CacheEvent::RecordRefreshed { .. } => "RecordRefreshed",
            CacheEvent::RecordOrphaned { .. } => "RecordOrphaned",
            CacheEvent::ProviderSkipped { .. } => "ProviderSkipped",
            CacheEvent::CrossPopulated { .. } => "CrossPopulated",
            CacheEvent::PriceUpdated { .. } => "PriceUpdated",
        }
    }
}

/// Broadcast channel for cache diagnostics
///
/// Cheap to clone; every clone feeds the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CacheEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers
    ///   start dropping the oldest ones
    ///
    /// # Examples
    ///
    /// ```
    /// use brickdb_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Diagnostics are never allowed to fail a cache operation.
    pub fn emit_lossy(&self, event: CacheEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Drain every event currently buffered in `rx` (test and tooling helper)
pub fn drain(rx: &mut broadcast::Receiver<CacheEvent>) -> Vec<CacheEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit_lossy(CacheEvent::SessionReset {
            operation: "design page".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit_lossy(CacheEvent::FetchStarted {
            provider: "catalog".to_string(),
            id: 3001,
            timestamp: Utc::now(),
        });
        bus.clone().emit_lossy(CacheEvent::FetchFailed {
            provider: "catalog".to_string(),
            id: 3001,
            error: "HTTP 404".to_string(),
            timestamp: Utc::now(),
        });

        let types: Vec<_> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["FetchStarted", "FetchFailed"]);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = CacheEvent::CrossPopulated {
            design_id: 3001,
            source: "catalog".to_string(),
            providers: 2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CrossPopulated");
        assert_eq!(json["design_id"], 3001);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(EventBus::new(0).capacity(), 1);
    }
}
