//! Viewer notification payloads and the asynchronous event bus
//!
//! [`SliceChange`] is what synchronous subscribers of the view state receive.
//! [`ViewerEvent`] wraps it (and cache/prefetch outcomes) for consumers on
//! other tasks, delivered through [`EventBus`].

use crate::view::{View, ViewMap};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Current slice of every view
pub type SliceSnapshot = ViewMap<usize>;

/// A view moved to a new slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceChange {
    /// View whose slice changed
    pub view: View,
    /// New (clamped) slice index
    pub slice: usize,
    /// All views' slices after the change
    pub snapshot: SliceSnapshot,
}

/// Which prefetch phase a progress event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchPhase {
    /// Center slices and near neighbors
    Priority,
    /// Every remaining slice
    Remaining,
}

/// Viewer event types
///
/// Serializable so a front end can forward them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewerEvent {
    /// A view's current slice changed
    SliceChanged {
        change: SliceChange,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An asset load gave up after exhausting retries
    ///
    /// Renderers keep the last good image and show a failure indicator.
    AssetFailed {
        view: View,
        slice: usize,
        url: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A prefetch phase finished
    PrefetchPhaseCompleted {
        phase: PrefetchPhase,
        attempted: usize,
        loaded: usize,
        failed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Cache fully reset
    CacheCleared {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast fan-out of [`ViewerEvent`]s
///
/// Backed by `tokio::sync::broadcast`: publishing never blocks, slow
/// receivers see `Lagged` instead of stalling producers, and events emitted
/// before a subscription are not replayed.
///
/// ```
/// use osv_common::events::{EventBus, ViewerEvent};
///
/// let bus = EventBus::new(64);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(ViewerEvent::CacheCleared { timestamp: chrono::Utc::now() });
/// assert!(matches!(rx.try_recv(), Ok(ViewerEvent::CacheCleared { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ViewerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ViewerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ViewerEvent,
    ) -> Result<usize, broadcast::error::SendError<ViewerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ViewerEvent) {
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

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
