//! View synchronization state
//!
//! Single writer of every view's current slice. Writes are clamped, never
//! rejected, and every effective change is dispatched synchronously to
//! subscribers in subscription order.
//!
//! Dispatch runs with no internal lock held, over a snapshot of the subscriber
//! list. A subscriber may therefore call back into [`ViewSync::set_slice`]; the
//! nested change is dispatched recursively within the same call stack.

use crate::correlation::CorrelationEngine;
use crate::error::SyncError;
use osv_common::events::{EventBus, SliceChange, SliceSnapshot, ViewerEvent};
use osv_common::{View, ViewMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Subscriber callback
///
/// An `Err` is logged and does not stop delivery to later subscribers.
pub type Subscriber = dyn Fn(&SliceChange) -> anyhow::Result<()> + Send + Sync;

/// Handle returned by [`ViewSync::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Scroll-wheel / keyboard step direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Previous,
    Next,
}

impl Step {
    pub fn delta(self) -> i64 {
        match self {
            Step::Previous => -1,
            Step::Next => 1,
        }
    }
}

/// Current slice and fixed slice count of one view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewState {
    pub current_slice: usize,
    pub slice_count: usize,
}

impl ViewState {
    fn clamp(&self, index: i64) -> usize {
        let max = self.slice_count.saturating_sub(1) as i64;
        index.clamp(0, max) as usize
    }
}

/// Synchronized slice state for all views
pub struct ViewSync {
    engine: CorrelationEngine,
    mirror: ViewMap<bool>,
    states: Mutex<ViewMap<ViewState>>,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<Subscriber>)>>,
    next_subscription: AtomicU64,
}

impl ViewSync {
    /// Start every view on its center slice
    pub fn new(engine: CorrelationEngine) -> Self {
        let states = ViewMap::from_fn(|view| {
            let slice_count = engine.slice_count(view);
            ViewState {
                current_slice: slice_count / 2,
                slice_count,
            }
        });

        Self {
            engine,
            mirror: ViewMap::default(),
            states: Mutex::new(states),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Mirror the click x coordinate of the flagged views before correlation
    pub fn with_mirror(mut self, mirror: ViewMap<bool>) -> Self {
        self.mirror = mirror;
        self
    }

    fn states(&self) -> MutexGuard<'_, ViewMap<ViewState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscriber_list(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Arc<Subscriber>)>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_slice(&self, view: View) -> usize {
        self.states()[view].current_slice
    }

    pub fn slice_count(&self, view: View) -> usize {
        self.states()[view].slice_count
    }

    /// Current slice of every view
    pub fn snapshot(&self) -> SliceSnapshot {
        self.states().map(|_, s| s.current_slice)
    }

    pub fn engine(&self) -> &CorrelationEngine {
        &self.engine
    }

    /// Clamp and store a slice, notifying subscribers when it changed
    ///
    /// Returns the stored slice.
    pub fn set_slice(&self, view: View, index: i64) -> usize {
        self.apply(view, index, true)
    }

    /// Clamp and store a slice without notifying subscribers
    pub fn set_slice_quiet(&self, view: View, index: i64) -> usize {
        self.apply(view, index, false)
    }

    fn apply(&self, view: View, index: i64, notify: bool) -> usize {
        let change = {
            let mut states = self.states();
            let state = &mut states[view];
            let clamped = state.clamp(index);

            if clamped == state.current_slice {
                return clamped;
            }
            state.current_slice = clamped;

            SliceChange {
                view,
                slice: clamped,
                snapshot: states.map(|_, s| s.current_slice),
            }
        };

        tracing::debug!(view = %view, requested = index, slice = change.slice, "Slice changed");

        if notify {
            self.dispatch(&change);
        }
        change.slice
    }

    fn dispatch(&self, change: &SliceChange) {
        let subscribers: Vec<(SubscriptionId, Arc<Subscriber>)> = self.subscriber_list().clone();

        for (id, callback) in subscribers {
            if let Err(e) = callback(change) {
                tracing::warn!(
                    subscription = id.0,
                    view = %change.view,
                    slice = change.slice,
                    error = %e,
                    "Slice subscriber failed"
                );
            }
        }
    }

    /// Synchronize sibling views to a click in `source`
    ///
    /// `raw_x`/`raw_y` are surface pixel coordinates with `y` growing downward.
    /// Every sibling slice is computed before any is applied, so a
    /// configuration error leaves all views unchanged. Both sibling
    /// notifications are delivered before this returns.
    pub fn handle_interaction_click(
        &self,
        source: View,
        raw_x: f64,
        raw_y: f64,
        rendered_width: f64,
        rendered_height: f64,
    ) -> Result<Vec<(View, usize)>, SyncError> {
        let valid = |d: f64| d.is_finite() && d > 0.0;
        if !valid(rendered_width) || !valid(rendered_height) {
            return Err(SyncError::InvalidSurface {
                width: rendered_width,
                height: rendered_height,
            });
        }

        let mut x = (raw_x / rendered_width).clamp(0.0, 1.0);
        let y = ((rendered_height - raw_y) / rendered_height).clamp(0.0, 1.0);
        if self.mirror[source] {
            x = 1.0 - x;
        }

        self.handle_normalized_click(source, x, y)
    }

    /// Synchronize sibling views to an already-normalized click (`y = 0` at the bottom)
    pub fn handle_normalized_click(&self, source: View, x: f64, y: f64) -> Result<Vec<(View, usize)>, SyncError> {
        let targets = self.engine.compute_siblings(source, x, y)?;

        tracing::debug!(source = %source, x, y, ?targets, "Correlating click");

        Ok(targets
            .into_iter()
            .map(|(view, slice)| (view, self.set_slice(view, slice as i64)))
            .collect())
    }

    /// Move one view a single slice; other views never follow
    pub fn handle_step(&self, view: View, step: Step) -> usize {
        let current = self.get_slice(view) as i64;
        self.set_slice(view, current + step.delta())
    }

    /// Register a callback for every future slice change
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SliceChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscriber_list().push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscriber_list();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_list().len()
    }

    /// Re-publish every slice change on an event bus for asynchronous consumers
    pub fn forward_to(&self, bus: EventBus) -> SubscriptionId {
        self.subscribe(move |change| {
            bus.emit_lossy(ViewerEvent::SliceChanged {
                change: *change,
                timestamp: chrono::Utc::now(),
            });
            Ok(())
        })
    }
}

impl std::fmt::Debug for ViewSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewSync")
            .field("snapshot", &self.snapshot())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osv_common::{CoefficientTable, Coefficients, ViewPair};

    fn sync_with(count: usize) -> ViewSync {
        let table = CoefficientTable::from_entries(
            ViewPair::all().map(|p| (p.source, p.target, Coefficients::new(-25.50, -13.81, -30.49))),
        )
        .unwrap();
        ViewSync::new(CorrelationEngine::new(table, ViewMap::from_fn(|_| count)))
    }

    fn recorder(sync: &ViewSync) -> Arc<Mutex<Vec<SliceChange>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        sync.subscribe(move |change| {
            sink.lock().unwrap().push(*change);
            Ok(())
        });
        seen
    }

    #[test]
    fn test_starts_on_center_slice() {
        let sync = sync_with(21);
        assert_eq!(sync.snapshot(), ViewMap { axial: 10, coronal: 10, sagittal: 10 });
    }

    #[test]
    fn test_set_slice_clamps_low_and_high() {
        let sync = sync_with(21);
        assert_eq!(sync.set_slice(View::Axial, -5), 0);
        assert_eq!(sync.get_slice(View::Axial), 0);
        assert_eq!(sync.set_slice(View::Axial, 999), 20);
        assert_eq!(sync.get_slice(View::Axial), 20);
    }

    #[test]
    fn test_unchanged_value_does_not_notify() {
        let sync = sync_with(21);
        let seen = recorder(&sync);

        sync.set_slice(View::Coronal, 10);
        assert!(seen.lock().unwrap().is_empty());

        sync.set_slice(View::Coronal, 0);
        sync.set_slice(View::Coronal, -3); // clamps to 0 again
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_quiet_set_updates_without_notifying() {
        let sync = sync_with(21);
        let seen = recorder(&sync);

        assert_eq!(sync.set_slice_quiet(View::Sagittal, 4), 4);
        assert_eq!(sync.get_slice(View::Sagittal), 4);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_notification_carries_full_snapshot() {
        let sync = sync_with(21);
        let seen = recorder(&sync);

        sync.set_slice(View::Sagittal, 3);
        let change = seen.lock().unwrap()[0];
        assert_eq!(change.view, View::Sagittal);
        assert_eq!(change.slice, 3);
        assert_eq!(change.snapshot, ViewMap { axial: 10, coronal: 10, sagittal: 3 });
    }

    #[test]
    fn test_step_moves_only_one_view() {
        let sync = sync_with(21);
        assert_eq!(sync.handle_step(View::Axial, Step::Next), 11);
        assert_eq!(sync.handle_step(View::Axial, Step::Previous), 10);
        assert_eq!(sync.get_slice(View::Coronal), 10);
        assert_eq!(sync.get_slice(View::Sagittal), 10);

        sync.set_slice(View::Axial, 0);
        assert_eq!(sync.handle_step(View::Axial, Step::Previous), 0);
    }

    #[test]
    fn test_subscribers_called_in_subscription_order() {
        let sync = sync_with(21);
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            sync.subscribe(move |_| {
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }

        sync.set_slice(View::Axial, 2);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_subscriber_does_not_skip_siblings() {
        let sync = sync_with(21);
        sync.subscribe(|_| anyhow::bail!("renderer unavailable"));
        let seen = recorder(&sync);

        sync.set_slice(View::Axial, 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let sync = sync_with(21);
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let id = sync.subscribe(move |_| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });

        sync.set_slice(View::Axial, 1);
        assert!(sync.unsubscribe(id));
        assert!(!sync.unsubscribe(id));
        sync.set_slice(View::Axial, 2);

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(sync.subscriber_count(), 0);
    }

    #[test]
    fn test_reentrant_subscriber_recurses() {
        let sync = Arc::new(sync_with(21));
        let weak = Arc::downgrade(&sync);

        // Keep coronal pinned to whatever axial moves to
        sync.subscribe(move |change| {
            if change.view == View::Axial {
                if let Some(sync) = weak.upgrade() {
                    sync.set_slice(View::Coronal, change.slice as i64);
                }
            }
            Ok(())
        });

        sync.set_slice(View::Axial, 7);
        assert_eq!(sync.get_slice(View::Coronal), 7);
    }

    #[test]
    fn test_click_normalizes_and_flips_y() {
        let sync = sync_with(21);
        let seen = recorder(&sync);

        // x = 50/100 = 0.5, y = (200 - 140)/200 = 0.3
        let targets = sync
            .handle_interaction_click(View::Axial, 50.0, 140.0, 100.0, 200.0)
            .unwrap();

        assert_eq!(targets, vec![(View::Coronal, 16), (View::Sagittal, 16)]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].view, View::Coronal);
        assert_eq!(seen[1].view, View::Sagittal);
        assert_eq!(sync.get_slice(View::Axial), 10, "Source view never moves");
    }

    #[test]
    fn test_click_on_zero_sized_surface_rejected() {
        let sync = sync_with(21);
        let err = sync
            .handle_interaction_click(View::Axial, 1.0, 1.0, 0.0, 200.0)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidSurface { .. }));
        assert_eq!(sync.snapshot(), ViewMap { axial: 10, coronal: 10, sagittal: 10 });
    }

    #[test]
    fn test_mirror_flips_x_for_flagged_view() {
        let table = CoefficientTable::from_entries(
            ViewPair::all().map(|p| (p.source, p.target, Coefficients::new(0.0, 20.0, 0.0))),
        )
        .unwrap();
        let engine = CorrelationEngine::new(table, ViewMap::from_fn(|_| 21));
        let sync = ViewSync::new(engine).with_mirror(ViewMap {
            axial: false,
            coronal: false,
            sagittal: true,
        });

        // raw = 20·x; x = 0.25 → 5, mirrored → 15
        sync.handle_interaction_click(View::Axial, 25.0, 0.0, 100.0, 100.0).unwrap();
        assert_eq!(sync.get_slice(View::Coronal), 5);

        sync.handle_interaction_click(View::Sagittal, 25.0, 0.0, 100.0, 100.0).unwrap();
        assert_eq!(sync.get_slice(View::Axial), 15);
    }

    #[tokio::test]
    async fn test_forward_to_event_bus() {
        let sync = sync_with(21);
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        sync.forward_to(bus);

        sync.set_slice(View::Coronal, 12);

        match rx.recv().await.unwrap() {
            ViewerEvent::SliceChanged { change, .. } => {
                assert_eq!(change.view, View::Coronal);
                assert_eq!(change.slice, 12);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
