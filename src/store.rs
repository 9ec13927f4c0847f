// src/store.rs - Shared refresh snapshot with explicit subscriptions
//
// The snapshot is the only shared mutable state of the dashboard. The refresh
// coordinator publishes into it; everything else reads it or subscribes to it.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::types::{ChartBar, MarketDataResponse, MarketStateResponse, TradeSetupsResponse};

/// Aggregate state published by the refresh coordinator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshSnapshot {
    pub market_data: Option<MarketDataResponse>,
    pub market_state: Option<MarketStateResponse>,
    pub chart_bars: Vec<ChartBar>,
    /// `None` is a valid state: the trading daemon had no setups.
    pub trade_setups: Option<TradeSetupsResponse>,
    pub last_update: Option<DateTime<Utc>>,
    pub is_loading: bool,
    pub error: Option<String>,
}

pub type SubscriptionId = u64;

type Observer = Arc<dyn Fn(&RefreshSnapshot) + Send + Sync>;

#[derive(Default)]
pub struct SnapshotStore {
    snapshot: RwLock<Arc<RefreshSnapshot>>,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
    next_id: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Cheap to call; the returned value never changes.
    pub fn snapshot(&self) -> Arc<RefreshSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Register an observer called after every publication.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&RefreshSnapshot) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Apply `mutate` to a copy of the snapshot, swap it in and notify observers.
    pub(crate) fn publish<F>(&self, mutate: F) -> Arc<RefreshSnapshot>
    where
        F: FnOnce(&mut RefreshSnapshot),
    {
        let published = {
            let mut current = self.snapshot.write();
            let mut next = RefreshSnapshot::clone(&current);
            mutate(&mut next);
            let next = Arc::new(next);
            *current = Arc::clone(&next);
            next
        };

        // Observers run outside both locks so they may read or unsubscribe.
        // A panicking observer is logged and never reaches the publisher.
        let observers: Vec<(SubscriptionId, Observer)> = self
            .observers
            .lock()
            .iter()
            .map(|(id, observer)| (*id, Arc::clone(observer)))
            .collect();
        for (id, observer) in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(&published))).is_err() {
                warn!("[STORE] Observer #{} panicked, snapshot already published", id);
            }
        }

        published
    }
}
