// src/coordinator.rs - Periodic, failure-tolerant refresh of all dashboard sources
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::MarketDataSource;
use crate::errors::{DashboardError, Result};
use crate::settings::{DashboardSettings, SelectionState};
use crate::store::SnapshotStore;

/// Which sources delivered fresh data in a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub market_data: bool,
    pub market_state: bool,
    pub chart_bars: bool,
    pub trade_setups: bool,
}

impl SourceReport {
    pub fn failures(&self) -> usize {
        [
            self.market_data,
            self.market_state,
            self.chart_bars,
            self.trade_setups,
        ]
        .iter()
        .filter(|ok| !**ok)
        .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Selection was empty; nothing fetched, nothing cleared.
    Skipped,
    Completed(SourceReport),
    /// The cycle itself failed; the message was published as the snapshot error.
    Failed(String),
}

/// Failure counts per source since the coordinator was built.
#[derive(Default)]
struct FailureCounters {
    market_data: AtomicU64,
    market_state: AtomicU64,
    chart_bars: AtomicU64,
    trade_setups: AtomicU64,
}

impl FailureCounters {
    fn record(&self, report: &SourceReport) -> [u64; 4] {
        let bump = |counter: &AtomicU64, ok: bool| {
            if ok {
                counter.load(Ordering::Relaxed)
            } else {
                counter.fetch_add(1, Ordering::Relaxed) + 1
            }
        };
        [
            bump(&self.market_data, report.market_data),
            bump(&self.market_state, report.market_state),
            bump(&self.chart_bars, report.chart_bars),
            bump(&self.trade_setups, report.trade_setups),
        ]
    }
}

/// Cycle id of the last publication per source. A result is only applied when its
/// cycle started after the one that last wrote the field.
#[derive(Default)]
struct AppliedCycles {
    market_data: u64,
    market_state: u64,
    chart_bars: u64,
    trade_setups: u64,
}

fn claim(slot: &mut u64, cycle_id: u64) -> bool {
    if cycle_id > *slot {
        *slot = cycle_id;
        true
    } else {
        false
    }
}

/// Marks the snapshot as loading while at least one cycle is in flight.
/// Dropping the guard clears the flag on every exit path.
struct LoadingGuard<'a> {
    store: &'a SnapshotStore,
    in_flight: &'a AtomicUsize,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(store: &'a SnapshotStore, in_flight: &'a AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = Self { store, in_flight };
        store.publish(|s| {
            s.is_loading = true;
            s.error = None;
        });
        guard
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let in_flight = self.in_flight;
        self.store
            .publish(|s| s.is_loading = in_flight.load(Ordering::SeqCst) > 0);
    }
}

struct CycleRunner {
    source: Arc<dyn MarketDataSource>,
    store: Arc<SnapshotStore>,
    selection: Arc<SelectionState>,
    chart_bars_back: u32,
    next_cycle_id: AtomicU64,
    completed_cycles: AtomicU64,
    in_flight: AtomicUsize,
    applied: Mutex<AppliedCycles>,
    failures: FailureCounters,
}

impl CycleRunner {
    fn spawn_cycle(self: &Arc<Self>, trigger: &'static str) -> JoinHandle<CycleOutcome> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.run_cycle(trigger).await })
    }

    async fn run_cycle(&self, trigger: &'static str) -> CycleOutcome {
        let settings = self.selection.settings();
        self.run_cycle_with(settings, trigger).await
    }

    async fn run_cycle_with(&self, settings: DashboardSettings, trigger: &'static str) -> CycleOutcome {
        if settings.timeframes.is_empty() {
            debug!("[REFRESH] Empty timeframe selection, skipping {} cycle", trigger);
            return CycleOutcome::Skipped;
        }

        let cycle_id = self.next_cycle_id.fetch_add(1, Ordering::SeqCst) + 1;
        let _loading = LoadingGuard::acquire(&self.store, &self.in_flight);
        let started = Instant::now();
        debug!("[REFRESH] Cycle #{} started ({})", cycle_id, trigger);

        let result = AssertUnwindSafe(self.fetch_and_publish(cycle_id, &settings))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(DashboardError::Orchestration(panic_message(&*panic))));

        match result {
            Ok(report) => {
                let completed = self.completed_cycles.fetch_add(1, Ordering::SeqCst) + 1;
                let [data, state, bars, setups] = self.failures.record(&report);
                debug!(
                    "[REFRESH] Failures so far: market_data={} market_state={} chart_bars={} trade_setups={}",
                    data, state, bars, setups
                );
                info!(
                    "🔄 [REFRESH] Cycle #{} done in {:.2}s ({} of 4 sources failed, {} cycles completed)",
                    cycle_id,
                    started.elapsed().as_secs_f64(),
                    report.failures(),
                    completed
                );
                CycleOutcome::Completed(report)
            }
            Err(e) => {
                let message = e.to_string();
                error!("❌ [REFRESH] Cycle #{} failed: {}", cycle_id, message);
                self.store.publish(|s| s.error = Some(message.clone()));
                CycleOutcome::Failed(message)
            }
        }
    }

    /// Fetch all four sources concurrently, wait for every one to settle, then
    /// publish the fulfilled ones in a single update.
    async fn fetch_and_publish(&self, cycle_id: u64, settings: &DashboardSettings) -> Result<SourceReport> {
        let timeframes = settings.timeframes.as_slice();

        let (market_data, market_state, chart_bars, trade_setups) = tokio::join!(
            self.source.fetch_market_data(timeframes),
            self.source.fetch_market_state(timeframes),
            self.source
                .fetch_chart_bars(settings.chart_timeframe, self.chart_bars_back),
            self.source.fetch_trade_setups(),
        );

        let market_data = settle(cycle_id, "market data", market_data);
        let market_state = settle(cycle_id, "market state", market_state);
        let chart_bars = settle(cycle_id, "chart bars", chart_bars);
        let trade_setups = settle(cycle_id, "trade setups", trade_setups);

        let report = SourceReport {
            market_data: market_data.is_some(),
            market_state: market_state.is_some(),
            chart_bars: chart_bars.is_some(),
            trade_setups: trade_setups.is_some(),
        };

        self.store.publish(|s| {
            let mut applied = self.applied.lock();
            if let Some(data) = market_data {
                if claim(&mut applied.market_data, cycle_id) {
                    s.market_data = Some(data);
                }
            }
            if let Some(state) = market_state {
                if claim(&mut applied.market_state, cycle_id) {
                    s.market_state = Some(state);
                }
            }
            if let Some(bars) = chart_bars {
                if claim(&mut applied.chart_bars, cycle_id) {
                    s.chart_bars = bars;
                }
            }
            if let Some(setups) = trade_setups {
                if claim(&mut applied.trade_setups, cycle_id) {
                    s.trade_setups = setups;
                }
            }
            s.last_update = Some(chrono::Utc::now());
        });

        Ok(report)
    }
}

fn settle<T>(cycle_id: u64, source: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("⚠️ [REFRESH] Cycle #{}: {} unavailable, keeping last value: {}", cycle_id, source, e);
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown error".to_string()
    }
}

/// Timer and re-trigger tasks of a running coordinator. Dropping aborts both;
/// cycles already spawned run to completion.
struct RefreshTask {
    timer: JoinHandle<()>,
    retrigger: JoinHandle<()>,
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.timer.abort();
        self.retrigger.abort();
    }
}

pub struct RefreshCoordinator {
    runner: Arc<CycleRunner>,
    interval: Duration,
    task: Mutex<Option<RefreshTask>>,
}

impl RefreshCoordinator {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: Arc<SnapshotStore>,
        selection: Arc<SelectionState>,
    ) -> Self {
        Self {
            runner: Arc::new(CycleRunner {
                source,
                store,
                selection,
                chart_bars_back: crate::config::DEFAULT_CHART_BARS_BACK,
                next_cycle_id: AtomicU64::new(0),
                completed_cycles: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                applied: Mutex::new(AppliedCycles::default()),
                failures: FailureCounters::default(),
            }),
            interval: Duration::from_secs(crate::config::DEFAULT_REFRESH_INTERVAL_SECS),
            task: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_chart_bars_back(mut self, bars_back: u32) -> Self {
        // Only reachable before start, while the runner is not shared.
        if let Some(runner) = Arc::get_mut(&mut self.runner) {
            runner.chart_bars_back = bars_back;
        }
        self
    }

    /// Run one cycle immediately, then every interval. Also re-runs a cycle on
    /// every selection change. Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("🔄 [REFRESH] Already running");
            return;
        }

        info!("🚀 [REFRESH] Starting refresh every {:?}", self.interval);
        self.runner.spawn_cycle("initial");

        let runner = Arc::clone(&self.runner);
        let period = self.interval;
        let timer = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                runner.spawn_cycle("periodic");
            }
        });

        let runner = Arc::clone(&self.runner);
        let mut selection_rx = self.runner.selection.subscribe();
        selection_rx.borrow_and_update();
        let retrigger = tokio::spawn(async move {
            while selection_rx.changed().await.is_ok() {
                selection_rx.borrow_and_update();
                debug!("[REFRESH] Selection changed, refreshing now");
                runner.spawn_cycle("selection change");
            }
        });

        *task = Some(RefreshTask { timer, retrigger });
    }

    /// Disarm the timer and the re-trigger. In-flight cycles are not cancelled.
    pub fn stop(&self) {
        if self.task.lock().take().is_some() {
            info!("🛑 [REFRESH] Stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Run a cycle now and wait for it.
    pub async fn refresh_now(&self) -> CycleOutcome {
        self.runner.run_cycle("manual").await
    }

    pub fn completed_cycles(&self) -> u64 {
        self.runner.completed_cycles.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.runner.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DashboardError;
    use crate::settings::{MemorySettingsStorage, SETTINGS_KEY};
    use crate::types::{
        ChartBar, MarketDataResponse, MarketStateResponse, Timeframe, TradeSetupsResponse,
    };
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct MockSource {
        market_data_calls: AtomicUsize,
        market_state_calls: AtomicUsize,
        chart_bars_calls: AtomicUsize,
        trade_setups_calls: AtomicUsize,
        failing: Mutex<HashSet<&'static str>>,
        no_setups: AtomicBool,
        panic_on_market_data: AtomicBool,
        market_data_delays: Mutex<VecDeque<Duration>>,
        last_timeframes: Mutex<Vec<Timeframe>>,
        last_chart_timeframe: Mutex<Option<Timeframe>>,
    }

    impl MockSource {
        fn fail(&self, source: &'static str) {
            self.failing.lock().insert(source);
        }

        fn check(&self, source: &'static str) -> Result<()> {
            if self.failing.lock().contains(source) {
                return Err(DashboardError::Status {
                    endpoint: "mock",
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MarketDataSource for MockSource {
        async fn fetch_market_data(&self, timeframes: &[Timeframe]) -> Result<MarketDataResponse> {
            let n = self.market_data_calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_timeframes.lock() = timeframes.to_vec();
            let delay = self.market_data_delays.lock().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.panic_on_market_data.load(Ordering::SeqCst) {
                panic!("market data decoder exploded");
            }
            self.check("market_data")?;
            Ok(MarketDataResponse {
                ticker: format!("data-{}", n),
                ..Default::default()
            })
        }

        async fn fetch_market_state(&self, _timeframes: &[Timeframe]) -> Result<MarketStateResponse> {
            let n = self.market_state_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.check("market_state")?;
            Ok(MarketStateResponse {
                ticker: format!("state-{}", n),
                ..Default::default()
            })
        }

        async fn fetch_chart_bars(&self, timeframe: Timeframe, _bars_back: u32) -> Result<Vec<ChartBar>> {
            let n = self.chart_bars_calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_chart_timeframe.lock() = Some(timeframe);
            self.check("chart_bars")?;
            Ok(vec![ChartBar {
                time: n as i64,
                ..Default::default()
            }])
        }

        async fn fetch_trade_setups(&self) -> Result<Option<TradeSetupsResponse>> {
            let n = self.trade_setups_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.check("trade_setups")?;
            if self.no_setups.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(TradeSetupsResponse {
                bias: format!("setups-{}", n),
                ..Default::default()
            }))
        }
    }

    fn setup(raw_settings: Option<&str>) -> (Arc<MockSource>, Arc<SelectionState>, RefreshCoordinator) {
        let storage = match raw_settings {
            Some(raw) => MemorySettingsStorage::with_entry(SETTINGS_KEY, raw),
            None => MemorySettingsStorage::new(),
        };
        let selection = Arc::new(SelectionState::load(Arc::new(storage)));
        let source = Arc::new(MockSource::default());
        let coordinator = RefreshCoordinator::new(
            source.clone(),
            Arc::new(SnapshotStore::new()),
            selection.clone(),
        )
        .with_interval(Duration::from_secs(5));
        (source, selection, coordinator)
    }

    fn tickers(coordinator: &RefreshCoordinator) -> (Option<String>, Option<String>, Option<i64>, Option<String>) {
        let snapshot = coordinator.store().snapshot();
        (
            snapshot.market_data.as_ref().map(|d| d.ticker.clone()),
            snapshot.market_state.as_ref().map(|s| s.ticker.clone()),
            snapshot.chart_bars.first().map(|b| b.time),
            snapshot.trade_setups.as_ref().map(|s| s.bias.clone()),
        )
    }

    #[tokio::test]
    async fn test_cycle_publishes_all_sources() {
        let (source, _, coordinator) = setup(Some(r#"{"timeframes": [1, 15], "chartTimeframe": 3}"#));

        let outcome = coordinator.refresh_now().await;

        assert_eq!(outcome, CycleOutcome::Completed(SourceReport {
            market_data: true,
            market_state: true,
            chart_bars: true,
            trade_setups: true,
        }));
        assert_eq!(
            tickers(&coordinator),
            (
                Some("data-1".to_string()),
                Some("state-1".to_string()),
                Some(1),
                Some("setups-1".to_string())
            )
        );
        assert_eq!(*source.last_timeframes.lock(), vec![1, 15]);
        assert_eq!(*source.last_chart_timeframe.lock(), Some(3));

        let snapshot = coordinator.store().snapshot();
        assert!(!snapshot.is_loading);
        assert!(snapshot.last_update.is_some());
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_single_failure_keeps_previous_value() {
        let (source, _, coordinator) = setup(None);
        coordinator.refresh_now().await;

        source.fail("market_state");
        let outcome = coordinator.refresh_now().await;

        match outcome {
            CycleOutcome::Completed(report) => {
                assert_eq!(report.failures(), 1);
                assert!(!report.market_state);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            tickers(&coordinator),
            (
                Some("data-2".to_string()),
                Some("state-1".to_string()),
                Some(2),
                Some("setups-2".to_string())
            )
        );
        assert!(coordinator.store().snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_all_sources_failing_still_completes() {
        let (source, _, coordinator) = setup(None);
        for name in ["market_data", "market_state", "chart_bars", "trade_setups"] {
            source.fail(name);
        }

        let outcome = coordinator.refresh_now().await;

        assert!(matches!(outcome, CycleOutcome::Completed(report) if report.failures() == 4));
        let snapshot = coordinator.store().snapshot();
        assert!(!snapshot.is_loading);
        assert!(snapshot.last_update.is_some());
        assert!(snapshot.error.is_none());
        assert!(snapshot.market_data.is_none());
        assert_eq!(coordinator.completed_cycles(), 1);
    }

    #[tokio::test]
    async fn test_missing_setups_replace_previous() {
        let (source, _, coordinator) = setup(None);
        coordinator.refresh_now().await;
        assert!(coordinator.store().snapshot().trade_setups.is_some());

        source.no_setups.store(true, Ordering::SeqCst);
        coordinator.refresh_now().await;
        assert!(coordinator.store().snapshot().trade_setups.is_none());
    }

    #[tokio::test]
    async fn test_empty_selection_is_a_noop() {
        let (source, _, coordinator) = setup(None);
        coordinator.refresh_now().await;
        let before = coordinator.store().snapshot();

        let empty = DashboardSettings {
            timeframes: Vec::new(),
            chart_timeframe: 5,
        };
        let outcome = coordinator.runner.run_cycle_with(empty, "test").await;

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*coordinator.store().snapshot(), *before);
    }

    #[tokio::test]
    async fn test_cycle_panic_surfaces_error_and_keeps_data() {
        let (source, _, coordinator) = setup(None);
        coordinator.refresh_now().await;
        let before = coordinator.store().snapshot();

        source.panic_on_market_data.store(true, Ordering::SeqCst);
        let outcome = coordinator.refresh_now().await;

        let snapshot = coordinator.store().snapshot();
        assert!(matches!(outcome, CycleOutcome::Failed(ref msg) if msg.contains("decoder exploded")));
        assert_eq!(
            snapshot.error.as_deref(),
            Some("Refresh cycle failed: market data decoder exploded")
        );
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.last_update, before.last_update);
        assert_eq!(snapshot.market_data, before.market_data);
        assert_eq!(snapshot.market_state, before.market_state);

        // The next attempt clears the error.
        source.panic_on_market_data.store(false, Ordering::SeqCst);
        coordinator.refresh_now().await;
        assert!(coordinator.store().snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_loading_flag_brackets_cycle() {
        let (_, _, coordinator) = setup(None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            coordinator
                .store()
                .subscribe(move |snapshot| seen.lock().push(snapshot.is_loading));
        }

        coordinator.refresh_now().await;

        let seen = seen.lock();
        assert_eq!(seen.first(), Some(&true));
        assert_eq!(seen.last(), Some(&false));
    }

    #[tokio::test]
    async fn test_observer_panic_does_not_leave_loading_stuck() {
        let (_, _, coordinator) = setup(None);
        let fired = Arc::new(AtomicBool::new(false));
        {
            let fired = Arc::clone(&fired);
            coordinator.store().subscribe(move |snapshot| {
                if snapshot.is_loading && !fired.swap(true, Ordering::SeqCst) {
                    panic!("observer blew up while loading");
                }
            });
        }

        let first = coordinator.runner.spawn_cycle("test").await.unwrap();
        let second = coordinator.refresh_now().await;

        assert!(fired.load(Ordering::SeqCst));
        assert!(matches!(first, CycleOutcome::Completed(_)));
        assert!(matches!(second, CycleOutcome::Completed(_)));
        assert_eq!(coordinator.runner.in_flight.load(Ordering::SeqCst), 0);
        assert!(!coordinator.store().snapshot().is_loading);
    }

    #[tokio::test]
    async fn test_observer_panic_on_publish_keeps_outcome_consistent() {
        let (_, _, coordinator) = setup(None);
        coordinator.refresh_now().await;
        let before = coordinator.store().snapshot();
        coordinator.store().subscribe(|snapshot| {
            if snapshot.market_data.as_ref().map(|d| d.ticker.as_str()) == Some("data-2") {
                panic!("observer blew up on publish");
            }
        });

        let outcome = coordinator.refresh_now().await;

        let snapshot = coordinator.store().snapshot();
        assert!(matches!(outcome, CycleOutcome::Completed(report) if report.failures() == 0));
        assert_eq!(snapshot.market_data.as_ref().unwrap().ticker, "data-2");
        assert!(snapshot.last_update >= before.last_update);
        assert!(snapshot.error.is_none());
        assert!(!snapshot.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_immediately_then_periodically() {
        let (source, _, coordinator) = setup(None);

        coordinator.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 3);

        coordinator.stop();
        assert!(!coordinator.is_running());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.completed_cycles(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let (source, _, coordinator) = setup(None);

        coordinator.stop();
        coordinator.start();
        coordinator.start();
        assert!(coordinator.is_running());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 1);

        coordinator.stop();
        coordinator.stop();
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 1);

        // Restart after stop runs a fresh immediate cycle.
        coordinator.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 2);
        coordinator.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_change_triggers_out_of_band_cycle() {
        let (source, selection, coordinator) = setup(None);

        coordinator.start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 1);

        selection.toggle_timeframe(60).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 2);
        assert_eq!(*source.last_timeframes.lock(), vec![1, 5, 30, 60, 120]);

        // The periodic tick still fires five seconds after start.
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 3);

        selection.set_chart_timeframe(15).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 4);
        assert_eq!(*source.last_chart_timeframe.lock(), Some(15));

        coordinator.stop();
        selection.toggle_timeframe(3).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.market_data_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cycle_does_not_overwrite_newer_one() {
        let (source, _, coordinator) = setup(None);
        source
            .market_data_delays
            .lock()
            .push_back(Duration::from_secs(3));

        let (slow, fast) = tokio::join!(coordinator.refresh_now(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            coordinator.refresh_now().await
        });

        assert!(matches!(slow, CycleOutcome::Completed(_)));
        assert!(matches!(fast, CycleOutcome::Completed(_)));

        let snapshot = coordinator.store().snapshot();
        assert_eq!(snapshot.market_data.as_ref().unwrap().ticker, "data-2");
        assert_eq!(snapshot.market_state.as_ref().unwrap().ticker, "state-2");
        assert!(!snapshot.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_cancel_in_flight_cycle() {
        let (source, _, coordinator) = setup(None);
        source
            .market_data_delays
            .lock()
            .push_back(Duration::from_secs(2));

        coordinator.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.store().snapshot().is_loading);

        coordinator.stop();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let snapshot = coordinator.store().snapshot();
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.market_data.as_ref().unwrap().ticker, "data-1");
        assert_eq!(coordinator.completed_cycles(), 1);
    }
}
