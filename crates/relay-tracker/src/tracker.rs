//! Tracker: owns the transfer cache and the poll timer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use relay_api::RelayerApi;
use relay_store::{MergeOutcome, PollSet, Snapshot, TransferCache};
use relay_types::{ApiError, ApiErrorKind, Result, TransferRequest};

use crate::{CycleReport, PollConfig, PollEvent, PollEventHandler};

/// Cache plus the ids still being polled. Always locked together.
#[derive(Debug, Default)]
struct TrackerState {
    cache: TransferCache,
    poll_set: PollSet,
}

struct Runner {
    generation: u64,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Shared {
    api: Arc<dyn RelayerApi>,
    config: PollConfig,
    state: Mutex<TrackerState>,
    on_event: Option<PollEventHandler>,
    /// Bumped by `stop`; cycles dispatched under an older value merge nothing.
    generation: AtomicU64,
    runner: StdMutex<Option<Runner>>,
    backoff_until: StdMutex<Option<Instant>>,
}

/// Held only by `Tracker` clones. Dropping the last one shuts the timer down.
struct Owner {
    shared: Weak<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.shutdown();
        }
    }
}

/// Polling orchestrator. Cheap to clone; clones share one cache and one timer.
///
/// The timer task never keeps the tracker alive: once every clone is dropped
/// the task is cancelled and no further requests go out.
#[derive(Clone)]
pub struct Tracker {
    _owner: Arc<Owner>,
    shared: Arc<Shared>,
}

impl Tracker {
    pub fn new(
        api: Arc<dyn RelayerApi>,
        config: PollConfig,
        on_event: Option<PollEventHandler>,
    ) -> Self {
        let shared = Arc::new(Shared {
            api,
            config,
            state: Mutex::new(TrackerState::default()),
            on_event,
            generation: AtomicU64::new(0),
            runner: StdMutex::new(None),
            backoff_until: StdMutex::new(None),
        });
        Self {
            _owner: Arc::new(Owner {
                shared: Arc::downgrade(&shared),
            }),
            shared,
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.shared.config
    }

    pub fn api(&self) -> &Arc<dyn RelayerApi> {
        &self.shared.api
    }

    /// Cache a transfer returned by submission and start polling it if it is live.
    pub async fn admit(&self, transfer: TransferRequest) -> MergeOutcome {
        let id = transfer.id.clone();
        let (outcome, live) = {
            let mut state = self.shared.state.lock().await;
            let snapshot = state.cache.snapshot();
            let outcome = state.cache.merge(transfer, snapshot);
            let live = state.sync_poll_set(&id);
            (outcome, live)
        };
        debug!(target: "relay::tracker", %id, ?outcome, live, "admitted transfer");

        if live && self.shared.config.auto_start {
            self.ensure_running();
        }
        outcome
    }

    /// Apply the relayer's answer to a manual retry and re-admit the id.
    ///
    /// Polls dispatched before this call are discarded when they land.
    pub async fn track_retry(&self, transfer: TransferRequest) -> MergeOutcome {
        let id = transfer.id.clone();
        let (outcome, live) = {
            let mut state = self.shared.state.lock().await;
            let outcome = state.cache.replace_after_retry(transfer);
            let live = state.sync_poll_set(&id);
            (outcome, live)
        };
        info!(target: "relay::tracker", %id, ?outcome, live, "retry applied");

        if live && self.shared.config.auto_start {
            self.ensure_running();
        }
        outcome
    }

    /// User-triggered fetch of one transfer. Unlike poll cycles, errors are returned.
    pub async fn refresh(&self, id: &str) -> Result<TransferRequest> {
        self.check_backoff()?;
        let snapshot = self.snapshot().await;

        match self.shared.api.get_transfer(id).await {
            Ok(transfer) => {
                let (current, live) = {
                    let mut state = self.shared.state.lock().await;
                    state.cache.merge(transfer.clone(), snapshot);
                    let live = state.sync_poll_set(id);
                    (state.cache.get(id).cloned().unwrap_or(transfer), live)
                };
                if live && self.shared.config.auto_start {
                    self.ensure_running();
                }
                Ok(current)
            }
            Err(e) => {
                if e.kind == ApiErrorKind::NotFound {
                    self.evict(id).await;
                }
                self.shared.note_error(&e);
                Err(e)
            }
        }
    }

    /// Forget a transfer the relayer no longer knows about.
    pub async fn evict(&self, id: &str) -> Option<TransferRequest> {
        let mut state = self.shared.state.lock().await;
        state.poll_set.remove(id);
        let evicted = state.cache.evict(id);
        if evicted.is_some() {
            warn!(target: "relay::tracker", %id, "transfer no longer known to relayer");
        }
        evicted
    }

    /// Run one poll cycle now, outside the timer.
    ///
    /// Refused while a back-off is pending. Does nothing while the timer is
    /// running, since the timer already polls the same ids.
    pub async fn poll_once(&self) -> Result<CycleReport> {
        self.check_backoff()?;
        if self.is_running() {
            debug!(target: "relay::tracker", "poll timer active, skipping manual cycle");
            return Ok(CycleReport::default());
        }
        let generation = self.shared.generation.load(Ordering::SeqCst);
        Ok(self.shared.cycle(generation).await)
    }

    /// Re-admit every live cached transfer and start the timer.
    ///
    /// Returns `false` if the timer was already running or there is nothing to poll.
    pub async fn start(&self) -> bool {
        {
            let mut state = self.shared.state.lock().await;
            let live: Vec<String> = state
                .cache
                .list_newest_first()
                .into_iter()
                .filter(|t| !t.is_terminal())
                .map(|t| t.id)
                .collect();
            for id in live {
                state.poll_set.admit(id);
            }
            if state.poll_set.is_empty() {
                return false;
            }
        }
        self.ensure_running()
    }

    /// Stop polling everything. Responses still in flight are dropped on arrival.
    pub async fn stop(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        let runner = self.shared.runner_slot().take();
        if let Some(runner) = runner {
            let _ = runner.cancel.send(true);
            let _ = runner.handle.await;
        }

        let cleared = {
            let mut state = self.shared.state.lock().await;
            let n = state.poll_set.len();
            state.poll_set.clear();
            n
        };
        info!(target: "relay::tracker", cleared, "polling stopped");
        self.shared.emit(PollEvent::Stopped);
    }

    /// Stop polling one id. The cached entry is kept.
    pub async fn stop_polling(&self, id: &str) -> bool {
        self.shared.state.lock().await.poll_set.remove(id)
    }

    /// Take a snapshot before dispatching a request whose answer goes to `merge_page`.
    pub async fn snapshot(&self) -> Snapshot {
        self.shared.state.lock().await.cache.snapshot()
    }

    /// Merge a list page. Listed transfers are cached but not admitted to polling.
    pub async fn merge_page(&self, items: Vec<TransferRequest>, seen: Snapshot) -> usize {
        let mut state = self.shared.state.lock().await;
        let mut applied = 0;
        for transfer in items {
            let id = transfer.id.clone();
            if state.cache.merge(transfer, seen).applied() {
                applied += 1;
            }
            if state.poll_set.contains(&id) {
                state.sync_poll_set(&id);
            }
        }
        applied
    }

    pub async fn get(&self, id: &str) -> Option<TransferRequest> {
        self.shared.state.lock().await.cache.get(id).cloned()
    }

    /// Every cached transfer, newest first.
    pub async fn transfers(&self) -> Vec<TransferRequest> {
        self.shared.state.lock().await.cache.list_newest_first()
    }

    pub async fn polling_ids(&self) -> Vec<String> {
        self.shared.state.lock().await.poll_set.ids()
    }

    pub async fn is_polling(&self, id: &str) -> bool {
        self.shared.state.lock().await.poll_set.contains(id)
    }

    pub fn is_running(&self) -> bool {
        self.shared.runner_slot().is_some()
    }

    /// Refuse to call the relayer while a `rate_limited` back-off is pending.
    pub fn check_backoff(&self) -> Result<()> {
        match self.backoff_remaining() {
            Some(wait) => {
                let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                Err(ApiError::new(
                    ApiErrorKind::RateLimited,
                    format!("rate limited, retry in {}s", secs),
                )
                .with_retry_after(secs))
            }
            None => Ok(()),
        }
    }

    pub fn backoff_remaining(&self) -> Option<Duration> {
        self.shared.backoff_remaining()
    }

    /// Record a relayer error; `rate_limited` errors start a back-off window.
    pub fn note_error(&self, err: &ApiError) {
        self.shared.note_error(err);
    }

    /// Spawn the timer unless one is already running. Returns `true` if spawned.
    fn ensure_running(&self) -> bool {
        let mut slot = self.shared.runner_slot();
        if slot.is_some() {
            return false;
        }

        let generation = self.shared.generation.load(Ordering::SeqCst);
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::downgrade(&self.shared), generation, cancelled));
        *slot = Some(Runner {
            generation,
            cancel,
            handle,
        });
        info!(target: "relay::tracker", interval_ms = self.shared.config.interval_ms, "poll timer started");
        true
    }
}

impl TrackerState {
    /// Keep the poll set consistent with the cached status of `id`.
    /// Returns whether the id is still being polled.
    fn sync_poll_set(&mut self, id: &str) -> bool {
        match self.cache.status(id) {
            Some(status) if !status.is_terminal() => {
                self.poll_set.admit(id);
                true
            }
            _ => {
                self.poll_set.remove(id);
                false
            }
        }
    }
}

impl Shared {
    fn emit(&self, event: PollEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    fn runner_slot(&self) -> MutexGuard<'_, Option<Runner>> {
        self.runner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel the timer without waiting for it. Used on teardown.
    fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(runner) = self.runner_slot().take() {
            let _ = runner.cancel.send(true);
            runner.handle.abort();
            debug!(target: "relay::tracker", "tracker dropped, poll timer cancelled");
        }
    }

    fn backoff_slot(&self) -> MutexGuard<'_, Option<Instant>> {
        self.backoff_until.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn backoff_remaining(&self) -> Option<Duration> {
        let until = (*self.backoff_slot())?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    fn note_error(&self, err: &ApiError) {
        if let Some(wait) = err.backoff() {
            let until = Instant::now() + wait;
            let mut slot = self.backoff_slot();
            if slot.map_or(true, |current| current < until) {
                *slot = Some(until);
            }
            warn!(target: "relay::tracker", retry_after = wait.as_secs(), "relayer asked to back off");
        }
    }

    async fn cycle(&self, generation: u64) -> CycleReport {
        let (ids, snapshot) = {
            let mut state = self.state.lock().await;
            let TrackerState { cache, poll_set } = &mut *state;
            poll_set.prune(|id| cache.status(id).map_or(true, |s| s.is_terminal()));
            (poll_set.ids(), cache.snapshot())
        };

        let mut report = CycleReport::default();
        if ids.is_empty() {
            return report;
        }

        report.polled = ids.len();
        self.emit(PollEvent::CycleStarted { ids: ids.len() });
        debug!(target: "relay::tracker", ids = ids.len(), "poll cycle started");

        let api = &self.api;
        let results = join_all(ids.into_iter().map(|id| async move {
            let result = api.get_transfer(&id).await;
            (id, result)
        }))
        .await;

        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(target: "relay::tracker", "poll cycle cancelled, dropping responses");
                report.cancelled = true;
                return report;
            }

            for (id, result) in results {
                if !state.poll_set.contains(&id) {
                    continue;
                }
                match result {
                    Ok(transfer) if transfer.id != id => {
                        warn!(target: "relay::tracker", %id, returned = %transfer.id, "relayer answered with a different id");
                        report.failed += 1;
                    }
                    Ok(transfer) => {
                        if let MergeOutcome::Updated { previous, current } =
                            state.cache.merge(transfer, snapshot)
                        {
                            if previous != current {
                                report.updated += 1;
                                info!(target: "relay::tracker", %id, %previous, %current, "status changed");
                                events.push(PollEvent::StatusChanged {
                                    id: id.clone(),
                                    previous,
                                    current,
                                });
                            }
                        }
                        if !state.sync_poll_set(&id) {
                            if let Some(status) = state.cache.status(&id) {
                                report.settled.push(id.clone());
                                events.push(PollEvent::Settled { id, status });
                            }
                        }
                    }
                    Err(e) if e.kind == ApiErrorKind::NotFound => {
                        warn!(target: "relay::tracker", %id, "transfer no longer known to relayer");
                        state.cache.evict(&id);
                        state.poll_set.remove(&id);
                        report.evicted.push(id.clone());
                        events.push(PollEvent::Evicted { id });
                    }
                    Err(e) => {
                        debug!(target: "relay::tracker", %id, kind = %e.kind, error = %e.message, "poll failed");
                        self.note_error(&e);
                        report.failed += 1;
                        events.push(PollEvent::FetchFailed {
                            id,
                            kind: e.kind,
                            message: e.message,
                        });
                    }
                }
            }
            report.remaining = state.poll_set.len();
        }

        for event in events {
            self.emit(event);
        }
        report
    }

    /// Clear the runner slot if nothing is left to poll and the slot still
    /// belongs to `generation`.
    async fn retire_if_idle(&self, generation: u64) -> bool {
        let state = self.state.lock().await;
        if !state.poll_set.is_empty() {
            return false;
        }
        let mut slot = self.runner_slot();
        match slot.as_ref() {
            Some(runner) if runner.generation == generation => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}

async fn run(weak: Weak<Shared>, generation: u64, mut cancelled: watch::Receiver<bool>) {
    let period = match weak.upgrade() {
        Some(shared) => shared.config.interval(),
        None => return,
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            _ = ticker.tick() => {}
        }

        // Only a weak handle is held while sleeping.
        let Some(wait) = weak.upgrade().map(|shared| shared.backoff_remaining()) else {
            break;
        };
        if let Some(wait) = wait {
            tokio::select! {
                _ = cancelled.changed() => break,
                _ = sleep(wait) => {}
            }
        }

        if *cancelled.borrow() {
            break;
        }
        let Some(shared) = weak.upgrade() else {
            break;
        };

        let report = tokio::select! {
            _ = cancelled.changed() => break,
            report = shared.cycle(generation) => report,
        };
        if report.cancelled {
            break;
        }

        if report.remaining == 0 && shared.retire_if_idle(generation).await {
            info!(target: "relay::tracker", "nothing left to poll, timer retired");
            shared.emit(PollEvent::Idle);
            break;
        }
        drop(shared);

        // Next cycle one full period after this one, never a catch-up burst.
        ticker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_api::MemoryRelayer;
    use relay_types::{BlockchainStatus, ComplianceStatus, TransferDetails};
    use tokio::sync::Semaphore;
    use BlockchainStatus::*;

    fn transfer(id: &str, status: BlockchainStatus) -> TransferRequest {
        let now = Utc::now();
        TransferRequest {
            id: id.to_string(),
            from_address: "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdpKuc147dw2N9d".into(),
            to_address: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM".into(),
            transfer_details: TransferDetails::public(1_000_000_000),
            token_mint: None,
            compliance_status: ComplianceStatus::Approved,
            blockchain_status: status,
            blockchain_signature: None,
            blockchain_retry_count: 0,
            blockchain_last_error: None,
            blockchain_next_retry_at: None,
            nonce: Some(format!("nonce-{}", id)),
            created_at: now,
            updated_at: now,
        }
    }

    fn manual() -> PollConfig {
        PollConfig {
            auto_start: false,
            ..PollConfig::default()
        }
    }

    fn tracker(relayer: &Arc<MemoryRelayer>, config: PollConfig) -> Tracker {
        let api: Arc<dyn RelayerApi> = relayer.clone();
        Tracker::new(api, config, None)
    }

    fn recording(
        relayer: &Arc<MemoryRelayer>,
        config: PollConfig,
    ) -> (Tracker, Arc<StdMutex<Vec<PollEvent>>>) {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        let api: Arc<dyn RelayerApi> = relayer.clone();
        let handler: PollEventHandler = Box::new(move |e: PollEvent| sink.lock().unwrap().push(e));
        (Tracker::new(api, config, Some(handler)), events)
    }

    async fn wait_for_get(relayer: &MemoryRelayer, id: &str, count: usize) {
        while relayer.get_count(id) < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_empty_poll_set_makes_no_calls() {
        let relayer = Arc::new(MemoryRelayer::new());
        let tracker = tracker(&relayer, manual());

        let report = tracker.poll_once().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert!(relayer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_transfer_is_never_polled() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Confirmed));
        let tracker = tracker(&relayer, PollConfig::default());

        tracker.admit(transfer("t1", Confirmed)).await;
        assert!(!tracker.is_polling("t1").await);
        assert!(!tracker.is_running());

        tracker.poll_once().await.unwrap();
        assert_eq!(relayer.get_count("t1"), 0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_cycle() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        relayer.insert(transfer("t2", Processing));
        relayer.fail_next_get(
            "t1",
            ApiError::new(ApiErrorKind::BlockchainError, "rpc unavailable").with_status(503),
        );
        relayer.script("t2", [Confirmed]);

        let (tracker, events) = recording(&relayer, manual());
        tracker.admit(transfer("t1", Processing)).await;
        tracker.admit(transfer("t2", Processing)).await;

        let report = tracker.poll_once().await.unwrap();
        assert_eq!(report.polled, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.settled, vec!["t2".to_string()]);
        assert_eq!(report.remaining, 1);

        assert!(tracker.is_polling("t1").await);
        assert_eq!(tracker.get("t1").await.unwrap().blockchain_status, Processing);
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            PollEvent::FetchFailed { id, kind: ApiErrorKind::BlockchainError, .. } if id == "t1"
        )));
    }

    #[tokio::test]
    async fn test_not_found_evicts() {
        let relayer = Arc::new(MemoryRelayer::new());
        let tracker = tracker(&relayer, manual());
        tracker.admit(transfer("gone", Received)).await;

        let report = tracker.poll_once().await.unwrap();
        assert_eq!(report.evicted, vec!["gone".to_string()]);
        assert!(tracker.get("gone").await.is_none());
        assert!(!tracker.is_polling("gone").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_is_polled_no_further() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        relayer.script("t1", [Confirmed]);
        let (tracker, events) = recording(&relayer, PollConfig::default());

        tracker.admit(transfer("t1", Processing)).await;
        assert!(tracker.is_running());

        sleep(Duration::from_secs(30)).await;
        assert_eq!(relayer.get_count("t1"), 1);
        assert!(!tracker.is_polling("t1").await);
        assert!(!tracker.is_running());
        assert_eq!(tracker.get("t1").await.unwrap().blockchain_status, Confirmed);

        let events = events.lock().unwrap();
        assert!(events.contains(&PollEvent::Settled {
            id: "t1".into(),
            status: Confirmed
        }));
        assert_eq!(events.last(), Some(&PollEvent::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_polls_on_interval() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        let tracker = tracker(&relayer, PollConfig::default());
        tracker.admit(transfer("t1", Processing)).await;

        sleep(Duration::from_millis(4_900)).await;
        assert_eq!(relayer.get_count("t1"), 0);
        sleep(Duration::from_millis(10_200)).await;
        assert_eq!(relayer.get_count("t1"), 3);

        tracker.stop().await;
        sleep(Duration::from_secs(30)).await;
        assert_eq!(relayer.get_count("t1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_poll_delays_next_cycle() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        relayer.fail_next_get(
            "t1",
            ApiError::new(ApiErrorKind::RateLimited, "slow down").with_retry_after(20),
        );
        let tracker = tracker(&relayer, PollConfig::default());
        tracker.admit(transfer("t1", Processing)).await;

        sleep(Duration::from_millis(5_100)).await;
        assert_eq!(relayer.get_count("t1"), 1);
        assert!(tracker.check_backoff().is_err());

        // Next tick at 10s waits out the back-off until 25s.
        sleep(Duration::from_secs(15)).await;
        assert_eq!(relayer.get_count("t1"), 1);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(relayer.get_count("t1"), 2);
        assert!(tracker.check_backoff().is_ok());

        tracker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_tracker_stops_polling() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        relayer.fail_next_get(
            "t1",
            ApiError::new(ApiErrorKind::RateLimited, "slow down").with_retry_after(20),
        );
        let tracker = tracker(&relayer, PollConfig::default());
        tracker.admit(transfer("t1", Processing)).await;

        // Dropped while the timer is sleeping out the back-off.
        sleep(Duration::from_secs(12)).await;
        assert_eq!(relayer.get_count("t1"), 1);
        drop(tracker);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(relayer.get_count("t1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_tracker_stops_idle_timer() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        let tracker = tracker(&relayer, PollConfig::default());
        tracker.admit(transfer("t1", Processing)).await;
        let clone = tracker.clone();

        sleep(Duration::from_millis(5_100)).await;
        assert_eq!(relayer.get_count("t1"), 1);

        // One clone going away keeps the timer alive.
        drop(tracker);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(relayer.get_count("t1"), 2);

        drop(clone);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(relayer.get_count("t1"), 2);
    }

    #[tokio::test]
    async fn test_poll_once_honours_backoff() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        relayer.fail_next_get(
            "t1",
            ApiError::new(ApiErrorKind::RateLimited, "slow down").with_retry_after(30),
        );
        let tracker = tracker(&relayer, manual());
        tracker.admit(transfer("t1", Processing)).await;

        let report = tracker.poll_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let err = tracker.poll_once().await.unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::RateLimited);
        assert_eq!(relayer.get_count("t1"), 1);
    }

    #[tokio::test]
    async fn test_poll_once_defers_to_running_timer() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        let tracker = tracker(&relayer, manual());
        tracker.admit(transfer("t1", Processing)).await;
        assert!(tracker.start().await);

        let report = tracker.poll_once().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert_eq!(relayer.get_count("t1"), 0);
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_starts_timer_for_live_transfer() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        relayer.insert(transfer("t2", Confirmed));
        let tracker = tracker(&relayer, PollConfig::default());

        tracker.refresh("t2").await.unwrap();
        assert!(!tracker.is_running());

        tracker.refresh("t1").await.unwrap();
        assert!(tracker.is_polling("t1").await);
        assert!(tracker.is_running());
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_stop_discards_in_flight_responses() {
        let gate = Arc::new(Semaphore::new(0));
        let relayer = Arc::new(MemoryRelayer::new().with_get_gate(gate.clone()));
        relayer.insert(transfer("t1", Processing));
        relayer.script("t1", [Confirmed]);
        let tracker = tracker(&relayer, manual());
        tracker.admit(transfer("t1", Processing)).await;

        let polling = tracker.clone();
        let cycle = tokio::spawn(async move { polling.poll_once().await });
        wait_for_get(&relayer, "t1", 1).await;

        tracker.stop().await;
        gate.add_permits(1);
        let report = cycle.await.unwrap().unwrap();

        assert!(report.cancelled);
        assert_eq!(tracker.get("t1").await.unwrap().blockchain_status, Processing);
        assert!(tracker.polling_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_does_not_duplicate_timer() {
        let relayer = Arc::new(MemoryRelayer::new());
        let tracker = tracker(&relayer, manual());
        assert!(!tracker.start().await);

        tracker.admit(transfer("t1", Processing)).await;
        assert!(!tracker.is_running());
        assert!(tracker.start().await);
        assert!(!tracker.start().await);
        assert!(tracker.is_running());

        tracker.stop().await;
        assert!(!tracker.is_running());
        assert!(!tracker.is_polling("t1").await);

        // Remount picks the live transfer back up.
        assert!(tracker.start().await);
        assert!(tracker.is_polling("t1").await);
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_retry_supersedes_in_flight_poll() {
        let gate = Arc::new(Semaphore::new(0));
        let relayer = Arc::new(MemoryRelayer::new().with_get_gate(gate.clone()));
        relayer.insert(transfer("t1", Submitted));
        relayer.script("t1", [Failed]);
        let tracker = tracker(&relayer, manual());
        tracker.admit(transfer("t1", Submitted)).await;

        let polling = tracker.clone();
        let cycle = tokio::spawn(async move { polling.poll_once().await });
        wait_for_get(&relayer, "t1", 1).await;

        let outcome = tracker.track_retry(transfer("t1", Processing)).await;
        assert!(outcome.applied());
        gate.add_permits(1);
        let report = cycle.await.unwrap().unwrap();

        assert!(!report.cancelled);
        assert!(report.settled.is_empty());
        assert_eq!(tracker.get("t1").await.unwrap().blockchain_status, Processing);
        assert!(tracker.is_polling("t1").await);
    }

    #[tokio::test]
    async fn test_refresh_surfaces_errors() {
        let relayer = Arc::new(MemoryRelayer::new());
        relayer.insert(transfer("t1", Processing));
        let tracker = tracker(&relayer, manual());
        tracker.admit(transfer("t1", Processing)).await;

        relayer.set_status("t1", Submitted);
        let fresh = tracker.refresh("t1").await.unwrap();
        assert_eq!(fresh.blockchain_status, Submitted);

        relayer.fail_next_get("t1", ApiError::new(ApiErrorKind::Timeout, "timed out"));
        let err = tracker.refresh("t1").await.unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Timeout);
        assert!(tracker.is_polling("t1").await);

        let err = tracker.refresh("missing").await.unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_page_does_not_start_polling() {
        let relayer = Arc::new(MemoryRelayer::new());
        let tracker = tracker(&relayer, PollConfig::default());

        let snapshot = tracker.snapshot().await;
        let applied = tracker
            .merge_page(vec![transfer("a", Processing), transfer("b", Confirmed)], snapshot)
            .await;
        assert_eq!(applied, 2);
        assert_eq!(tracker.transfers().await.len(), 2);
        assert!(tracker.polling_ids().await.is_empty());
        assert!(!tracker.is_running());
    }
}
