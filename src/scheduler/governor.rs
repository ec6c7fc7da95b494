//! Bounded admission of chain runs and the completion barrier.
//!
//! The governor owns a counting semaphore with one permit per unit of
//! capacity. `submit` waits for a permit, then spawns the chain as its own
//! task holding that permit; the permit is released the moment the chain
//! finishes, not on the next submission. Waiting submitters are served in
//! the order they started waiting because tokio's semaphore is fair.
//!
//! `await_all` consumes the governor and drains every spawned task, so it
//! can only be reached once and only after the last `submit`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, warn};

use super::job::{ChainOutcome, PipelineRun};
use crate::pipeline::{ChainRunner, WorkItem};

/// Errors that can occur in the governor.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Capacity must be a positive integer.
    #[error("Concurrency capacity must be greater than 0")]
    ZeroCapacity,

    /// The admission semaphore was closed.
    #[error("Governor is closed")]
    Closed,
}

/// Statistics about the governor.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Maximum number of concurrently running chains.
    pub capacity: usize,
    /// Chains currently running.
    pub active: usize,
    /// Highest number of chains ever running at once.
    pub peak_active: usize,
    /// Chains admitted so far.
    pub admitted: u64,
    /// Chains that completed successfully.
    pub completed: u64,
    /// Chains that failed.
    pub failed: u64,
}

/// Shared state for tracking governor statistics.
struct SharedPoolStats {
    active: AtomicUsize,
    peak_active: AtomicUsize,
    admitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            admitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Records an admission and returns the new number of running chains.
    fn admit(&self) -> usize {
        self.admitted.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
        active
    }

    fn release(&self, outcome: &ChainOutcome) {
        if outcome.is_success() {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, capacity: usize) -> PoolStats {
        PoolStats {
            capacity,
            active: self.active.load(Ordering::SeqCst),
            peak_active: self.peak_active.load(Ordering::SeqCst),
            admitted: self.admitted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Admits chain runs up to a fixed capacity and waits for all of them.
pub struct Governor<R: ChainRunner> {
    capacity: usize,
    runner: Arc<R>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<ChainOutcome>>,
    identifiers: Mutex<HashMap<Id, String>>,
    stats: Arc<SharedPoolStats>,
}

impl<R: ChainRunner> Governor<R> {
    /// Creates a governor admitting at most `capacity` concurrent chains.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ZeroCapacity` if `capacity` is 0.
    pub fn new(capacity: usize, runner: R) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            runner: Arc::new(runner),
            permits: Arc::new(Semaphore::new(capacity)),
            tasks: Mutex::new(JoinSet::new()),
            identifiers: Mutex::new(HashMap::new()),
            stats: Arc::new(SharedPoolStats::new()),
        })
    }

    /// Waits until capacity is free, then launches `item`'s chain and returns.
    ///
    /// The chain keeps running after this returns. Concurrent callers are
    /// admitted in the order they began waiting.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Closed` if the admission semaphore was closed.
    pub async fn submit(&self, item: WorkItem) -> Result<(), PoolError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let active = self.stats.admit();
        debug_assert!(
            active <= self.capacity,
            "{} chains running with capacity {}",
            active,
            self.capacity
        );
        debug!(identifier = %item.identifier, active, "Admitted chain");

        let identifier = item.identifier.clone();
        let runner = Arc::clone(&self.runner);
        let stats = Arc::clone(&self.stats);

        let handle = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.spawn(async move {
                let mut run = PipelineRun::new(item);
                run.start();
                let reported = runner.run(run.item()).await;
                let outcome = run.finish(reported);
                stats.release(&outcome);
                drop(permit);
                outcome
            })
        };
        self.identifiers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.id(), identifier);

        Ok(())
    }

    /// Returns current governor statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.capacity)
    }

    /// Blocks until every admitted chain reached a terminal state.
    ///
    /// Outcomes are returned in completion order. A chain task that panicked
    /// is reported as a failed outcome for its item.
    pub async fn await_all(self) -> (Vec<ChainOutcome>, PoolStats) {
        let mut tasks = self.tasks.into_inner().unwrap_or_else(|e| e.into_inner());
        let mut identifiers = self
            .identifiers
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        let mut outcomes = Vec::with_capacity(tasks.len());

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    identifiers.remove(&id);
                    if outcome.is_success() {
                        debug!(
                            identifier = %outcome.identifier,
                            duration_ms = outcome.duration_ms,
                            "Chain completed"
                        );
                    } else {
                        warn!(
                            identifier = %outcome.identifier,
                            stage = ?outcome.failed_stage,
                            error = ?outcome.error,
                            "Chain failed"
                        );
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    let identifier = identifiers
                        .remove(&e.id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    error!(identifier = %identifier, error = %e, "Chain task panicked");
                    // The task died before releasing its slot in the stats.
                    self.stats.active.fetch_sub(1, Ordering::SeqCst);
                    self.stats.failed.fetch_add(1, Ordering::SeqCst);
                    outcomes.push(ChainOutcome::aborted(identifier, e.to_string()));
                }
            }
        }

        let stats = self.stats.to_pool_stats(self.capacity);
        (outcomes, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OutputLayout;
    use crate::scheduler::ChainState;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::time::Duration;

    /// Runner that sleeps for a per-item duration and records concurrency.
    struct InstrumentedRunner {
        delays: HashMap<String, Duration>,
        fail: Option<String>,
        live: AtomicUsize,
        max_live: AtomicUsize,
        started: Mutex<Vec<String>>,
    }

    impl InstrumentedRunner {
        fn new(delays: HashMap<String, Duration>) -> Self {
            Self {
                delays,
                fail: None,
                live: AtomicUsize::new(0),
                max_live: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, identifier: &str) -> Self {
            self.fail = Some(identifier.to_string());
            self
        }
    }

    #[async_trait]
    impl ChainRunner for InstrumentedRunner {
        async fn run(&self, item: &WorkItem) -> ChainOutcome {
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_live.fetch_max(live, Ordering::SeqCst);
            self.started
                .lock()
                .expect("lock")
                .push(item.identifier.clone());

            let delay = self
                .delays
                .get(&item.identifier)
                .copied()
                .unwrap_or(Duration::from_millis(5));
            tokio::time::sleep(delay).await;

            self.live.fetch_sub(1, Ordering::SeqCst);
            if self.fail.as_deref() == Some(item.identifier.as_str()) {
                ChainOutcome::failed(
                    &item.identifier,
                    &crate::error::StageError::NonZeroExit {
                        stage: "fixer".to_string(),
                        code: 1,
                    },
                    Duration::ZERO,
                )
            } else {
                ChainOutcome::completed(&item.identifier, Duration::ZERO)
            }
        }
    }

    fn items(names: &[&str]) -> Vec<WorkItem> {
        let layout = OutputLayout::new("pred", "connected", ".err");
        names.iter().map(|n| layout.work_item(*n)).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let runner = InstrumentedRunner::new(HashMap::new());
        assert!(matches!(
            Governor::new(0, runner),
            Err(PoolError::ZeroCapacity)
        ));
    }

    #[tokio::test]
    async fn test_capacity_is_never_exceeded() {
        let names: Vec<String> = (0..12).map(|i| format!("f{:02}.conllu", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let delays = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), Duration::from_millis(5 + (i as u64 * 7) % 20)))
            .collect();

        let governor = Governor::new(3, InstrumentedRunner::new(delays)).expect("governor");
        let runner = Arc::clone(&governor.runner);
        for item in items(&refs) {
            governor.submit(item).await.expect("submit");
            assert!(governor.stats().active <= 3);
        }
        let (outcomes, stats) = governor.await_all().await;

        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.iter().all(|o| o.state.is_terminal()));
        assert!(runner.max_live.load(Ordering::SeqCst) <= 3);
        assert!(stats.peak_active <= 3);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.admitted, 12);
        assert_eq!(stats.completed, 12);
    }

    #[tokio::test]
    async fn test_capacity_released_on_completion() {
        let delays = HashMap::from([
            ("slow.conllu".to_string(), Duration::from_millis(500)),
            ("fast.conllu".to_string(), Duration::from_millis(1)),
        ]);
        let governor = Governor::new(1, InstrumentedRunner::new(delays)).expect("governor");

        let start = std::time::Instant::now();
        for item in items(&["fast.conllu", "slow.conllu"]) {
            governor.submit(item).await.expect("submit");
        }
        // The second submission only waited for the fast chain.
        assert!(start.elapsed() < Duration::from_millis(400));

        let (outcomes, _) = governor.await_all().await;
        assert_eq!(outcomes.len(), 2);

        // Durations are measured from admission, whatever the runner reports.
        let slow = outcomes
            .iter()
            .find(|o| o.identifier == "slow.conllu")
            .expect("slow outcome");
        assert!(slow.duration_ms >= 500, "{:?}", slow);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_siblings() {
        let runner = InstrumentedRunner::new(HashMap::new()).failing("b.conllu");
        let governor = Governor::new(2, runner).expect("governor");

        for item in items(&["a.conllu", "b.conllu", "c.conllu"]) {
            governor.submit(item).await.expect("submit");
        }
        let (mut outcomes, stats) = governor.await_all().await;
        outcomes.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let states: Vec<ChainState> = outcomes.iter().map(|o| o.state).collect();
        assert_eq!(
            states,
            vec![ChainState::Completed, ChainState::Failed, ChainState::Completed]
        );
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_waiting_submissions_admitted_in_order() {
        let delays = HashMap::from([("hold.conllu".to_string(), Duration::from_millis(50))]);
        let governor = Governor::new(1, InstrumentedRunner::new(delays)).expect("governor");
        let runner = Arc::clone(&governor.runner);

        let mut queue = items(&["hold.conllu", "a.conllu", "b.conllu", "c.conllu"]).into_iter();
        governor
            .submit(queue.next().expect("item"))
            .await
            .expect("submit");

        // All three wait on the full pool; join! polls them in argument order.
        let (a, b, c) = tokio::join!(
            governor.submit(queue.next().expect("item")),
            governor.submit(queue.next().expect("item")),
            governor.submit(queue.next().expect("item")),
        );
        a.expect("submit a");
        b.expect("submit b");
        c.expect("submit c");

        let (outcomes, _) = governor.await_all().await;
        assert_eq!(outcomes.len(), 4);

        let started = runner.started.lock().expect("lock").clone();
        assert_eq!(
            started,
            vec!["hold.conllu", "a.conllu", "b.conllu", "c.conllu"]
        );
    }

    #[tokio::test]
    async fn test_await_all_with_no_submissions() {
        let governor =
            Governor::new(4, InstrumentedRunner::new(HashMap::new())).expect("governor");
        let (outcomes, stats) = governor.await_all().await;

        assert!(outcomes.is_empty());
        assert_eq!(stats.admitted, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_running_chains_never_exceed_capacity(
            capacity in 1usize..5,
            delays in proptest::collection::vec(0u64..15, 1..20),
        ) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .expect("runtime");

            let names: Vec<String> = (0..delays.len()).map(|i| format!("f{}.conllu", i)).collect();
            let delay_map: HashMap<String, Duration> = names
                .iter()
                .cloned()
                .zip(delays.iter().map(|ms| Duration::from_millis(*ms)))
                .collect();

            let (max_live, outcomes, stats) = rt.block_on(async {
                let governor = Governor::new(capacity, InstrumentedRunner::new(delay_map))
                    .expect("governor");
                let runner = Arc::clone(&governor.runner);
                let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                for item in items(&refs) {
                    governor.submit(item).await.expect("submit");
                }
                let (outcomes, stats) = governor.await_all().await;
                (runner.max_live.load(Ordering::SeqCst), outcomes, stats)
            });

            prop_assert!(max_live <= capacity);
            prop_assert!(stats.peak_active <= capacity);
            prop_assert_eq!(outcomes.len(), names.len());
            prop_assert_eq!(stats.active, 0);
        }
    }
}
