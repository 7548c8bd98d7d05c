//! Scheduling loop.
//!
//! The scheduler runs in one of two modes, picked once at startup:
//!
//! - one-shot ([`Scheduler::run_once`]): load the policies, roll each once
//!   at the current instant, return
//! - daemon ([`Scheduler::run`]): run until shutdown, driven by clock ticks,
//!   size checks, policy reloads and initialization requests
//!
//! In daemon mode every event, whoever produced it, is handled by a single
//! consumer loop and every roll runs to completion inside it. Two rolls never
//! run at the same time, and the policy working set needs no locking because
//! only the loop touches it.

mod event;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, Interval, MissedTickBehavior};

use crate::clock::{truncate_to_minute, truncate_to_second, Clock};
use crate::error::{Error, Result};
use crate::policy::RotationPolicy;
use crate::rotation::{RollStats, RotationEngine};
use crate::store::{IndexStore, PolicyStore};
use crate::trigger::{is_clock_boundary, should_roll};

pub use event::Event;

const CLOCK_QUEUE_DEPTH: usize = 16;

/// Timer periods for daemon mode.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the clock is sampled for whole-minute boundaries.
    pub clock_interval: Duration,
    /// How often size policies are measured.
    pub size_check_interval: Duration,
    /// How often the policy set is re-fetched.
    pub reload_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            clock_interval: Duration::from_secs(1),
            size_check_interval: Duration::from_secs(10),
            reload_interval: Duration::from_secs(10),
        }
    }
}

pub struct Scheduler<S: ?Sized, C> {
    engine: RotationEngine<S>,
    clock: Arc<C>,
    config: SchedulerConfig,
    /// Working set, replaced wholesale on reload.
    policies: Vec<RotationPolicy>,
    init_tx: mpsc::UnboundedSender<RotationPolicy>,
    init_rx: mpsc::UnboundedReceiver<RotationPolicy>,
    /// Policies with an initialization request in flight.
    pending_init: HashSet<String>,
}

impl<S, C> Scheduler<S, C>
where
    S: IndexStore + PolicyStore + ?Sized,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: C, config: SchedulerConfig) -> Self {
        let (init_tx, init_rx) = mpsc::unbounded_channel();
        Self {
            engine: RotationEngine::new(store),
            clock: Arc::new(clock),
            config,
            policies: Vec::new(),
            init_tx,
            init_rx,
            pending_init: HashSet::new(),
        }
    }

    pub fn policies(&self) -> &[RotationPolicy] {
        &self.policies
    }

    /// Fetch the policy set and make it the working set.
    ///
    /// An empty policy store clears the working set; any other failure keeps
    /// the previous one.
    pub async fn load(&mut self) -> Result<usize> {
        match self.engine.store().load_policies().await {
            Ok(load) => {
                if !load.rejected.is_empty() {
                    warn!("{} policy documents rejected", load.rejected.len());
                }
                self.policies = load.policies;
                Ok(self.policies.len())
            }
            Err(Error::NoPolicies) => {
                self.policies = Vec::new();
                Err(Error::NoPolicies)
            }
            Err(err) => Err(err),
        }
    }

    /// One-shot mode: roll every policy once at the current instant.
    ///
    /// Fails only when no policy could be loaded. Per-policy failures are
    /// logged and counted.
    pub async fn run_once(&mut self) -> Result<RollStats> {
        let start = Instant::now();
        self.load().await?;

        let now = self.clock.now();
        let mut stats = RollStats::new();
        for policy in &self.policies {
            match self.engine.roll(policy, now).await {
                Ok(outcome) => stats.record_outcome(&outcome),
                Err(err) => {
                    error!("{}: {}", policy.id, err);
                    stats.record_error(format!("{}: {}", policy.id, err));
                }
            }
        }

        stats.duration = start.elapsed();
        info!("{}", stats.summary());
        Ok(stats)
    }

    /// Daemon mode: load the policies, then handle events until `shutdown`
    /// changes.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let _ = self.reload().await;
        self.serve(shutdown).await
    }

    /// The daemon event loop, without the initial load.
    ///
    /// Callers that want to react to the startup load themselves call
    /// [`Scheduler::reload`] first and then this.
    pub async fn serve(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (clock_tx, mut clock_rx) = mpsc::channel(CLOCK_QUEUE_DEPTH);
        let producer = tokio::spawn(clock_producer(
            Arc::clone(&self.clock),
            self.config.clock_interval,
            clock_tx,
        ));
        let mut size_ticker = delayed_interval(self.config.size_check_interval);
        let mut reload_ticker = delayed_interval(self.config.reload_interval);

        info!(
            "Scheduler running with {} policies",
            self.policies.len()
        );
        loop {
            tokio::select! {
                Some(instant) = clock_rx.recv() => self.handle(Event::Clock(instant)).await,
                _ = size_ticker.tick() => self.handle(Event::SizeCheck).await,
                Some(policy) = self.init_rx.recv() => self.handle(Event::Init(policy)).await,
                _ = reload_ticker.tick() => self.handle(Event::Reload).await,
                _ = shutdown.changed() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }

        producer.abort();
        Ok(())
    }

    /// Handle one event. This is the only place rolls are started from in
    /// daemon mode.
    pub async fn handle(&mut self, event: Event) {
        debug!("Handling {}", event);
        match event {
            Event::Clock(instant) => {
                for policy in &self.policies {
                    if should_roll(policy, instant) {
                        self.attempt(policy, instant).await;
                    }
                }
            }
            Event::SizeCheck => {
                let now = self.clock.now();
                for policy in self.policies.iter().filter(|p| p.rolls_on_size()) {
                    self.attempt(policy, now).await;
                }
            }
            Event::Init(policy) => {
                self.pending_init.remove(&policy.id);
                let now = self.clock.now();
                self.attempt(&policy, now).await;
            }
            Event::Reload => {
                let _ = self.reload().await;
            }
        }
    }

    /// Reload the working set and request initialization for every policy
    /// whose write alias is missing. Returns the number of new requests.
    ///
    /// Load failures are logged and returned; the working set then follows
    /// the rules of [`Scheduler::load`].
    pub async fn reload(&mut self) -> Result<usize> {
        if let Err(err) = self.load().await {
            match &err {
                Error::NoPolicies => warn!(
                    "No valid rotation policies found, waiting till one exists"
                ),
                err => error!("Policy reload failed: {}", err),
            }
            return Err(err);
        }

        let mut requested = 0;
        for policy in &self.policies {
            if self.pending_init.contains(&policy.id) {
                continue;
            }
            match self.engine.store().exists(policy.write_alias()).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("{}: write alias missing, scheduling initial roll", policy.id);
                    if self.init_tx.send(policy.clone()).is_ok() {
                        self.pending_init.insert(policy.id.clone());
                        requested += 1;
                    }
                }
                Err(err) => warn!("{}: existence check failed: {}", policy.id, err),
            }
        }
        Ok(requested)
    }

    /// Take the next queued initialization request, if any.
    pub fn next_init_request(&mut self) -> Option<RotationPolicy> {
        self.init_rx.try_recv().ok()
    }

    async fn attempt(&self, policy: &RotationPolicy, instant: OffsetDateTime) {
        if let Err(err) = self.engine.roll(policy, instant).await {
            error!("{}: {}", policy.id, err);
        }
    }
}

/// Sample the clock every `period` and forward one whole-minute instant per
/// minute.
///
/// A minute is forwarded as soon as any sample falls inside it, so samples
/// that straddle `:00` (say `:59` then `:01`) still produce the boundary. The
/// minute the producer starts in is only forwarded when the first sample is
/// exactly on it.
async fn clock_producer<C: Clock>(
    clock: Arc<C>,
    period: Duration,
    tx: mpsc::Sender<OffsetDateTime>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_minute: Option<OffsetDateTime> = None;
    loop {
        ticker.tick().await;
        let now = truncate_to_second(clock.now());
        let minute = truncate_to_minute(now);
        if last_minute == Some(minute) {
            continue;
        }
        let first = last_minute.is_none();
        last_minute = Some(minute);
        if first && !is_clock_boundary(now) {
            continue;
        }
        if tx.send(minute).await.is_err() {
            break;
        }
    }
}

/// An interval whose first tick comes after one full period.
fn delayed_interval(period: Duration) -> Interval {
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use time::macros::datetime;

    fn scheduler(store: &Arc<MemoryStore>, clock: &ManualClock) -> Scheduler<MemoryStore, ManualClock> {
        Scheduler::new(Arc::clone(store), clock.clone(), SchedulerConfig::default())
    }

    #[tokio::test]
    async fn test_reload_requests_init_once() {
        let store = Arc::new(MemoryStore::new());
        store.put_policy("logs", r#"{"rollUnit": "days"}"#);
        let clock = ManualClock::new(datetime!(2024-05-01 10:15:30 UTC));
        let mut scheduler = scheduler(&store, &clock);

        assert_eq!(scheduler.reload().await.unwrap(), 1);
        // Still pending: a second reload does not queue a duplicate.
        assert_eq!(scheduler.reload().await.unwrap(), 0);

        let policy = scheduler.next_init_request().unwrap();
        assert!(scheduler.next_init_request().is_none());
        scheduler.handle(Event::Init(policy)).await;
        assert!(store.has_partition("logs_2024-05-01"));

        assert_eq!(scheduler.reload().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_working_set() {
        let store = Arc::new(MemoryStore::new());
        store.put_policy("logs", r#"{"rollUnit": "days"}"#);
        let clock = ManualClock::new(datetime!(2024-05-01 00:00:00 UTC));
        let mut scheduler = scheduler(&store, &clock);
        scheduler.load().await.unwrap();

        store.fail_next(crate::store::StoreCall::LoadPolicies);
        assert!(scheduler.reload().await.is_err());
        assert_eq!(scheduler.policies().len(), 1);

        store.remove_policy("logs");
        assert!(matches!(scheduler.reload().await, Err(Error::NoPolicies)));
        assert!(scheduler.policies().is_empty());
    }

    #[tokio::test]
    async fn test_clock_event_rolls_only_due_policies() {
        let store = Arc::new(MemoryStore::new());
        store.put_policy("hourly", r#"{"rollUnit": "hours"}"#);
        store.put_policy("daily", r#"{"rollUnit": "days"}"#);
        let clock = ManualClock::new(datetime!(2024-05-01 07:00:00 UTC));
        let mut scheduler = scheduler(&store, &clock);
        scheduler.load().await.unwrap();

        scheduler
            .handle(Event::Clock(datetime!(2024-05-01 07:00:00 UTC)))
            .await;
        assert_eq!(store.partition_names(), vec!["hourly_2024-05-01-07"]);
    }

    #[tokio::test]
    async fn test_roll_failure_does_not_stop_other_policies() {
        let store = Arc::new(MemoryStore::new());
        store.put_policy("a", r#"{"rollUnit": "minutes"}"#);
        store.put_policy("b", r#"{"rollUnit": "minutes"}"#);
        let clock = ManualClock::new(datetime!(2024-05-01 07:01:00 UTC));
        let mut scheduler = scheduler(&store, &clock);
        scheduler.load().await.unwrap();

        store.fail_next(crate::store::StoreCall::Create);
        scheduler
            .handle(Event::Clock(datetime!(2024-05-01 07:01:00 UTC)))
            .await;
        assert_eq!(store.partition_names(), vec!["b_2024-05-01-07-01"]);
    }

    #[tokio::test]
    async fn test_run_once_requires_policies() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(datetime!(2024-05-01 00:00:00 UTC));
        let mut scheduler = scheduler(&store, &clock);
        assert!(matches!(
            scheduler.run_once().await,
            Err(Error::NoPolicies)
        ));
    }

    #[tokio::test]
    async fn test_run_once_rolls_each_policy_past_failures() {
        let store = Arc::new(MemoryStore::new());
        store.put_policy("a", r#"{"rollUnit": "hours"}"#);
        store.put_policy("b", r#"{"rollUnit": "hours"}"#);
        store.put_policy("c", r#"{"rollUnit": "days"}"#);
        store.add_partition("c_2024-05-01");
        store.add_alias("c_2024-05-01", "c");
        let clock = ManualClock::new(datetime!(2024-05-01 10:15:30 UTC));
        let mut scheduler = scheduler(&store, &clock);

        // Policies load in id order, so "a" takes the injected failure.
        store.fail_next(crate::store::StoreCall::Create);
        let stats = scheduler.run_once().await.unwrap();

        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.rolled, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.has_errors());
        assert!(stats.errors[0].starts_with("a: "));
        assert_eq!(
            store.partition_names(),
            vec!["b_2024-05-01-10", "c_2024-05-01"]
        );
        assert_eq!(store.alias_members("b"), vec!["b_2024-05-01-10"]);
    }

    async fn next_tick(rx: &mut mpsc::Receiver<OffsetDateTime>) -> OffsetDateTime {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("tick forwarded")
            .expect("producer running")
    }

    #[tokio::test]
    async fn test_clock_producer_forwards_straddled_boundary() {
        let clock = ManualClock::new(datetime!(2024-05-01 23:59:30 UTC));
        let (tx, mut rx) = mpsc::channel(CLOCK_QUEUE_DEPTH);
        let producer = tokio::spawn(clock_producer(
            Arc::new(clock.clone()),
            Duration::from_millis(2),
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        clock.set(datetime!(2024-05-01 23:59:59 UTC));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "nothing due before midnight");

        // The sampler never sees :00, only the second after it.
        clock.set(datetime!(2024-05-02 00:00:01.250 UTC));
        assert_eq!(next_tick(&mut rx).await, datetime!(2024-05-02 00:00:00 UTC));

        tokio::time::sleep(Duration::from_millis(20)).await;
        clock.set(datetime!(2024-05-02 00:00:45 UTC));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "one tick per minute");

        clock.set(datetime!(2024-05-02 00:01:00 UTC));
        assert_eq!(next_tick(&mut rx).await, datetime!(2024-05-02 00:01:00 UTC));
        producer.abort();
    }

    #[tokio::test]
    async fn test_clock_producer_forwards_start_minute_only_on_boundary() {
        let clock = ManualClock::new(datetime!(2024-05-01 07:00:00 UTC));
        let (tx, mut rx) = mpsc::channel(CLOCK_QUEUE_DEPTH);
        let producer = tokio::spawn(clock_producer(
            Arc::new(clock.clone()),
            Duration::from_millis(2),
            tx,
        ));
        assert_eq!(next_tick(&mut rx).await, datetime!(2024-05-01 07:00:00 UTC));
        producer.abort();
    }
}
