use std::sync::Arc;
use std::time::{Duration, Instant};

use indexroll::{Event, ManualClock, MemoryStore, Scheduler, SchedulerConfig};
use time::macros::datetime;
use tokio::sync::watch;

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        clock_interval: Duration::from_millis(5),
        size_check_interval: Duration::from_millis(20),
        reload_interval: Duration::from_millis(20),
    }
}

async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn new_policy_gets_exactly_one_init_roll() {
    let store = Arc::new(MemoryStore::new());
    store.put_policy("logs", r#"{"rollUnit": "days"}"#);
    let clock = ManualClock::new(datetime!(2024-05-01 13:42:17 UTC));
    let mut scheduler = Scheduler::new(Arc::clone(&store), clock.clone(), fast_config());

    assert_eq!(scheduler.reload().await.expect("reload"), 1);
    let init = scheduler.next_init_request().expect("init request");
    scheduler.handle(Event::Init(init)).await;
    assert!(store.has_partition("logs_2024-05-01"));

    // A policy added between reloads bootstraps mid-period.
    store.put_policy("metrics", r#"{"rollUnit": "hours", "rollIncrement": 6}"#);
    assert_eq!(scheduler.reload().await.expect("reload"), 1);
    assert_eq!(scheduler.reload().await.expect("reload"), 0);

    let init = scheduler.next_init_request().expect("init request");
    assert_eq!(init.id, "metrics");
    assert!(scheduler.next_init_request().is_none());
    scheduler.handle(Event::Init(init)).await;

    assert_eq!(store.alias_members("metrics"), vec!["metrics_2024-05-01-13"]);
    assert_eq!(scheduler.reload().await.expect("reload"), 0);
}

#[tokio::test]
async fn size_check_rolls_full_partitions() {
    let store = Arc::new(MemoryStore::new());
    store.put_policy("sized", r#"{"rollUnit": "bytes", "rollSize": "1kb"}"#);
    store.put_policy("logs", r#"{"rollUnit": "days"}"#);
    let clock = ManualClock::new(datetime!(2024-05-01 08:00:00 UTC));
    let mut scheduler = Scheduler::new(Arc::clone(&store), clock.clone(), fast_config());
    scheduler.load().await.expect("load");

    scheduler.handle(Event::SizeCheck).await;
    assert_eq!(store.partition_names(), vec!["sized_2024-05-01-08-00-00"]);

    clock.advance(Duration::from_secs(10));
    scheduler.handle(Event::SizeCheck).await;
    assert_eq!(store.partition_names().len(), 1);

    store.set_primary_size("sized_2024-05-01-08-00-00", 1000);
    scheduler.handle(Event::SizeCheck).await;
    assert_eq!(
        store.alias_members("sized"),
        vec!["sized_2024-05-01-08-00-10"]
    );
}

#[tokio::test]
async fn daemon_runs_until_shutdown() {
    let store = Arc::new(MemoryStore::new());
    store.put_policy("logs", r#"{"rollUnit": "days"}"#);
    let clock = ManualClock::new(datetime!(2024-05-01 00:00:30 UTC));
    let mut scheduler = Scheduler::new(Arc::clone(&store), clock.clone(), fast_config());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let daemon = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    wait_for("initial roll", || store.has_partition("logs_2024-05-01")).await;

    clock.set(datetime!(2024-05-02 00:00:00 UTC));
    wait_for("midnight roll", || store.has_partition("logs_2024-05-02")).await;
    assert_eq!(store.alias_members("logs"), vec!["logs_2024-05-02"]);

    store.put_policy("metrics", r#"{"rollUnit": "hours"}"#);
    wait_for("reload bootstrap", || {
        store.has_partition("metrics_2024-05-02-00")
    })
    .await;

    store.put_policy("sized", r#"{"rollUnit": "bytes", "rollSize": "1kb"}"#);
    wait_for("size bootstrap", || {
        store.has_partition("sized_2024-05-02-00-00-00")
    })
    .await;
    clock.set(datetime!(2024-05-02 00:00:10 UTC));
    store.set_primary_size("sized_2024-05-02-00-00-00", 4096);
    wait_for("size roll", || store.has_partition("sized_2024-05-02-00-00-10")).await;

    shutdown_tx.send(true).expect("daemon listening");
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon stops")
        .expect("daemon task");
    assert!(result.is_ok());

    // Nothing rolled twice.
    assert_eq!(
        store.partition_names(),
        vec![
            "logs_2024-05-01",
            "logs_2024-05-02",
            "metrics_2024-05-02-00",
            "sized_2024-05-02-00-00-00",
            "sized_2024-05-02-00-00-10",
        ]
    );
}

#[tokio::test]
async fn daemon_waits_for_first_policy() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(datetime!(2024-05-01 09:30:00 UTC));
    let mut scheduler = Scheduler::new(Arc::clone(&store), clock.clone(), fast_config());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let daemon = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.partition_names().is_empty());

    store.put_policy("logs", r#"{"rollUnit": "months"}"#);
    wait_for("first policy", || store.has_partition("logs_2024-05")).await;

    shutdown_tx.send(true).expect("daemon listening");
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon stops")
        .expect("daemon task");
    assert!(result.is_ok());
}

#[tokio::test]
async fn startup_fetches_policies_once() {
    let store = Arc::new(MemoryStore::new());
    store.put_policy("logs", r#"{"rollUnit": "days"}"#);
    let clock = ManualClock::new(datetime!(2024-05-01 11:20:05 UTC));
    let config = SchedulerConfig {
        reload_interval: Duration::from_secs(3600),
        ..fast_config()
    };
    let mut scheduler = Scheduler::new(Arc::clone(&store), clock, config);

    assert_eq!(scheduler.reload().await.expect("startup load"), 1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let daemon = tokio::spawn(async move { scheduler.serve(shutdown_rx).await });

    wait_for("initial roll", || store.has_partition("logs_2024-05-01")).await;
    shutdown_tx.send(true).expect("daemon listening");
    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon stops")
        .expect("daemon task")
        .expect("clean shutdown");

    assert_eq!(store.policy_loads(), 1);
}
