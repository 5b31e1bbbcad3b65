//! Reconnect schedule of the connection manager, on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use pgbridge_core::{
    AuditLogger, ConnectionManager, ConnectionState, DatabaseTarget, PoolSettings,
};
use pgbridge_testing::{FakeConnector, Journal};
use rstest::rstest;

fn manager(connector: &FakeConnector) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        DatabaseTarget::new("sales", "postgres://bridge@sales-db/sales", ["recorder"]),
        PoolSettings::default(),
        Arc::new(connector.clone()),
        AuditLogger::new("pgbridge-test"),
    ))
}

fn expected_delays(failures: usize) -> Vec<Duration> {
    (0..failures)
        .map(|i| Duration::from_secs((1u64 << i.min(6)).min(60)))
        .collect()
}

#[rstest]
#[case::first_try(0)]
#[case::one_failure(1)]
#[case::three_failures(3)]
#[case::reaches_cap(7)]
#[case::stays_at_cap(9)]
#[tokio::test(start_paused = true)]
async fn test_reconnect_attempts_follow_backoff(#[case] failures: usize) {
    let connector = FakeConnector::new(Journal::new());
    let mgr = manager(&connector);
    connector.fail_next_probes(failures);

    mgr.reconnect().await.unwrap();

    let opens = connector.open_instants("sales");
    assert_eq!(opens.len(), failures + 1);
    let delays: Vec<Duration> = opens.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(delays, expected_delays(failures));

    let snapshot = mgr.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.attempt, 0);
    assert_eq!(snapshot.current_delay, Duration::from_secs(1));
    mgr.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_check_recovers_lost_connection() {
    let connector = FakeConnector::new(Journal::new());
    let mgr = manager(&connector);
    mgr.connect().await.unwrap();
    mgr.start_health_check();

    connector.set_down(true);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!mgr.is_connected());

    connector.set_down(false);
    tokio::time::sleep(Duration::from_secs(70)).await;
    assert!(mgr.is_connected());
    assert!(mgr.pool().is_some());

    mgr.shutdown().await;
    assert!(!mgr.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_backoff_sleep() {
    let connector = FakeConnector::new(Journal::new());
    let mgr = manager(&connector);
    mgr.connect().await.unwrap();
    mgr.start_health_check();
    connector.set_down(true);

    // Sequence is sleeping in its backoff by now.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(mgr.snapshot().reconnecting);

    let started = tokio::time::Instant::now();
    mgr.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!mgr.snapshot().reconnecting);
}
