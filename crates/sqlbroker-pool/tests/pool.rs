//! Pool behavior tests against the scripted in-memory backend.
//!
//! Timing-sensitive tests run with a paused tokio clock, so the 15-second
//! startup backoff, 2-second checkout retry, and 20-second housekeeping
//! period elapse instantly in virtual time.

use std::sync::Arc;
use std::time::Duration;

use sqlbroker_backend::ConnectSpec;
use sqlbroker_pool::{Pool, PoolConfig, PoolError, PoolRegistry};
use sqlbroker_testing::TestBackend;
use tokio_test::{assert_err, assert_ok};

fn config(min: u32, max: u32) -> PoolConfig {
    PoolConfig::new()
        .min_connections(min)
        .max_connections(max)
        .debug_level(0)
}

async fn pool_with(backend: &TestBackend, config: PoolConfig) -> Pool<TestBackend> {
    match Pool::new(backend.clone(), config).await {
        Ok(pool) => pool,
        Err(err) => panic!("pool failed to start: {err}"),
    }
}

#[tokio::test(start_paused = true)]
async fn serialized_reuse_never_grows_past_minimum() {
    let backend = TestBackend::new();
    let pool = pool_with(&backend, config(1, 3)).await;

    // capacity x 2 sequential checkouts all hit the same single slot.
    for _ in 0..6 {
        let conn = assert_ok!(pool.acquire().await);
        assert_eq!(conn.id(), 0);
        drop(conn);
    }

    assert_eq!(pool.status().total, 1);
    assert_eq!(backend.total_connects(), 1);
    assert_eq!(pool.metrics().checkouts_successful, 6);
}

#[tokio::test(start_paused = true)]
async fn grows_to_capacity_then_reports_exhaustion() {
    let backend = TestBackend::new();
    let pool = pool_with(&backend, config(1, 3)).await;

    let a = assert_ok!(pool.acquire().await);
    let b = assert_ok!(pool.acquire().await);
    let c = assert_ok!(pool.acquire().await);

    // Three distinct holders, three distinct connections.
    let mut ids = vec![a.id(), b.id(), c.id()];
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert!(pool.status().is_at_capacity());

    // The capacity+1-th checkout fails after bounded retries, it never hangs.
    match pool.acquire().await {
        Err(PoolError::Exhausted { attempts }) => assert_eq!(attempts, 10),
        other => panic!("expected exhaustion, got {other:?}", other = other.map(|c| c.id())),
    }

    // Releasing one holder makes the next checkout succeed again.
    drop(a);
    let again = assert_ok!(pool.acquire().await);
    drop(again);
    drop(b);
    drop(c);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_holders_get_distinct_connections() {
    let backend = TestBackend::new();
    let pool = Arc::new(pool_with(&backend, config(8, 8)).await);
    let barrier = Arc::new(tokio::sync::Barrier::new(8));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        let barrier = Arc::clone(&barrier);
        tasks.spawn(async move {
            let conn = match pool.acquire().await {
                Ok(conn) => conn,
                Err(err) => panic!("acquire failed: {err}"),
            };
            let id = conn.id();
            // Hold until every task has checked out.
            barrier.wait().await;
            drop(conn);
            id
        });
    }

    let mut ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        ids.push(assert_ok!(joined));
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8, "two holders shared a connection");
}

#[tokio::test(start_paused = true)]
async fn failed_probe_replaces_connection_within_one_cycle() {
    let backend = TestBackend::new();
    let pool = pool_with(&backend, config(1, 1)).await;

    let Some(first) = backend.connection(0) else {
        panic!("no startup connection")
    };
    first.poison_ping();

    // One housekeeping period later the slot holds a fresh connection.
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert!(first.was_closed());
    assert_eq!(backend.total_connects(), 2);
    let metrics = pool.metrics();
    assert_eq!(metrics.probes_failed, 1);
    assert_eq!(metrics.recycles, 1);

    let conn = assert_ok!(pool.acquire().await);
    assert_eq!(conn.id(), 1);
}

#[tokio::test(start_paused = true)]
async fn closed_connection_detected_by_sweep() {
    let backend = TestBackend::new();
    let pool = pool_with(&backend, config(1, 1)).await;

    let Some(first) = backend.connection(0) else {
        panic!("no startup connection")
    };
    first.mark_closed();

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(backend.total_connects(), 2);
    drop(pool);
}

#[tokio::test(start_paused = true)]
async fn aged_out_connection_is_force_replaced() {
    let backend = TestBackend::new();
    // Tiny configured age still floors at 30 seconds.
    let pool = pool_with(&backend, config(1, 1).max_connection_age_days(0.000001)).await;

    // First sweep (t=20s): age under the 30s floor, probe passes.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(backend.total_connects(), 1);

    // Second sweep (t=40s): over the floor, replaced regardless of health.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(backend.total_connects(), 2);
    assert_eq!(pool.metrics().recycles, 1);
}

#[tokio::test(start_paused = true)]
async fn leaked_checkout_is_reclaimed_and_release_becomes_noop() {
    let backend = TestBackend::new();
    let pool = pool_with(&backend, config(1, 3).checkout_timeout_secs(1)).await;

    let leaked = assert_ok!(pool.acquire().await);
    assert_eq!(leaked.id(), 0);

    // Hold well past the checkout timeout; the next sweep reclaims the slot
    // even though the holder never released.
    tokio::time::sleep(Duration::from_secs(21)).await;
    assert!(leaked.held_for() >= Duration::from_secs(2));

    let Some(first) = backend.connection(0) else {
        panic!("no startup connection")
    };
    assert!(first.was_closed());
    assert_eq!(backend.total_connects(), 2);

    // A fresh caller gets the replacement without waiting on the leaker.
    let fresh = assert_ok!(pool.acquire().await);
    assert_eq!(fresh.id(), 1);
    drop(fresh);

    // The leaker's eventual return finds its slot gone: silent no-op.
    drop(leaked);
    assert_eq!(pool.metrics().releases_ignored, 1);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_replacement_is_retried_next_cycle() {
    let backend = TestBackend::new();
    let pool = pool_with(&backend, config(1, 1)).await;

    let Some(first) = backend.connection(0) else {
        panic!("no startup connection")
    };
    first.poison_ping();
    backend.fail_next_connects(1);

    // First sweep closes the bad connection but cannot open a replacement;
    // the slot is left empty for the next pass.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(first.was_closed());
    assert_eq!(backend.total_connects(), 1);
    assert_eq!(pool.status().available, 0);

    // Next sweep repairs the empty slot once the backend is reachable.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(backend.total_connects(), 2);
    let conn = assert_ok!(pool.acquire().await);
    assert_eq!(conn.id(), 1);
}

#[tokio::test(start_paused = true)]
async fn driver_warnings_are_drained_each_cycle() {
    let backend = TestBackend::new();
    let _pool = pool_with(&backend, config(1, 1)).await;

    let Some(first) = backend.connection(0) else {
        panic!("no startup connection")
    };
    first.push_warning("cursor left open");
    assert_eq!(first.pending_warnings(), 1);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(first.pending_warnings(), 0);
}

#[tokio::test(start_paused = true)]
async fn startup_retries_through_transient_connect_failures() {
    let backend = TestBackend::new();
    backend.fail_next_connects(3);

    let pool = pool_with(&backend, config(2, 4)).await;
    assert_eq!(pool.status().total, 2);
    assert_eq!(backend.total_connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn startup_gives_up_after_all_attempts() {
    let backend = TestBackend::new();
    backend.fail_next_connects(1000);

    match Pool::new(backend, config(1, 2)).await {
        Err(PoolError::Startup { attempts }) => assert_eq!(attempts, 20),
        Ok(_) => panic!("pool should not start"),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected_before_connecting() {
    let backend = TestBackend::new();
    let result = Pool::new(backend.clone(), config(5, 2)).await;
    assert!(matches!(result, Err(PoolError::Config(_))));
    assert_eq!(backend.total_connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn clean_shutdown_closes_everything() {
    let backend = TestBackend::new();
    let pool = pool_with(&backend, config(2, 4)).await;

    let conn = assert_ok!(pool.acquire().await);
    drop(conn);

    assert_ok!(pool.shutdown(Duration::from_secs(1)).await);
    assert!(!pool.is_available());
    assert!(backend.connections().iter().all(|c| c.was_closed()));
    assert_eq!(pool.metrics().connections_closed, 2);

    // The pool refuses checkouts after shutdown.
    assert_err!(pool.acquire().await);
}

#[tokio::test(start_paused = true)]
async fn shutdown_with_outstanding_handle_reports_unsafe_count() {
    let backend = TestBackend::new();
    let pool = pool_with(&backend, config(1, 3)).await;

    let held = assert_ok!(pool.acquire().await);

    match pool.shutdown(Duration::ZERO).await {
        Err(PoolError::UnsafeShutdown { connections }) => assert_eq!(connections, 1),
        other => panic!("expected unsafe shutdown report, got {other:?}"),
    }

    // The holder's connection was force-closed under it.
    let Some(first) = backend.connection(0) else {
        panic!("no startup connection")
    };
    assert!(first.was_closed());
    drop(held); // late release is a no-op, not a panic
}

#[tokio::test(start_paused = true)]
async fn shutdown_window_lets_holders_drain() {
    let backend = TestBackend::new();
    let pool = Arc::new(pool_with(&backend, config(1, 3)).await);

    let held = assert_ok!(pool.acquire().await);
    let returner = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(held);
    });

    // The holder returns inside the five-second window, so the shutdown is
    // safe even though a connection was out when it began.
    assert_ok!(pool.shutdown(Duration::from_secs(5)).await);
    assert_ok!(returner.await);
}

#[tokio::test(start_paused = true)]
async fn registry_keeps_one_pool_per_target() {
    let backend = TestBackend::new();
    let registry = {
        let backend = backend.clone();
        PoolRegistry::new(config(1, 3), move |_spec| backend.clone())
    };

    let reporting = ConnectSpec::new("postgres", "db://host:5432/reporting", "app", "secret");
    let archive = ConnectSpec::new("postgres", "db://host:5432/archive", "app", "secret");

    let first = assert_ok!(registry.get_or_create(&reporting).await);
    let second = assert_ok!(registry.get_or_create(&reporting).await);
    assert!(Arc::ptr_eq(&first, &second));

    let other = assert_ok!(registry.get_or_create(&archive).await);
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(registry.len().await, 2);

    // One connection still out when everything shuts down.
    let _held = assert_ok!(first.acquire().await);
    let forced = registry.shutdown_all(Duration::ZERO).await;
    assert_eq!(forced, 1);
    assert!(registry.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn held_for_tracks_checkout_duration() {
    let backend = TestBackend::new();
    let pool = pool_with(&backend, config(1, 1)).await;

    let conn = assert_ok!(pool.acquire().await);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(conn.held_for() >= Duration::from_secs(3));
}
