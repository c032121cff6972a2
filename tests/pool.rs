//! Pool scheduling behaviour against a mock engine.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use anyhow::Result;
use h2_pool::{ConnectionFactory, ConnectionPool, Destination, Error, PoolConfig, Session};
use tokio_test::{assert_err, assert_ok};

use common::{MockEngine, eventually, init_tracing, pipe_dial_fn, within};

// ============================================================================
// Helpers
// ============================================================================

fn pool_with_cap(engine: &Arc<MockEngine>, cap: usize) -> ConnectionPool {
    let factory =
        ConnectionFactory::new(engine.clone()).with_dial_fn(pipe_dial_fn(Arc::new(AtomicUsize::new(0))));
    ConnectionPool::new(
        factory,
        PoolConfig {
            max_conns_per_host: cap,
            ..PoolConfig::default()
        },
    )
}

fn destination() -> Destination {
    Destination::new("api.example.com", 443)
}

/// Issues requests until the pool holds `count` connections.
async fn grow_to(pool: &ConnectionPool, dest: &Destination, count: usize) -> Result<()> {
    for _ in 0..count * 4 {
        if pool.connection_count(dest) >= count {
            break;
        }
        pool.get_connection(dest).await?;
        eventually(|| !pool.is_dialing(dest)).await;
    }
    anyhow::ensure!(pool.connection_count(dest) == count, "pool did not grow");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cap_is_never_exceeded_under_concurrent_load() -> Result<()> {
    init_tracing();
    let engine = MockEngine::new();
    let pool = pool_with_cap(&engine, 3);
    let dest = destination();

    let mut tasks = Vec::new();
    for _ in 0..64 {
        let pool = pool.clone();
        let dest = dest.clone();
        tasks.push(tokio::spawn(async move {
            let mut max_seen = 0;
            for _ in 0..20 {
                let _ = pool.get_connection(&dest).await;
                max_seen = max_seen.max(pool.connection_count(&dest));
                tokio::task::yield_now().await;
            }
            max_seen
        }));
    }

    for task in tasks {
        let max_seen = task.await?;
        assert!(max_seen <= 3, "observed {max_seen} connections");
    }

    eventually(|| !pool.is_dialing(&dest)).await;
    assert!(pool.connection_count(&dest) <= 3);
    assert!(engine.sessions_created() <= 3);
    Ok(())
}

#[tokio::test]
async fn test_mark_dead_twice_is_noop() -> Result<()> {
    init_tracing();
    let engine = MockEngine::new();
    let pool = pool_with_cap(&engine, 2);
    let dest = destination();
    grow_to(&pool, &dest, 2).await?;

    let victim = pool.get_connection(&dest).await?;
    pool.mark_dead(&victim).await;
    pool.mark_dead(&victim).await;

    assert!(!pool.contains(&victim));
    assert_eq!(pool.connection_count(&dest), 1);
    assert_eq!(pool.group_count(), 1);

    let survivor = pool.get_connection(&dest).await?;
    assert_ne!(survivor, victim);
    Ok(())
}

#[tokio::test]
async fn test_empty_group_is_removed_and_next_request_dials_synchronously() -> Result<()> {
    init_tracing();
    let engine = MockEngine::new();
    let pool = pool_with_cap(&engine, 2);
    let dest = destination();
    grow_to(&pool, &dest, 2).await?;

    for session in engine.sessions() {
        session.close();
    }
    assert!(eventually(|| pool.group_count() == 0).await);
    assert_eq!(pool.total_connections(), 0);

    let before = engine.sessions_created();
    let fresh = pool.get_connection(&dest).await?;

    // Returned only after its own dial completed.
    assert_eq!(engine.sessions_created(), before + 1);
    assert!(pool.contains(&fresh));
    assert_eq!(pool.group_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_round_robin_visits_connections_evenly() -> Result<()> {
    init_tracing();
    let engine = MockEngine::new();
    let pool = pool_with_cap(&engine, 3);
    let dest = destination();
    grow_to(&pool, &dest, 3).await?;

    let rounds = 10;
    let mut visits = HashMap::new();
    for _ in 0..rounds {
        let connection = pool.get_connection(&dest).await?;
        *visits.entry(connection.id()).or_insert(0usize) += 1;
    }

    assert_eq!(visits.len(), 3);
    let min = visits.values().copied().min().unwrap_or(0);
    let max = visits.values().copied().max().unwrap_or(0);
    assert!(min >= rounds / 3, "visits: {visits:?}");
    assert!(max <= rounds.div_ceil(3), "visits: {visits:?}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_background_dial_in_flight() -> Result<()> {
    init_tracing();
    let engine = MockEngine::new();
    let pool = pool_with_cap(&engine, 10);
    let dest = destination();

    pool.get_connection(&dest).await?;
    engine.session(0).set_accepting(false);
    engine.hold();

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let pool = pool.clone();
        let dest = dest.clone();
        tasks.push(tokio::spawn(async move { pool.get_connection(&dest).await }));
    }
    for task in tasks {
        let err = assert_err!(task.await?);
        assert!(matches!(err, Error::NoAvailableConnection { .. }));
    }

    assert!(eventually(|| engine.in_flight() == 1).await);
    assert!(pool.is_dialing(&dest));
    assert_eq!(engine.max_in_flight(), 1);

    engine.release();
    assert!(eventually(|| pool.connection_count(&dest) == 2).await);
    assert!(eventually(|| !pool.is_dialing(&dest)).await);
    assert_eq!(engine.max_in_flight(), 1);
    Ok(())
}

#[tokio::test]
async fn test_cap_two_exhaustion_then_growth() -> Result<()> {
    init_tracing();
    let engine = MockEngine::new();
    let pool = pool_with_cap(&engine, 2);
    let dest = destination();

    let first = pool.get_connection(&dest).await?;
    assert_eq!(pool.connection_count(&dest), 1);

    engine.session(0).set_accepting(false);
    engine.hold();

    let err = assert_err!(pool.get_connection(&dest).await);
    assert!(matches!(err, Error::NoAvailableConnection { ref destination } if *destination == dest));
    assert!(pool.is_dialing(&dest));

    engine.release();
    assert!(eventually(|| pool.connection_count(&dest) == 2).await);

    let second = assert_ok!(pool.get_connection(&dest).await);
    assert_ne!(second, first);

    engine.session(1).set_accepting(false);
    let err = assert_err!(pool.get_connection(&dest).await);
    assert!(matches!(err, Error::NoAvailableConnection { .. }));
    assert!(!pool.is_dialing(&dest), "at cap, no growth dial");
    Ok(())
}

#[tokio::test]
async fn test_failed_background_dial_is_retried_by_next_request() -> Result<()> {
    init_tracing();
    let engine = MockEngine::new();
    let pool = pool_with_cap(&engine, 2);
    let dest = destination();

    pool.get_connection(&dest).await?;
    engine.fail_next(1);

    pool.get_connection(&dest).await?;
    assert!(eventually(|| !pool.is_dialing(&dest)).await);
    assert_eq!(pool.connection_count(&dest), 1);

    pool.get_connection(&dest).await?;
    assert!(eventually(|| pool.connection_count(&dest) == 2).await);
    Ok(())
}

#[tokio::test]
async fn test_failed_first_dial_surfaces_to_caller() -> Result<()> {
    init_tracing();
    let engine = MockEngine::new();
    engine.fail_next(1);
    let pool = pool_with_cap(&engine, 2);
    let dest = destination();

    let err = assert_err!(pool.get_connection(&dest).await);
    assert!(err.is_dial_error());
    assert_eq!(pool.group_count(), 0);

    within(pool.get_connection(&dest)).await?;
    assert_eq!(pool.group_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_destinations_are_isolated() -> Result<()> {
    init_tracing();
    let engine = MockEngine::new();
    let pool = pool_with_cap(&engine, 1);
    let a = Destination::new("a.example", 443);
    let b = Destination::new("b.example", 443);

    let on_a = pool.get_connection(&a).await?;
    let on_b = pool.get_connection(&b).await?;

    assert_eq!(on_a.destination(), &a);
    assert_eq!(on_b.destination(), &b);
    assert_eq!(pool.group_count(), 2);

    pool.mark_dead(&on_a).await;
    assert_eq!(pool.group_count(), 1);
    assert!(pool.contains(&on_b));
    Ok(())
}
