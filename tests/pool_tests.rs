/// Connection lease tests
///
/// Every operation returns its lease on every exit path: success, conflict,
/// statement failure, lock timeout and cancellation.
/// Run with: cargo test --test pool_tests
mod common;

use async_trait::async_trait;
use common::*;
use occtx::{
    ChangeSet, ConnectionState, DbError, ErrorKind, Lease, OperationRequest, OptimisticExecutor,
    QueryResult, Session, Value,
};
use std::time::Duration;

#[tokio::test]
async fn test_outstanding_leases_unchanged_after_every_outcome() {
    let client = hotel().await;
    let before = client.stats();
    assert_eq!(before.outstanding, 0);

    // applied
    assert!(client.execute_optimistic(&checkin(309)).await.unwrap().is_applied());
    // conflicted
    assert!(client.execute_optimistic(&checkin(310)).await.unwrap().is_conflicted());
    // statement failure
    let bad = OperationRequest::new("reservations", snapshot())
        .changes(ChangeSet::new().set("no_such_column", 1));
    assert!(client.execute_optimistic(&bad).await.is_err());
    // request rejected before leasing
    let invalid = OperationRequest::new("reservations", Default::default());
    assert!(client.execute_optimistic(&invalid).await.is_err());

    let after = client.stats();
    assert_eq!(after.outstanding, 0);
    assert_eq!(after.acquired, after.released);
    assert_eq!(after.acquired - before.acquired, 3);
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_pool_exhausted() {
    let client = hotel_with(
        config()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(50)),
    )
    .await;
    let committed_before = client.database().transaction_stats().committed;

    let held = client.lease().await.unwrap();
    let err = client.execute_optimistic(&checkin(309)).await.unwrap_err();

    assert!(matches!(err, DbError::PoolExhausted(_)));
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert!(err.kind().is_transient());
    // nothing ran
    assert_eq!(client.database().transaction_stats().committed, committed_before);
    assert_eq!(client.stats().outstanding, 1);

    drop(held);
    assert!(client.execute_optimistic(&checkin(309)).await.unwrap().is_applied());
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_lock_timeout_rolls_back_and_returns_lease() {
    let client = hotel().await;
    let aborted_before = client.database().transaction_stats().aborted;

    let mut holder = client.lease().await.unwrap();
    holder.begin().unwrap();
    holder
        .execute("SELECT * FROM reservations WHERE id = $1 FOR UPDATE", &[RESERVATION.into()])
        .await
        .unwrap();

    let err = client.execute_optimistic(&checkin(309)).await.unwrap_err();
    assert!(matches!(err, DbError::LockTimeout { .. }));
    assert_eq!(err.kind(), ErrorKind::LockTimeout);

    // only the holder's lease and transaction remain
    assert_eq!(client.stats().outstanding, 1);
    assert_eq!(client.database().transaction_stats().active, 1);
    assert_eq!(client.database().transaction_stats().aborted, aborted_before + 1);

    holder.rollback().unwrap();
    drop(holder);

    assert!(client.execute_optimistic(&checkin(309)).await.unwrap().is_applied());
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_cancelled_operation_releases_lease_and_locks() {
    let client = hotel_with(config().lock_timeout(Duration::from_secs(5))).await;

    let mut holder = client.lease().await.unwrap();
    holder.begin().unwrap();
    holder
        .execute("SELECT * FROM reservations WHERE id = 43 FOR UPDATE", &[])
        .await
        .unwrap();

    // dropped while waiting for the row lock
    let request = checkin(309);
    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), client.execute_optimistic(&request)).await;
    assert!(cancelled.is_err());

    assert_eq!(client.stats().outstanding, 1);
    assert_eq!(client.database().transaction_stats().active, 1);

    drop(holder);
    assert_quiescent(&client);

    assert!(client.execute_optimistic(&request).await.unwrap().is_applied());
    assert_eq!(invoice_count(&client).await, 1);
}

/// Delays every INSERT so an operation can be cancelled after its UPDATE.
struct SlowInserts {
    lease: Lease,
}

#[async_trait]
impl Session for SlowInserts {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> occtx::Result<QueryResult> {
        if sql.starts_with("INSERT") {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.lease.execute(sql, params).await
    }

    fn in_transaction(&self) -> bool {
        self.lease.in_transaction()
    }

    fn abort(&mut self) -> occtx::Result<()> {
        Session::abort(&mut self.lease)
    }
}

#[tokio::test]
async fn test_cancelled_after_update_discards_pending_write() {
    let client = hotel().await;
    let mut session = SlowInserts {
        lease: client.lease().await.unwrap(),
    };

    let executor = OptimisticExecutor::new();
    let request = checkin(309);
    let run = executor.execute(&mut session, &request);
    assert!(tokio::time::timeout(Duration::from_millis(100), run).await.is_err());

    let conn = session.lease.connection_ref().unwrap();
    assert_eq!(conn.state(), ConnectionState::Idle);
    assert_eq!(client.database().locks_held().unwrap(), 0);
    drop(session);

    assert_eq!(room_no(&client).await, Value::Null);
    assert_eq!(invoice_count(&client).await, 0);
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_connections_are_reused() {
    let client = hotel_with(config().max_connections(2)).await;

    for room in 300..310 {
        let _ = client.execute_optimistic(&checkin(room)).await.unwrap();
    }

    let stats = client.stats();
    assert!(stats.total <= 2, "{}", stats);
    assert_eq!(stats.outstanding, 0);
}
