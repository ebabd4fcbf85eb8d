/// Optimistic check-in tests
///
/// A front desk assigns a room and bills the stay in one operation that
/// commits only if the reservation is still as the desk saw it.
/// Run with: cargo test --test checkin_tests
mod common;

use common::*;
use occtx::{
    ChangeSet, ConflictResult, ErrorKind, ExecutorState, InsertSpec, OperationRequest,
    OperationResponse, OptimisticExecutor, Outcome, RowId, Value,
};

#[tokio::test]
async fn test_checkin_applied() {
    let client = hotel().await;

    let result = client.execute_optimistic(&checkin(309)).await.unwrap();

    match result {
        ConflictResult::Applied { affected_ids } => {
            assert_eq!(
                affected_ids,
                vec![
                    RowId::new("reservations", Value::Integer(RESERVATION)),
                    RowId::new("invoices", Value::Integer(1)),
                ]
            );
        }
        other => panic!("expected Applied, got {:?}", other),
    }

    assert_eq!(room_no(&client).await, Value::Integer(309));
    let invoices = client.query("SELECT * FROM invoices", &[]).await.unwrap();
    assert_eq!(invoices.row_count(), 1);
    assert_eq!(invoices.get(0, "res_id").unwrap(), &Value::Integer(RESERVATION));
    assert_eq!(invoices.get(0, "amount").unwrap(), &Value::Float(120.0));
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_checkin_conflicts_when_room_already_assigned() {
    let client = hotel().await;
    client
        .query("UPDATE reservations SET room_no = 310 WHERE id = 43", &[])
        .await
        .unwrap();

    let result = client.execute_optimistic(&checkin(309)).await.unwrap();

    match result {
        ConflictResult::Conflicted { current_values, record_missing } => {
            assert!(!record_missing);
            assert_eq!(current_values.len(), 1);
            assert_eq!(current_values["room_no"], Value::Integer(310));
        }
        other => panic!("expected Conflicted, got {:?}", other),
    }

    assert_eq!(room_no(&client).await, Value::Integer(310));
    assert_eq!(invoice_count(&client).await, 0);
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_checkin_conflicts_when_reservation_deleted_or_missing() {
    let client = hotel().await;
    let snapshot = [("id", Value::Integer(99)), ("room_no", Value::Null)].into_iter().collect();
    let request = OperationRequest::new("reservations", snapshot)
        .changes(ChangeSet::new().set("room_no", 309));

    let result = client.execute_optimistic(&request).await.unwrap();

    assert_eq!(
        result,
        ConflictResult::Conflicted {
            current_values: Default::default(),
            record_missing: true,
        }
    );
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_same_stale_snapshot_is_never_applied_twice() {
    let client = hotel().await;
    let request = checkin(309);

    assert!(client.execute_optimistic(&request).await.unwrap().is_applied());

    for _ in 0..3 {
        match client.execute_optimistic(&request).await.unwrap() {
            ConflictResult::Conflicted { current_values, .. } => {
                assert_eq!(current_values["room_no"], Value::Integer(309));
            }
            other => panic!("stale snapshot applied again: {:?}", other),
        }
    }

    assert_eq!(invoice_count(&client).await, 1);
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_snapshot_fields_outside_comparison_are_ignored() {
    let client = hotel().await;
    client
        .query("UPDATE reservations SET guest = 'Ada L.' WHERE id = 43", &[])
        .await
        .unwrap();

    // guest is not part of the snapshot, so the change does not conflict
    let result = client.execute_optimistic(&checkin(309)).await.unwrap();
    assert!(result.is_applied());
}

#[tokio::test]
async fn test_inserts_only_operation() {
    let client = hotel().await;
    let request = OperationRequest::new("reservations", snapshot()).insert(
        InsertSpec::new("invoices", Default::default())
            .value("res_id", RESERVATION)
            .value("amount", 15.5),
    );

    match client.execute_optimistic(&request).await.unwrap() {
        ConflictResult::Applied { affected_ids } => {
            assert_eq!(affected_ids, vec![RowId::new("invoices", Value::Integer(1))]);
        }
        other => panic!("expected Applied, got {:?}", other),
    }
    assert_eq!(room_no(&client).await, Value::Null);
}

#[tokio::test]
async fn test_failed_insert_rolls_back_update() {
    let client = hotel().await;
    let request = OperationRequest::new("reservations", snapshot())
        .changes(ChangeSet::new().set("room_no", 309))
        .insert(
            InsertSpec::new("invoices", Default::default())
                .value("res_id", 999)
                .value("amount", 120.0),
        );

    let err = client.execute_optimistic(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StatementFailure);
    assert!(err.to_string().contains("Foreign key"));
    assert_eq!(room_no(&client).await, Value::Null);
    assert_eq!(invoice_count(&client).await, 0);
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_traced_states() {
    let client = hotel().await;
    let executor = OptimisticExecutor::new();

    let mut lease = client.lease().await.unwrap();
    let applied = executor.execute_traced(&mut lease, &checkin(309)).await;
    let conflicted = executor.execute_traced(&mut lease, &checkin(310)).await;
    drop(lease);

    assert_eq!(
        applied.states,
        vec![
            ExecutorState::Idle,
            ExecutorState::TransactionOpen,
            ExecutorState::RowLocked,
            ExecutorState::Applying,
            ExecutorState::Committed,
        ]
    );
    assert_eq!(
        conflicted.states,
        vec![
            ExecutorState::Idle,
            ExecutorState::TransactionOpen,
            ExecutorState::RowLocked,
            ExecutorState::Conflicted,
            ExecutorState::RolledBack,
        ]
    );
    assert_ne!(applied.operation_id, conflicted.operation_id);
    assert_quiescent(&client);
}

#[tokio::test]
async fn test_submit_json_round_trip() {
    let client = hotel().await;
    let request: OperationRequest = serde_json::from_str(
        r#"{
            "table": "reservations",
            "snapshot": {"id": 43, "room_no": null, "checkout_date": "2020-06-19"},
            "changes": {"room_no": 309},
            "dependentInserts": [{"table": "invoices", "values": {"res_id": 43, "amount": 120.0}}]
        }"#,
    )
    .unwrap();

    let response = client.submit(&request).await;
    assert_eq!(response.outcome, Outcome::Applied);

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["outcome"], "applied");
    assert_eq!(json["affectedIds"][0]["table"], "reservations");
    assert_eq!(json["affectedIds"][0]["id"], 43);
    assert_eq!(json["affectedIds"][1]["table"], "invoices");
    assert!(json.get("currentValues").is_none());

    let decoded: OperationResponse = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, response);

    let stale = serde_json::to_value(client.submit(&request).await).unwrap();
    assert_eq!(stale["outcome"], "conflicted");
    assert_eq!(stale["currentValues"]["room_no"], 309);
    assert_eq!(stale["recordMissing"], false);
}

#[tokio::test]
async fn test_submit_reports_statement_failure() {
    let client = hotel().await;
    let request = OperationRequest::new("reservations", snapshot())
        .changes(ChangeSet::new().set("room_no", "three-oh-nine"));

    let json = serde_json::to_value(client.submit(&request).await).unwrap();
    assert_eq!(json["outcome"], "failed");
    assert_eq!(json["error"]["kind"], "statement_failure");
    assert_quiescent(&client);
}
