#![allow(dead_code)]

use occtx::{
    ChangeSet, Client, Column, ConnectionConfig, DataType, FieldMap, InsertSpec, OperationRequest,
    Snapshot, TableSchema, Value,
};
use std::time::Duration;

pub const RESERVATION: i64 = 43;
pub const CHECKOUT_DATE: &str = "2020-06-19";

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new("hotel")
        .max_connections(8)
        .acquire_timeout(Duration::from_millis(500))
        .lock_timeout(Duration::from_millis(200))
}

/// Hotel schema with reservation 43 unassigned.
pub async fn hotel_with(config: ConnectionConfig) -> Client {
    let client = Client::connect(config).unwrap();
    client
        .create_table(
            TableSchema::new("reservations")
                .column(Column::new("id", DataType::Integer).primary_key().auto_increment())
                .column(Column::new("guest", DataType::Text).not_null())
                .column(Column::new("room_no", DataType::Integer))
                .column(Column::new("checkout_date", DataType::Date).not_null()),
        )
        .unwrap();
    client
        .create_table(
            TableSchema::new("invoices")
                .column(Column::new("id", DataType::Integer).primary_key().auto_increment())
                .column(
                    Column::new("res_id", DataType::Integer)
                        .not_null()
                        .references("reservations", "id"),
                )
                .column(Column::new("amount", DataType::Float).not_null()),
        )
        .unwrap();

    client
        .query(
            "INSERT INTO reservations (id, guest, room_no, checkout_date) VALUES ($1, 'Ada', NULL, $2)",
            &[RESERVATION.into(), CHECKOUT_DATE.into()],
        )
        .await
        .unwrap();
    client
}

pub async fn hotel() -> Client {
    hotel_with(config()).await
}

pub fn snapshot() -> Snapshot {
    [
        ("id", Value::Integer(RESERVATION)),
        ("room_no", Value::Null),
        ("checkout_date", Value::from(CHECKOUT_DATE)),
    ]
    .into_iter()
    .collect()
}

pub fn checkin(room: i64) -> OperationRequest {
    OperationRequest::new("reservations", snapshot())
        .changes(ChangeSet::new().set("room_no", room))
        .insert(
            InsertSpec::new("invoices", FieldMap::new())
                .value("res_id", RESERVATION)
                .value("amount", 120.0),
        )
}

pub async fn room_no(client: &Client) -> Value {
    let result = client
        .query("SELECT room_no FROM reservations WHERE id = $1", &[RESERVATION.into()])
        .await
        .unwrap();
    result.get(0, "room_no").unwrap().clone()
}

pub async fn invoice_count(client: &Client) -> usize {
    client.query("SELECT * FROM invoices", &[]).await.unwrap().row_count()
}

/// No lease outstanding, no transaction open, no row lock held.
pub fn assert_quiescent(client: &Client) {
    assert_eq!(client.stats().outstanding, 0, "lease leaked: {}", client.stats());
    assert_eq!(client.database().transaction_stats().active, 0);
    assert_eq!(client.database().locks_held().unwrap(), 0);
}
