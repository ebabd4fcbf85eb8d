//! Hotel reservations schema used by the demo commands.

use occtx::{
    ChangeSet, Client, Column, DataType, FieldMap, InsertSpec, OperationRequest, Result,
    Snapshot, TableSchema, Value,
};

pub const CHECKOUT_DATE: &str = "2020-06-19";

pub fn create_schema(client: &Client) -> Result<()> {
    client.create_table(
        TableSchema::new("reservations")
            .column(Column::new("id", DataType::Integer).primary_key().auto_increment())
            .column(Column::new("guest", DataType::Text).not_null())
            .column(Column::new("room_no", DataType::Integer))
            .column(Column::new("checkout_date", DataType::Date).not_null()),
    )?;
    client.create_table(
        TableSchema::new("invoices")
            .column(Column::new("id", DataType::Integer).primary_key().auto_increment())
            .column(
                Column::new("res_id", DataType::Integer)
                    .not_null()
                    .references("reservations", "id"),
            )
            .column(Column::new("amount", DataType::Float).not_null()),
    )
}

/// Insert an unassigned reservation.
pub async fn seed(client: &Client, reservation: i64, guest: &str) -> Result<()> {
    client
        .query(
            "INSERT INTO reservations (id, guest, room_no, checkout_date) VALUES ($1, $2, NULL, $3)",
            &[reservation.into(), guest.into(), CHECKOUT_DATE.into()],
        )
        .await?;
    Ok(())
}

/// What the front desk saw when it opened the reservation.
pub fn unassigned_snapshot(reservation: i64) -> Snapshot {
    [
        ("id", Value::Integer(reservation)),
        ("room_no", Value::Null),
        ("checkout_date", Value::from(CHECKOUT_DATE)),
    ]
    .into_iter()
    .collect()
}

/// Assign a room and bill the stay in one operation.
pub fn checkin(reservation: i64, room: i64, amount: f64) -> OperationRequest {
    OperationRequest::new("reservations", unassigned_snapshot(reservation))
        .changes(ChangeSet::new().set("room_no", room))
        .insert(
            InsertSpec::new("invoices", FieldMap::new())
                .value("res_id", reservation)
                .value("amount", amount),
        )
}
