// ============================================================================
// Optimistic Transaction Executor
// ============================================================================
//
// BEGIN -> SELECT ... FOR UPDATE -> compare with snapshot -> UPDATE ->
// dependent INSERTs -> COMMIT, driven as an explicit state machine. Every
// path that does not reach COMMIT ends in ROLLBACK.
//
// ============================================================================

use super::request::{ConflictResult, OperationRequest, RowId};
use super::statements::{self, SqlStatement};
use crate::connection::Session;
use crate::core::{DbError, FieldMap, Result, Value};
use crate::result::QueryResult;
use serde::Serialize;
use std::fmt;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    TransactionOpen,
    RowLocked,
    Applying,
    Committed,
    Conflicted,
    Failed,
    RolledBack,
}

impl ExecutorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutorState::Committed | ExecutorState::RolledBack)
    }

    pub fn can_transition_to(&self, next: ExecutorState) -> bool {
        use ExecutorState::*;
        matches!(
            (self, next),
            (Idle, TransactionOpen)
                | (TransactionOpen, RowLocked)
                | (RowLocked, Applying)
                | (RowLocked, Conflicted)
                | (Applying, Committed)
                | (Conflicted, RolledBack)
                | (Failed, RolledBack)
                | (Idle | TransactionOpen | RowLocked | Applying | Conflicted, Failed)
        )
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::TransactionOpen => "transaction_open",
            ExecutorState::RowLocked => "row_locked",
            ExecutorState::Applying => "applying",
            ExecutorState::Committed => "committed",
            ExecutorState::Conflicted => "conflicted",
            ExecutorState::Failed => "failed",
            ExecutorState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Result of one operation together with every state it passed through.
#[derive(Debug)]
pub struct TracedOutcome {
    pub operation_id: Uuid,
    pub result: Result<ConflictResult>,
    pub states: Vec<ExecutorState>,
}

impl TracedOutcome {
    pub fn final_state(&self) -> ExecutorState {
        self.states.last().copied().unwrap_or(ExecutorState::Idle)
    }
}

struct StateMachine {
    state: ExecutorState,
    visited: Vec<ExecutorState>,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            state: ExecutorState::Idle,
            visited: vec![ExecutorState::Idle],
        }
    }

    fn advance(&mut self, next: ExecutorState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DbError::ExecutionError(format!(
                "Invalid executor transition {} -> {}",
                self.state, next
            )));
        }
        tracing::debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.visited.push(next);
        Ok(())
    }
}

/// Rolls back the session's open transaction if the operation is dropped
/// before it finishes.
struct RollbackGuard<'a, S: Session + ?Sized> {
    session: &'a mut S,
    armed: bool,
}

impl<'a, S: Session + ?Sized> RollbackGuard<'a, S> {
    fn new(session: &'a mut S) -> Self {
        Self { session, armed: false }
    }

    async fn run(&mut self, stmt: &SqlStatement) -> Result<QueryResult> {
        self.session.execute(&stmt.sql, &stmt.params).await
    }

    async fn control(&mut self, sql: &str) -> Result<QueryResult> {
        self.session.execute(sql, &[]).await
    }

    /// ROLLBACK if a transaction is open, falling back to an immediate abort
    /// when the statement itself fails.
    async fn roll_back(&mut self) -> Result<()> {
        if self.session.in_transaction() {
            if let Err(err) = self.control("ROLLBACK").await {
                tracing::error!(error = %err, "ROLLBACK failed, aborting session transaction");
                self.session.abort()?;
            }
        }
        self.armed = false;
        Ok(())
    }
}

impl<S: Session + ?Sized> Drop for RollbackGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed && self.session.in_transaction() {
            tracing::warn!("operation dropped mid-transaction, rolling back");
            if let Err(err) = self.session.abort() {
                tracing::error!(error = %err, "rollback after cancellation failed");
            }
        }
    }
}

/// Runs optimistic operations on a caller-supplied session.
///
/// The session must not be inside a transaction when the operation starts.
/// No retries are attempted; a conflict is returned to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticExecutor;

impl OptimisticExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute<S>(&self, session: &mut S, request: &OperationRequest) -> Result<ConflictResult>
    where
        S: Session + ?Sized,
    {
        self.execute_traced(session, request).await.result
    }

    /// Like [`execute`](Self::execute), also reporting the visited states.
    pub async fn execute_traced<S>(&self, session: &mut S, request: &OperationRequest) -> TracedOutcome
    where
        S: Session + ?Sized,
    {
        let operation_id = Uuid::new_v4();
        let key = request
            .key()
            .map(|k| k.to_string())
            .unwrap_or_else(|_| "?".to_string());
        let span = tracing::info_span!(
            "optimistic_operation",
            %operation_id,
            table = %request.table,
            key = %key
        );

        async move {
            let mut machine = StateMachine::new();
            let mut guard = RollbackGuard::new(session);

            let result = match drive(&mut guard, &mut machine, request).await {
                Ok(result) => Ok(result),
                Err(err) => fail(&mut guard, &mut machine, err).await,
            };

            match &result {
                Ok(ConflictResult::Applied { affected_ids }) => {
                    tracing::info!(affected = affected_ids.len(), "operation applied");
                }
                Ok(ConflictResult::Conflicted { current_values, record_missing }) => {
                    tracing::warn!(
                        fields = ?current_values.keys().collect::<Vec<_>>(),
                        record_missing,
                        "snapshot conflict"
                    );
                }
                Err(err) => {
                    tracing::warn!(error = %err, kind = %err.kind(), "operation failed");
                }
            }

            TracedOutcome {
                operation_id,
                result,
                states: machine.visited,
            }
        }
        .instrument(span)
        .await
    }
}

async fn drive<S: Session + ?Sized>(
    guard: &mut RollbackGuard<'_, S>,
    machine: &mut StateMachine,
    request: &OperationRequest,
) -> Result<ConflictResult> {
    request.validate()?;
    if guard.session.in_transaction() {
        return Err(DbError::InvalidRequest(
            "Session already has an open transaction".into(),
        ));
    }
    let key = request.key()?.clone();

    // Idle -> TransactionOpen
    guard.control("BEGIN").await?;
    guard.armed = true;
    machine.advance(ExecutorState::TransactionOpen)?;

    // TransactionOpen -> RowLocked
    let select = statements::select_for_update(&request.table, &request.key_column, &key)?;
    let locked = guard.run(&select).await?;
    machine.advance(ExecutorState::RowLocked)?;

    let Some(current) = locked.first_record() else {
        return conflict(guard, machine, FieldMap::new(), true).await;
    };
    if let Some(field) = request.snapshot.field_names().find(|f| !current.contains_key(*f)) {
        return Err(DbError::ColumnNotFound(field.to_string(), request.table.clone()));
    }

    let stale = request.snapshot.diff(&current);
    if !stale.is_empty() {
        return conflict(guard, machine, stale, false).await;
    }

    // RowLocked -> Applying -> Committed
    machine.advance(ExecutorState::Applying)?;
    let mut affected_ids = Vec::with_capacity(request.dependent_inserts.len() + 1);

    if !request.changes.is_empty() {
        let update = statements::update(&request.table, &request.key_column, &key, &request.changes)?;
        let updated = guard.run(&update).await?;
        if updated.rows_affected != 1 {
            return Err(DbError::ExecutionError(format!(
                "Locked row {} in '{}' was not updated",
                key, request.table
            )));
        }
        affected_ids.push(RowId::new(&request.table, key.clone()));
    }

    for spec in &request.dependent_inserts {
        let insert = statements::insert_returning(spec)?;
        let inserted = guard.run(&insert).await?;
        let id = inserted
            .rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or(Value::Null);
        affected_ids.push(RowId::new(&spec.table, id));
    }

    guard.control("COMMIT").await?;
    guard.armed = false;
    machine.advance(ExecutorState::Committed)?;

    Ok(ConflictResult::Applied { affected_ids })
}

async fn conflict<S: Session + ?Sized>(
    guard: &mut RollbackGuard<'_, S>,
    machine: &mut StateMachine,
    current_values: FieldMap,
    record_missing: bool,
) -> Result<ConflictResult> {
    machine.advance(ExecutorState::Conflicted)?;
    guard.roll_back().await?;
    machine.advance(ExecutorState::RolledBack)?;
    Ok(ConflictResult::Conflicted {
        current_values,
        record_missing,
    })
}

/// Failed -> RolledBack, then hand back the original error.
async fn fail<S: Session + ?Sized>(
    guard: &mut RollbackGuard<'_, S>,
    machine: &mut StateMachine,
    err: DbError,
) -> Result<ConflictResult> {
    if let DbError::LockTimeout { table, key } = &err {
        tracing::warn!(%table, %key, "row lock timed out");
    }

    if machine.advance(ExecutorState::Failed).is_err() {
        // Only reachable after COMMIT, which cannot fail afterwards.
        return Err(err);
    }

    // Nothing of ours is open if BEGIN never ran.
    let opened = machine.visited.contains(&ExecutorState::TransactionOpen);
    let rolled_back = if opened { guard.roll_back().await } else { Ok(()) };

    match rolled_back {
        Ok(()) => {
            if let Err(transition) = machine.advance(ExecutorState::RolledBack) {
                tracing::error!(error = %transition, "state machine rejected rollback");
            }
        }
        Err(rollback_err) => {
            tracing::error!(error = %rollback_err, "rollback after failure failed");
        }
    }
    Err(err)
}
