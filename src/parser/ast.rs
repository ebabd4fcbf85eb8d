use crate::core::{DbError, Result, Value};

/// A statement understood by the in-memory engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Begin,
    Commit,
    Rollback,
    Select(SelectStmt),
    Update(UpdateStmt),
    Insert(InsertStmt),
}

impl Statement {
    pub fn is_transaction_control(&self) -> bool {
        matches!(self, Statement::Begin | Statement::Commit | Statement::Rollback)
    }

    /// Highest placeholder number used (`$3` -> 3).
    pub fn param_count(&self) -> usize {
        let operands: Vec<&Operand> = match self {
            Statement::Begin | Statement::Commit | Statement::Rollback => Vec::new(),
            Statement::Select(s) => s.filter.iter().map(|p| &p.value).collect(),
            Statement::Update(u) => u
                .assignments
                .iter()
                .map(|a| &a.value)
                .chain(u.filter.iter().map(|p| &p.value))
                .collect(),
            Statement::Insert(i) => i.values.iter().flatten().collect(),
        };

        operands
            .into_iter()
            .filter_map(|op| match op {
                Operand::Param(idx) => Some(idx + 1),
                Operand::Literal(_) => None,
            })
            .max()
            .unwrap_or(0)
    }
}

/// A literal or a positional placeholder (`$1` is `Param(0)`).
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Param(usize),
}

impl Operand {
    pub fn bind(&self, params: &[Value]) -> Result<Value> {
        match self {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Param(idx) => params.get(*idx).cloned().ok_or_else(|| {
                DbError::ExecutionError(format!(
                    "Missing value for parameter ${} ({} supplied)",
                    idx + 1,
                    params.len()
                ))
            }),
        }
    }
}

/// `column = operand`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLockClause {
    pub nowait: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub table_name: String,
    pub projection: Projection,
    /// Conjunction of equality predicates; empty matches every row.
    pub filter: Vec<Predicate>,
    pub lock: Option<RowLockClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table_name: String,
    pub assignments: Vec<Assignment>,
    pub filter: Vec<Predicate>,
    pub returning: Option<Projection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table_name: String,
    /// Empty means "all columns in table order".
    pub columns: Vec<String>,
    pub values: Vec<Vec<Operand>>,
    pub returning: Option<Projection>,
}
