// ============================================================================
// src/parser/adapter.rs - sqlparser AST -> engine statements
// ============================================================================

use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use crate::core::{DbError, Result, Value};
use crate::parser::ast::*;

pub struct SqlParserAdapter {
    dialect: PostgreSqlDialect,
}

impl Default for SqlParserAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlParserAdapter {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Parse exactly one statement.
    pub fn parse(&self, sql: &str) -> Result<Statement> {
        // Transaction control is matched textually; sqlparser's variants for
        // these carry dialect options we have no use for.
        let trimmed = sql.trim().trim_end_matches(';').trim().to_uppercase();
        match trimmed.as_str() {
            "BEGIN" | "BEGIN TRANSACTION" | "BEGIN WORK" | "START TRANSACTION" => {
                return Ok(Statement::Begin);
            }
            "COMMIT" | "COMMIT TRANSACTION" | "COMMIT WORK" | "END" => {
                return Ok(Statement::Commit);
            }
            "ROLLBACK" | "ROLLBACK TRANSACTION" | "ROLLBACK WORK" | "ABORT" => {
                return Ok(Statement::Rollback);
            }
            _ => {}
        }

        let mut statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| DbError::ParseError(e.to_string()))?;

        if statements.len() != 1 {
            return Err(DbError::ParseError(format!(
                "Expected exactly one statement, got {}",
                statements.len()
            )));
        }

        self.convert_statement(statements.remove(0))
    }

    fn convert_statement(&self, stmt: sql_ast::Statement) -> Result<Statement> {
        match stmt {
            sql_ast::Statement::Query(query) => {
                Ok(Statement::Select(self.convert_query(*query)?))
            }
            sql_ast::Statement::Insert(insert) => {
                Ok(Statement::Insert(self.convert_insert(insert)?))
            }
            sql_ast::Statement::Update { table, assignments, from, selection, returning, .. } => {
                if from.is_some() {
                    return Err(DbError::UnsupportedOperation(
                        "UPDATE ... FROM is not supported".into()
                    ));
                }
                Ok(Statement::Update(self.convert_update(table, assignments, selection, returning)?))
            }
            _ => Err(DbError::UnsupportedOperation(format!(
                "Statement type not supported: {}",
                stmt
            ))),
        }
    }

    fn convert_query(&self, query: sql_ast::Query) -> Result<SelectStmt> {
        if query.with.is_some() || query.order_by.is_some() || query.limit_clause.is_some() {
            return Err(DbError::UnsupportedOperation(
                "WITH, ORDER BY and LIMIT are not supported".into()
            ));
        }

        let lock = self.convert_locks(query.locks)?;

        let sql_ast::SetExpr::Select(select) = *query.body else {
            return Err(DbError::UnsupportedOperation(
                "Only SELECT queries supported".into()
            ));
        };
        let select = *select;

        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            return Err(DbError::UnsupportedOperation(
                "SELECT must read from exactly one table without joins".into()
            ));
        }
        let table_name = match &select.from[0].relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(name)?,
            _ => return Err(DbError::UnsupportedOperation(
                "Complex table references not supported".into()
            )),
        };

        let projection = self.convert_projection(select.projection)?;
        let filter = self.convert_filter(select.selection)?;

        Ok(SelectStmt {
            table_name,
            projection,
            filter,
            lock,
        })
    }

    fn convert_locks(&self, locks: Vec<sql_ast::LockClause>) -> Result<Option<RowLockClause>> {
        let Some(clause) = locks.into_iter().next() else {
            return Ok(None);
        };

        if !matches!(clause.lock_type, sql_ast::LockType::Update) {
            return Err(DbError::UnsupportedOperation(
                "Only FOR UPDATE row locks are supported".into()
            ));
        }

        let nowait = match clause.nonblock {
            None => false,
            Some(sql_ast::NonBlock::Nowait) => true,
            Some(sql_ast::NonBlock::SkipLocked) => {
                return Err(DbError::UnsupportedOperation("SKIP LOCKED is not supported".into()));
            }
        };

        Ok(Some(RowLockClause { nowait }))
    }

    fn convert_update(
        &self,
        table: sql_ast::TableWithJoins,
        assignments: Vec<sql_ast::Assignment>,
        selection: Option<sql_ast::Expr>,
        returning: Option<Vec<sql_ast::SelectItem>>,
    ) -> Result<UpdateStmt> {
        let table_name = match table.relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(&name)?,
            _ => return Err(DbError::UnsupportedOperation(
                "Complex table references not supported in UPDATE".into()
            )),
        };

        let assignments = assignments
            .into_iter()
            .map(|assign| {
                let column = match assign.target {
                    sql_ast::AssignmentTarget::ColumnName(col_name) => {
                        if col_name.0.len() == 1 {
                            col_name.0[0].to_string()
                        } else {
                            return Err(DbError::UnsupportedOperation(
                                "Qualified column names not supported in UPDATE".into()
                            ));
                        }
                    }
                    _ => return Err(DbError::UnsupportedOperation(
                        "Only simple column names supported in UPDATE".into()
                    )),
                };

                let value = self.convert_operand(assign.value)?;

                Ok(Assignment { column, value })
            })
            .collect::<Result<Vec<_>>>()?;

        let filter = self.convert_filter(selection)?;
        let returning = returning.map(|items| self.convert_projection(items)).transpose()?;

        Ok(UpdateStmt {
            table_name,
            assignments,
            filter,
            returning,
        })
    }

    fn convert_insert(&self, insert: sql_ast::Insert) -> Result<InsertStmt> {
        let table_name = insert.table.to_string();
        let columns = insert.columns.into_iter().map(|id| id.value).collect();

        let values = match insert.source {
            Some(source) => match *source.body {
                sql_ast::SetExpr::Values(vals) => vals
                    .rows
                    .into_iter()
                    .map(|row| {
                        row.into_iter()
                            .map(|expr| self.convert_operand(expr))
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()?,
                _ => return Err(DbError::UnsupportedOperation(
                    "Only VALUES clause supported".into()
                )),
            },
            None => return Err(DbError::ParseError("INSERT requires a VALUES clause".into())),
        };

        let returning = insert
            .returning
            .map(|items| self.convert_projection(items))
            .transpose()?;

        Ok(InsertStmt {
            table_name,
            columns,
            values,
            returning,
        })
    }

    fn convert_projection(&self, items: Vec<sql_ast::SelectItem>) -> Result<Projection> {
        let mut columns = Vec::with_capacity(items.len());
        for item in items {
            match item {
                sql_ast::SelectItem::Wildcard(_) => return Ok(Projection::All),
                sql_ast::SelectItem::UnnamedExpr(expr) => columns.push(column_name(expr)?),
                _ => return Err(DbError::UnsupportedOperation(
                    "Only column names and * are supported in projections".into()
                )),
            }
        }
        Ok(Projection::Columns(columns))
    }

    /// Flatten `a = x AND b = y AND ...` into predicates.
    fn convert_filter(&self, selection: Option<sql_ast::Expr>) -> Result<Vec<Predicate>> {
        let mut predicates = Vec::new();
        if let Some(expr) = selection {
            self.collect_predicates(expr, &mut predicates)?;
        }
        Ok(predicates)
    }

    fn collect_predicates(&self, expr: sql_ast::Expr, out: &mut Vec<Predicate>) -> Result<()> {
        match expr {
            sql_ast::Expr::Nested(inner) => self.collect_predicates(*inner, out),
            sql_ast::Expr::BinaryOp { left, op: sql_ast::BinaryOperator::And, right } => {
                self.collect_predicates(*left, out)?;
                self.collect_predicates(*right, out)
            }
            sql_ast::Expr::BinaryOp { left, op: sql_ast::BinaryOperator::Eq, right } => {
                let column = column_name(*left)?;
                let value = self.convert_operand(*right)?;
                out.push(Predicate { column, value });
                Ok(())
            }
            other => Err(DbError::UnsupportedOperation(format!(
                "Only equality predicates joined by AND are supported, got: {}",
                other
            ))),
        }
    }

    fn convert_operand(&self, expr: sql_ast::Expr) -> Result<Operand> {
        match expr {
            sql_ast::Expr::Value(value_with_span) => match value_with_span.value {
                sql_ast::Value::Placeholder(p) => parse_placeholder(&p),
                other => Ok(Operand::Literal(convert_value(&other)?)),
            },
            sql_ast::Expr::UnaryOp { op: sql_ast::UnaryOperator::Minus, expr } => {
                match self.convert_operand(*expr)? {
                    Operand::Literal(Value::Integer(i)) => Ok(Operand::Literal(Value::Integer(-i))),
                    Operand::Literal(Value::Float(f)) => Ok(Operand::Literal(Value::Float(-f))),
                    _ => Err(DbError::UnsupportedOperation(
                        "Unary minus applies to numeric literals only".into()
                    )),
                }
            }
            sql_ast::Expr::Nested(inner) => self.convert_operand(*inner),
            other => Err(DbError::UnsupportedOperation(format!(
                "Only literals and $n placeholders are supported as values, got: {}",
                other
            ))),
        }
    }
}

fn convert_value(val: &sql_ast::Value) -> Result<Value> {
    match val {
        sql_ast::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Integer(i))
            } else if let Ok(f) = n.parse::<f64>() {
                Ok(Value::Float(f))
            } else {
                Err(DbError::TypeMismatch(format!("Invalid number: {}", n)))
            }
        }
        sql_ast::Value::SingleQuotedString(s) => Ok(Value::Text(s.clone())),
        sql_ast::Value::Boolean(b) => Ok(Value::Boolean(*b)),
        sql_ast::Value::Null => Ok(Value::Null),
        _ => Err(DbError::UnsupportedOperation(format!(
            "Unsupported value: {}",
            val
        ))),
    }
}

fn parse_placeholder(p: &str) -> Result<Operand> {
    p.strip_prefix('$')
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .map(|n| Operand::Param(n - 1))
        .ok_or_else(|| DbError::ParseError(format!("Invalid placeholder '{}', expected $1, $2, ...", p)))
}

fn column_name(expr: sql_ast::Expr) -> Result<String> {
    match expr {
        sql_ast::Expr::Identifier(ident) => Ok(ident.value),
        sql_ast::Expr::CompoundIdentifier(mut idents) => idents
            .pop()
            .map(|ident| ident.value)
            .ok_or_else(|| DbError::ParseError("Empty column reference".into())),
        other => Err(DbError::UnsupportedOperation(format!(
            "Expected a column name, got: {}",
            other
        ))),
    }
}

fn extract_table_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|ident| ident.to_string())
        .ok_or_else(|| DbError::ParseError("Invalid table name".into()))
}

// ============================================================================
// TESTS
// ============================================================================
