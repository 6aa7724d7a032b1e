//! SQLite implementation of [`Driver`].
//!
//! [`SqliteDriver`] keeps the SQL text of each handle and runs it through
//! rusqlite's statement cache. Query rows are materialized at execute time
//! and handed out one by one, written into the bound result image with the
//! capacities recorded by the last `bind_results`, so truncation behaves
//! like a driver writing into fixed buffers.

use std::collections::VecDeque;
use std::path::Path;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::driver::{Driver, ExecResult, FetchStatus, StatementId};
use crate::error::RuntimeError;
use crate::image::Image;
use crate::value::Value;

#[derive(Debug)]
struct SqliteStatement {
    sql: String,
    capacities: Vec<usize>,
    rows: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
}

pub struct SqliteDriver {
    conn: Connection,
    /// Indexed by handle; `None` once finalized.
    statements: Vec<Option<SqliteStatement>>,
    free: Vec<usize>,
}

impl SqliteDriver {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, RuntimeError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps an existing connection, enabling foreign key enforcement.
    pub fn from_connection(conn: Connection) -> Result<Self, RuntimeError> {
        // Off by default in SQLite; container rows rely on ON DELETE CASCADE.
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(SqliteDriver {
            conn,
            statements: Vec::new(),
            free: Vec::new(),
        })
    }

    /// Runs a batch of statements outside the image protocol (DDL).
    pub fn execute_script(&mut self, sql: &str) -> Result<(), RuntimeError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of live statement handles.
    pub fn prepared(&self) -> usize {
        self.statements.iter().flatten().count()
    }

    fn statement(&mut self, stmt: StatementId) -> Result<&mut SqliteStatement, RuntimeError> {
        self.statements
            .get_mut(stmt.0)
            .and_then(Option::as_mut)
            .ok_or(RuntimeError::UnknownStatement(stmt.0))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(n) => SqlValue::Integer(*n),
        Value::Double(d) => SqlValue::Real(*d),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(d) => Value::Double(d),
        ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Writes `row` into `image` honoring the bound capacities.
fn write_row(row: &[Value], image: &mut Image, capacities: &[usize]) -> FetchStatus {
    let mut truncated = false;
    for (i, value) in row.iter().enumerate() {
        let bound = capacities.get(i).copied().unwrap_or(0);
        truncated |= image.write(i, value, bound);
    }
    if truncated {
        FetchStatus::Truncated
    } else {
        FetchStatus::Row
    }
}

impl Driver for SqliteDriver {
    fn prepare(&mut self, sql: &str) -> Result<StatementId, RuntimeError> {
        // Validate now so errors surface at prepare time.
        self.conn.prepare_cached(sql)?;
        let entry = SqliteStatement {
            sql: sql.to_string(),
            capacities: Vec::new(),
            rows: VecDeque::new(),
            current: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.statements[slot] = Some(entry);
                Ok(StatementId(slot))
            }
            None => {
                self.statements.push(Some(entry));
                Ok(StatementId(self.statements.len() - 1))
            }
        }
    }

    fn bind_params(&mut self, stmt: StatementId, _params: &Image) -> Result<(), RuntimeError> {
        // Parameters are copied out of the image at execute time.
        self.statement(stmt).map(|_| ())
    }

    fn bind_results(&mut self, stmt: StatementId, results: &Image) -> Result<(), RuntimeError> {
        self.statement(stmt)?.capacities = results.capacities();
        Ok(())
    }

    fn execute(
        &mut self,
        stmt: StatementId,
        params: &Image,
        extra: &[Value],
    ) -> Result<ExecResult, RuntimeError> {
        let entry = self
            .statements
            .get_mut(stmt.0)
            .and_then(Option::as_mut)
            .ok_or(RuntimeError::UnknownStatement(stmt.0))?;
        let values: Vec<SqlValue> = params
            .values()
            .iter()
            .chain(extra)
            .map(to_sql)
            .collect();

        let mut prepared = self.conn.prepare_cached(&entry.sql)?;
        entry.rows.clear();
        entry.current = None;

        let columns = prepared.column_count();
        if columns > 0 {
            let mut rows = prepared.query(params_from_iter(values.iter()))?;
            while let Some(row) = rows.next()? {
                let mut out = Vec::with_capacity(columns);
                for i in 0..columns {
                    out.push(from_sql(row.get_ref(i)?));
                }
                entry.rows.push_back(out);
            }
            debug!(sql = %entry.sql, rows = entry.rows.len(), "query");
            Ok(ExecResult {
                affected: entry.rows.len() as u64,
                last_insert_id: None,
            })
        } else {
            let affected = prepared.execute(params_from_iter(values.iter()))?;
            debug!(sql = %entry.sql, affected, "execute");
            Ok(ExecResult {
                affected: affected as u64,
                last_insert_id: Some(self.conn.last_insert_rowid()),
            })
        }
    }

    fn fetch(&mut self, stmt: StatementId, results: &mut Image) -> Result<FetchStatus, RuntimeError> {
        let entry = self.statement(stmt)?;
        entry.current = entry.rows.pop_front();
        Ok(match &entry.current {
            Some(row) => write_row(row, results, &entry.capacities),
            None => FetchStatus::NoData,
        })
    }

    fn refetch(&mut self, stmt: StatementId, results: &mut Image) -> Result<FetchStatus, RuntimeError> {
        let entry = self.statement(stmt)?;
        Ok(match &entry.current {
            Some(row) => write_row(row, results, &entry.capacities),
            None => FetchStatus::NoData,
        })
    }

    fn free_result(&mut self, stmt: StatementId) {
        if let Some(entry) = self.statements.get_mut(stmt.0).and_then(Option::as_mut) {
            entry.rows.clear();
            entry.current = None;
        }
    }

    fn finalize(&mut self, stmt: StatementId) {
        if let Some(slot) = self.statements.get_mut(stmt.0) {
            if slot.take().is_some() {
                self.free.push(stmt.0);
            }
        }
    }

    fn begin(&mut self) -> Result<(), RuntimeError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), RuntimeError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), RuntimeError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}
