//! The [`Driver`] trait: the narrow interface the session needs from a
//! database connection.
//!
//! Statements are prepared once and addressed by handle. Parameters and
//! results travel through [`Image`]s: `bind_*` tells the driver which
//! buffers (and capacities) to use, `execute` runs the statement, `fetch`
//! writes the next row into the bound result image and reports truncation
//! instead of failing, and `refetch` rewrites the current row after the
//! caller has grown and re-bound the image.

use crate::error::RuntimeError;
use crate::image::Image;
use crate::value::Value;

/// Handle of a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub usize);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows affected, or rows produced by a query.
    pub affected: u64,
    pub last_insert_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Row,
    /// A row was fetched but some variable-length column did not fit.
    Truncated,
    NoData,
}

pub trait Driver {
    fn prepare(&mut self, sql: &str) -> Result<StatementId, RuntimeError>;

    fn bind_params(&mut self, stmt: StatementId, params: &Image) -> Result<(), RuntimeError>;

    fn bind_results(&mut self, stmt: StatementId, results: &Image) -> Result<(), RuntimeError>;

    /// Runs the statement with the bound parameter image followed by
    /// `extra` values (for caller-supplied query conditions).
    fn execute(
        &mut self,
        stmt: StatementId,
        params: &Image,
        extra: &[Value],
    ) -> Result<ExecResult, RuntimeError>;

    fn fetch(&mut self, stmt: StatementId, results: &mut Image) -> Result<FetchStatus, RuntimeError>;

    /// Re-reads the current row into the (re-bound) result image.
    fn refetch(&mut self, stmt: StatementId, results: &mut Image) -> Result<FetchStatus, RuntimeError>;

    /// Releases the rest of the current result set.
    fn free_result(&mut self, stmt: StatementId);

    /// Drops a prepared statement. The handle may be reused by a later
    /// `prepare`.
    fn finalize(&mut self, stmt: StatementId);

    fn begin(&mut self) -> Result<(), RuntimeError>;

    fn commit(&mut self) -> Result<(), RuntimeError>;

    fn rollback(&mut self) -> Result<(), RuntimeError>;
}
