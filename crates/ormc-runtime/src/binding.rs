//! Prepared statement cache and the bind/fetch protocol.
//!
//! A [`Binding`] remembers the image version it was last bound at. Binding
//! is repeated only when the image version moved, so steady-state execution
//! never re-binds. A truncated fetch grows the image once, re-binds, and
//! re-fetches the same row; a second truncation of that row is an error
//! rather than another round.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use tracing::trace;

use ormc_core::ClassId;
use ormc_plan::{StatementKind, StatementPlan};

use crate::driver::{Driver, ExecResult, FetchStatus, StatementId};
use crate::error::RuntimeError;
use crate::image::Image;
use crate::options::RuntimeOptions;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct Binding {
    version: Option<u64>,
    count: u64,
}

impl Binding {
    pub fn is_current(&self, image: &Image) -> bool {
        self.version == Some(image.version())
    }

    pub fn mark(&mut self, image: &Image) {
        self.version = Some(image.version());
        self.count += 1;
    }

    /// Number of times the image was (re)bound.
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Statement cache key: owning class, operation, and a detail string that
/// separates statements of the same kind (container member, query
/// condition).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementKey {
    pub class: ClassId,
    pub kind: StatementKind,
    pub detail: String,
}

impl StatementKey {
    pub fn new(class: ClassId, kind: StatementKind, detail: &str) -> Self {
        StatementKey {
            class,
            kind,
            detail: detail.to_string(),
        }
    }

    /// Keyed by caller-supplied condition text rather than by the plan.
    fn is_condition(&self) -> bool {
        matches!(self.kind, StatementKind::Query | StatementKind::EraseQuery)
    }
}

/// A prepared statement with its parameter and result images.
#[derive(Debug, Clone)]
pub struct CachedStatement {
    pub id: StatementId,
    pub params: Image,
    pub results: Image,
    pub param_binding: Binding,
    pub result_binding: Binding,
}

impl CachedStatement {
    pub fn new(id: StatementId, plan: &StatementPlan, options: &RuntimeOptions) -> Self {
        CachedStatement {
            id,
            params: Image::new(&plan.params, options.initial_capacity),
            results: Image::new(&plan.results, options.initial_capacity),
            param_binding: Binding::default(),
            result_binding: Binding::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct StatementCache {
    entries: HashMap<StatementKey, CachedStatement>,
    /// Condition keys, least recently used first.
    conditions: VecDeque<StatementKey>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached statement for `key`, preparing `sql` on first use.
    ///
    /// Query statements are kept per condition up to
    /// `options.max_query_statements`; the least recently used one is
    /// finalized to make room.
    pub fn get_or_prepare(
        &mut self,
        driver: &mut dyn Driver,
        key: StatementKey,
        plan: &StatementPlan,
        sql: &str,
        options: &RuntimeOptions,
    ) -> Result<&mut CachedStatement, RuntimeError> {
        if key.is_condition() {
            self.touch_condition(driver, &key, options.max_query_statements.max(1));
        }
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let id = driver.prepare(sql)?;
                trace!(?id, sql, "prepared");
                Ok(entry.insert(CachedStatement::new(id, plan, options)))
            }
        }
    }

    fn touch_condition(&mut self, driver: &mut dyn Driver, key: &StatementKey, limit: usize) {
        if let Some(pos) = self.conditions.iter().position(|k| k == key) {
            if let Some(k) = self.conditions.remove(pos) {
                self.conditions.push_back(k);
            }
            return;
        }
        while self.conditions.len() >= limit {
            let Some(old) = self.conditions.pop_front() else { break };
            if let Some(evicted) = self.entries.remove(&old) {
                driver.finalize(evicted.id);
                trace!(id = ?evicted.id, condition = %old.detail, "evicted");
            }
        }
        self.conditions.push_back(key.clone());
    }

    pub fn get(&self, key: &StatementKey) -> Option<&CachedStatement> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every statement without finalizing it.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.conditions.clear();
    }
}

/// Copies `values` into the parameter image, re-binds if needed, and runs
/// the statement.
pub fn execute(
    driver: &mut dyn Driver,
    stmt: &mut CachedStatement,
    values: &[Value],
    extra: &[Value],
    options: &RuntimeOptions,
) -> Result<ExecResult, RuntimeError> {
    for (i, value) in values.iter().enumerate() {
        stmt.params.set(i, value, options.max_capacity)?;
    }
    if !stmt.param_binding.is_current(&stmt.params) {
        driver.bind_params(stmt.id, &stmt.params)?;
        stmt.param_binding.mark(&stmt.params);
        trace!(id = ?stmt.id, version = stmt.params.version(), "bound params");
    }
    driver.execute(stmt.id, &stmt.params, extra)
}

fn bind_results(driver: &mut dyn Driver, stmt: &mut CachedStatement) -> Result<(), RuntimeError> {
    if !stmt.result_binding.is_current(&stmt.results) {
        driver.bind_results(stmt.id, &stmt.results)?;
        stmt.result_binding.mark(&stmt.results);
        trace!(id = ?stmt.id, version = stmt.results.version(), "bound results");
    }
    Ok(())
}

/// Fetches the next row into the result image and returns its values.
pub fn fetch_row(
    driver: &mut dyn Driver,
    stmt: &mut CachedStatement,
    max_capacity: usize,
) -> Result<Option<Vec<Value>>, RuntimeError> {
    bind_results(driver, stmt)?;
    match driver.fetch(stmt.id, &mut stmt.results)? {
        FetchStatus::NoData => Ok(None),
        FetchStatus::Row => Ok(Some(stmt.results.values())),
        FetchStatus::Truncated => {
            stmt.results.grow_truncated(max_capacity)?;
            bind_results(driver, stmt)?;
            match driver.refetch(stmt.id, &mut stmt.results)? {
                FetchStatus::Row => Ok(Some(stmt.results.values())),
                FetchStatus::NoData => Ok(None),
                FetchStatus::Truncated => {
                    let column = stmt
                        .results
                        .slots()
                        .iter()
                        .find(|s| s.is_truncated())
                        .map(|s| s.column().to_string())
                        .unwrap_or_default();
                    Err(RuntimeError::Truncated { column })
                }
            }
        }
    }
}

/// Drains the result set.
pub fn fetch_all(
    driver: &mut dyn Driver,
    stmt: &mut CachedStatement,
    max_capacity: usize,
) -> Result<Vec<Vec<Value>>, RuntimeError> {
    let mut rows = Vec::new();
    let result = loop {
        match fetch_row(driver, stmt, max_capacity) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break Ok(rows),
            Err(e) => break Err(e),
        }
    };
    driver.free_result(stmt.id);
    result
}
