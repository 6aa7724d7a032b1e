//! Shared fixtures for runtime integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use ormc_core::{validate, DiagnosticSink, Model};
use ormc_plan::{build_plan, schema_for, Plan, PlanOptions};
use ormc_runtime::{
    Driver, ExecResult, FetchStatus, Image, Registry, RuntimeError, RuntimeOptions, Session,
    SqliteDriver, StatementId, Value,
};
use ormc_schema::{to_script, DdlEmitter, DialectKind};

pub struct Fixture {
    pub model: Model,
    pub plan: Plan,
    pub registry: Registry,
}

impl Fixture {
    pub fn new(model: Model) -> Self {
        let mut sink = DiagnosticSink::new();
        validate(&model, &mut sink).expect("model is valid");
        let plan = build_plan(&model, &PlanOptions::default()).expect("plan");
        let registry = Registry::from_plan(&plan);
        Fixture {
            model,
            plan,
            registry,
        }
    }

    pub fn schema_script(&self) -> String {
        let schema = schema_for(&self.model, &PlanOptions::default()).expect("schema");
        to_script(&DdlEmitter::new(DialectKind::Sqlite.dialect()).create_schema(&schema))
    }

    pub fn memory_driver(&self) -> SqliteDriver {
        let mut driver = SqliteDriver::open_in_memory().expect("open");
        driver.execute_script(&self.schema_script()).expect("create schema");
        driver
    }

    /// Creates the schema in a fresh database file.
    pub fn create_file(&self, path: &Path) {
        let mut driver = SqliteDriver::open(path).expect("open");
        driver.execute_script(&self.schema_script()).expect("create schema");
    }

    pub fn session(&self, driver: impl Driver + 'static) -> Session<'_> {
        self.session_with(driver, RuntimeOptions::default())
    }

    pub fn session_with(&self, driver: impl Driver + 'static, options: RuntimeOptions) -> Session<'_> {
        Session::new(&self.plan, &self.registry, Box::new(driver), options)
    }
}

/// Driver wrapper that logs the SQL of every executed statement.
pub struct Recording<D> {
    inner: D,
    sql: HashMap<StatementId, String>,
    log: Rc<RefCell<Vec<String>>>,
}

impl<D: Driver> Recording<D> {
    pub fn new(inner: D) -> (Self, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let driver = Recording {
            inner,
            sql: HashMap::new(),
            log: Rc::clone(&log),
        };
        (driver, log)
    }
}

impl<D: Driver> Driver for Recording<D> {
    fn prepare(&mut self, sql: &str) -> Result<StatementId, RuntimeError> {
        let id = self.inner.prepare(sql)?;
        self.sql.insert(id, sql.to_string());
        Ok(id)
    }

    fn bind_params(&mut self, stmt: StatementId, params: &Image) -> Result<(), RuntimeError> {
        self.inner.bind_params(stmt, params)
    }

    fn bind_results(&mut self, stmt: StatementId, results: &Image) -> Result<(), RuntimeError> {
        self.inner.bind_results(stmt, results)
    }

    fn execute(
        &mut self,
        stmt: StatementId,
        params: &Image,
        extra: &[Value],
    ) -> Result<ExecResult, RuntimeError> {
        if let Some(sql) = self.sql.get(&stmt) {
            self.log.borrow_mut().push(sql.clone());
        }
        self.inner.execute(stmt, params, extra)
    }

    fn fetch(&mut self, stmt: StatementId, results: &mut Image) -> Result<FetchStatus, RuntimeError> {
        self.inner.fetch(stmt, results)
    }

    fn refetch(&mut self, stmt: StatementId, results: &mut Image) -> Result<FetchStatus, RuntimeError> {
        self.inner.refetch(stmt, results)
    }

    fn free_result(&mut self, stmt: StatementId) {
        self.inner.free_result(stmt)
    }

    fn finalize(&mut self, stmt: StatementId) {
        self.sql.remove(&stmt);
        self.inner.finalize(stmt)
    }

    fn begin(&mut self) -> Result<(), RuntimeError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), RuntimeError> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), RuntimeError> {
        self.inner.rollback()
    }
}

pub fn count_prefix(log: &Rc<RefCell<Vec<String>>>, prefix: &str) -> usize {
    log.borrow().iter().filter(|s| s.starts_with(prefix)).count()
}
