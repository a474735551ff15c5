#![allow(dead_code)]

use std::sync::Mutex;

use chdecl::spec::{DatabaseInfo, ObservedRole, ObservedUser, TableSpec, ViewSpec};
use chdecl::{BoxFuture, Catalog, Connection, DbError, Observed, Row};
use tokio_util::sync::CancellationToken;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A connection that records every statement it is asked to run.
#[derive(Default)]
pub struct RecordingConnection {
    executed: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    /// Canned result sets, picked by the first matching substring.
    responses: Vec<(String, Vec<Row>)>,
    fail_on: Option<String>,
    /// Cancel this token and hang when a statement or query contains the
    /// pattern.
    hang_on: Option<(String, CancellationToken)>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, pattern: &str, rows: Vec<Row>) -> Self {
        self.responses.push((pattern.to_string(), rows));
        self
    }

    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    pub fn cancel_and_hang_on(mut self, pattern: &str, token: CancellationToken) -> Self {
        self.hang_on = Some((pattern.to_string(), token));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl Connection for RecordingConnection {
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            self.executed.lock().unwrap().push(sql.to_string());
            if let Some((pattern, token)) = &self.hang_on
                && sql.contains(pattern.as_str())
            {
                token.cancel();
                std::future::pending::<()>().await;
            }
            match &self.fail_on {
                Some(pattern) if sql.contains(pattern.as_str()) => {
                    Err(DbError::new(format!("Code: 497. Not enough privileges: {sql}")))
                }
                _ => Ok(()),
            }
        })
    }

    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, DbError>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push(sql.to_string());
            if let Some((pattern, token)) = &self.hang_on
                && sql.contains(pattern.as_str())
            {
                token.cancel();
                std::future::pending::<()>().await;
            }
            let rows = self
                .responses
                .iter()
                .find(|(pattern, _)| sql.contains(pattern.as_str()))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default();
            Ok(rows)
        })
    }
}

/// A catalog holding at most one observed resource, returned for any name
/// of the matching kind.
#[derive(Default)]
pub struct FakeCatalog {
    observed: Mutex<Option<Observed>>,
    dependents: Vec<String>,
}

impl FakeCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(observed: Observed) -> Self {
        Self {
            observed: Mutex::new(Some(observed)),
            dependents: Vec::new(),
        }
    }

    pub fn dependents(mut self, names: &[&str]) -> Self {
        self.dependents = names.iter().map(|n| n.to_string()).collect();
        self
    }

    fn get(&self) -> Option<Observed> {
        self.observed.lock().unwrap().clone()
    }
}

impl Catalog for FakeCatalog {
    fn database<'a>(
        &'a self,
        _name: &'a str,
    ) -> BoxFuture<'a, Result<Option<DatabaseInfo>, DbError>> {
        let found = match self.get() {
            Some(Observed::Database(db)) => Some(db.info),
            _ => None,
        };
        Box::pin(async move { Ok(found) })
    }

    fn dependents<'a>(&'a self, _database: &'a str) -> BoxFuture<'a, Result<Vec<String>, DbError>> {
        let found = self.dependents.clone();
        Box::pin(async move { Ok(found) })
    }

    fn table<'a>(
        &'a self,
        _database: &'a str,
        _name: &'a str,
        _prior: Option<&'a TableSpec>,
    ) -> BoxFuture<'a, Result<Option<TableSpec>, DbError>> {
        let found = match self.get() {
            Some(Observed::Table(t)) => Some(t),
            _ => None,
        };
        Box::pin(async move { Ok(found) })
    }

    fn view<'a>(
        &'a self,
        _database: &'a str,
        _name: &'a str,
        _prior: Option<&'a ViewSpec>,
    ) -> BoxFuture<'a, Result<Option<ViewSpec>, DbError>> {
        let found = match self.get() {
            Some(Observed::View(v)) => Some(v),
            _ => None,
        };
        Box::pin(async move { Ok(found) })
    }

    fn role<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Option<ObservedRole>, DbError>> {
        let found = match self.get() {
            Some(Observed::Role(r)) => Some(r),
            _ => None,
        };
        Box::pin(async move { Ok(found) })
    }

    fn user<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Option<ObservedUser>, DbError>> {
        let found = match self.get() {
            Some(Observed::User(u)) => Some(u),
            _ => None,
        };
        Box::pin(async move { Ok(found) })
    }
}
