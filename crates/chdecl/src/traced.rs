//! Traced database connection wrapper.
//!
//! Wraps any [`Connection`] and logs every statement and query via tracing.

use std::future::Future;
use std::pin::Pin;

use chdecl_sql::{Stmt, render, render_redacted};
use thiserror::Error;
use tracing::Instrument;

use crate::row::Row;

/// A boxed, sendable future, as returned by [`Connection`] and catalog methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An error reported by the database client or while decoding its rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DbError {
    pub message: String,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Trait for database connections that can run statements.
///
/// Implementations must be safe to share between concurrent reconciliations;
/// pooling, TLS and authentication are the implementor's business.
pub trait Connection: Send + Sync {
    /// Execute a statement that returns no rows.
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), DbError>>;

    /// Execute a query, returning all rows.
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, DbError>>;
}

/// A wrapper around a connection that logs all statements via tracing.
///
/// Statements are logged with secrets masked.
///
/// # Example
///
/// ```ignore
/// use chdecl::ConnectionExt;
///
/// let traced = conn.traced();
/// traced.execute_stmt(&stmt).await?;
/// let rows = traced.query("SELECT name FROM system.users").await?;
/// ```
pub struct TracedConn<'a, C: Connection + ?Sized> {
    conn: &'a C,
}

impl<'a, C: Connection + ?Sized> TracedConn<'a, C> {
    /// Create a new traced connection wrapper.
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Execute a synthesized statement.
    pub async fn execute_stmt(&self, stmt: &Stmt) -> Result<(), DbError> {
        let sql = render(stmt);
        let span = tracing::debug_span!(
            "db.execute",
            sql = %render_redacted(stmt),
            ok = tracing::field::Empty,
        );
        let result = self.conn.execute(&sql).instrument(span.clone()).await;
        span.record("ok", result.is_ok());
        result
    }

    /// Execute a query, returning all rows.
    pub async fn query(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            rows = tracing::field::Empty,
        );
        let rows = self.conn.query(sql).instrument(span.clone()).await?;
        span.record("rows", rows.len());
        Ok(rows)
    }
}

/// Extension trait to get a traced wrapper from a connection.
pub trait ConnectionExt: Connection {
    /// Wrap this connection in a `TracedConn` for query logging.
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }
}

impl<C: Connection + ?Sized> ConnectionExt for C {}
