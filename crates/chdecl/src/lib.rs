//! Declarative reconciliation for ClickHouse.
//!
//! Given the spec a resource was last applied with, the spec it should have
//! now and a connection, chdecl reads what the server actually has, works
//! out the difference and issues the DDL/DCL to close it:
//!
//! ```ignore
//! let reconciler = Reconciler::from_config(conn, &config);
//! let outcome = reconciler
//!     .reconcile(prior.as_ref(), Some(&desired), &cancel)
//!     .await?;
//! println!("{}: {}", outcome.identity, outcome.action);
//! ```
//!
//! Resources are databases, tables, views (plain and materialized), roles
//! with their privileges, and users with their default roles. Each one is
//! addressed by its composite identity, `cluster:database:name`.
//!
//! Statements are built with the `chdecl-sql` synthesizer and interpolate
//! names, comments and queries verbatim.

pub mod catalog;
pub mod config;
pub mod declare;
mod diff;
mod error;
mod plan;
mod reconcile;
mod row;
mod traced;
pub mod validate;

pub use catalog::{Catalog, Observed, ObservedDatabase, SystemCatalog};
pub use config::{Config, ConfigError};
pub use declare::{DeclError, ResourceDecl};
pub use diff::{
    Change, ChangeSet, diff_database, diff_role, diff_table, diff_user, diff_view,
    normalize_query,
};
pub use error::{Error, Result};
pub use plan::{Action, Phase, Plan, PlannedStatement, Planner};
pub use reconcile::{Outcome, Reconciler};
pub use row::{Row, Value};
pub use traced::{BoxFuture, Connection, ConnectionExt, DbError, TracedConn};
pub use validate::{AllowList, Validator, Violation, Violations};

pub use chdecl_spec as spec;
pub use chdecl_sql as sql;
