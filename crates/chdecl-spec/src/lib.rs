//! Desired-state specification types for chdecl.
//!
//! These types describe what a caller declares should exist on a ClickHouse
//! server: databases, tables (with columns, indexes and partitioning), views,
//! roles with privileges, and users. They are shared between the statement
//! synthesizer (`chdecl-sql`) and the reconciler (`chdecl`).
//!
//! Specifications are plain values. They are built fresh for every
//! reconciliation and never mutated once synthesis starts.

use std::fmt;
use std::str::FromStr;

mod access;
pub use access::*;

mod database;
pub use database::*;

mod table;
pub use table::*;

mod view;
pub use view::*;


/// The composite handle of a resource: `cluster:database:name`.
///
/// The cluster part is empty for unclustered resources; the database part is
/// empty for users, roles and databases themselves. This string is the only
/// thing persisted between reconciliation cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub cluster: String,
    pub database: String,
    pub name: String,
}

impl Identity {
    pub fn new(cluster: Option<&str>, database: &str, name: &str) -> Self {
        Self {
            cluster: cluster.unwrap_or_default().to_string(),
            database: database.to_string(),
            name: name.to_string(),
        }
    }

    /// The cluster, or `None` when the resource is unclustered.
    pub fn cluster(&self) -> Option<&str> {
        if self.cluster.is_empty() {
            None
        } else {
            Some(&self.cluster)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.cluster, self.database, self.name)
    }
}

/// Error returned when an identity string does not have three parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityParseError(pub String);

impl fmt::Display for IdentityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid identity '{}': expected 'cluster:database:name'",
            self.0
        )
    }
}

impl std::error::Error for IdentityParseError {}

impl Identity {
    /// Parse `cluster:database:name`. The name must be non-empty and may not
    /// contain `:`.
    pub fn parse(s: &str) -> Result<Self, IdentityParseError> {
        let invalid = || IdentityParseError(s.to_string());
        let (cluster, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (database, name) = rest.split_once(':').ok_or_else(invalid)?;
        if name.is_empty() || name.contains(':') {
            return Err(invalid());
        }
        Ok(Self::new(Some(cluster), database, name))
    }
}

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// The kind of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Database,
    Table,
    View,
    Role,
    User,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Database => "database",
            ResourceKind::Table => "table",
            ResourceKind::View => "view",
            ResourceKind::Role => "role",
            ResourceKind::User => "user",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any declared resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Database(DatabaseSpec),
    Table(TableSpec),
    View(ViewSpec),
    Role(RoleSpec),
    User(UserSpec),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Database(_) => ResourceKind::Database,
            Resource::Table(_) => ResourceKind::Table,
            Resource::View(_) => ResourceKind::View,
            Resource::Role(_) => ResourceKind::Role,
            Resource::User(_) => ResourceKind::User,
        }
    }

    pub fn identity(&self) -> Identity {
        match self {
            Resource::Database(db) => db.identity(),
            Resource::Table(table) => table.identity(),
            Resource::View(view) => view.identity(),
            Resource::Role(role) => role.identity(),
            Resource::User(user) => user.identity(),
        }
    }
}
