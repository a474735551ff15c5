//! Declaration validation.
//!
//! The validator never stops at the first problem: it collects every
//! violation so they can be reported together.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

use chdecl_spec::{
    AccessType, DatabaseSpec, Grant, Resource, RoleSpec, TableSpec, UserSpec, ViewSpec,
    WILDCARD_DATABASE,
};

/// Privileges grantable on a single database.
const DATABASE_PRIVILEGES: &[&str] = &[
    "SELECT",
    "INSERT",
    "ALTER",
    "CREATE",
    "CREATE TABLE",
    "CREATE VIEW",
    "CREATE DICTIONARY",
    "DROP",
    "DROP TABLE",
    "DROP VIEW",
    "DROP DICTIONARY",
    "TRUNCATE",
    "OPTIMIZE",
    "SHOW",
    "SHOW TABLES",
    "SHOW COLUMNS",
    "ALTER UPDATE",
    "ALTER DELETE",
    "ALTER ADD COLUMN",
    "ALTER DROP COLUMN",
    "ALTER MODIFY COLUMN",
    "ALTER COMMENT COLUMN",
    "ALTER INDEX",
    "ALTER TTL",
    "ALTER SETTINGS",
    "ALTER VIEW",
    "SYSTEM MERGES",
    "SYSTEM TTL MERGES",
    "SYSTEM FETCHES",
    "SYSTEM MOVES",
    "SYSTEM SENDS",
    "SYSTEM REPLICATION QUEUES",
    "SYSTEM SYNC REPLICA",
    "SYSTEM RESTART REPLICA",
    "SYSTEM FLUSH DISTRIBUTED",
    "dictGet",
];

/// Privileges that only make sense on `*.*`.
const GLOBAL_PRIVILEGES: &[&str] = &[
    "REMOTE",
    "URL",
    "FILE",
    "S3",
    "HDFS",
    "JDBC",
    "MYSQL",
    "POSTGRES",
    "ODBC",
    "SOURCES",
    "KILL QUERY",
    "SYSTEM SHUTDOWN",
    "SYSTEM DROP CACHE",
    "SYSTEM RELOAD CONFIG",
    "CREATE USER",
    "ALTER USER",
    "DROP USER",
    "CREATE ROLE",
    "DROP ROLE",
    "ROLE ADMIN",
    "SHOW USERS",
    "SHOW ROLES",
];

static DEFAULT_ALLOW_LIST: LazyLock<Arc<AllowList>> = LazyLock::new(|| {
    Arc::new(AllowList::new(
        DATABASE_PRIVILEGES.iter().copied(),
        GLOBAL_PRIVILEGES.iter().copied(),
    ))
});

/// The recognized privileges. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct AllowList {
    database: HashSet<AccessType>,
    global_only: HashSet<AccessType>,
}

impl AllowList {
    pub fn new<'a>(
        database: impl IntoIterator<Item = &'a str>,
        global_only: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            database: database
                .into_iter()
                .map(|a| AccessType::new(a.to_string()))
                .collect(),
            global_only: global_only
                .into_iter()
                .map(|a| AccessType::new(a.to_string()))
                .collect(),
        }
    }

    /// The process-wide default list.
    pub fn standard() -> &'static Arc<AllowList> {
        &DEFAULT_ALLOW_LIST
    }

    /// This list plus more privileges.
    pub fn extended<'a>(
        &self,
        database: impl IntoIterator<Item = &'a str>,
        global_only: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut list = self.clone();
        list.database
            .extend(database.into_iter().map(|a| AccessType::new(a.to_string())));
        list.global_only
            .extend(global_only.into_iter().map(|a| AccessType::new(a.to_string())));
        list
    }

    /// Matching is exact and case-sensitive.
    pub fn is_allowed(&self, access: &AccessType) -> bool {
        self.database.contains(access) || self.global_only.contains(access)
    }

    pub fn is_global_only(&self, access: &AccessType) -> bool {
        self.global_only.contains(access)
    }

    /// The listed spelling of `name`, compared without regard to ASCII case.
    pub fn canonical(&self, name: &str) -> Option<&AccessType> {
        self.database
            .iter()
            .chain(&self.global_only)
            .find(|a| a.as_str().eq_ignore_ascii_case(name))
    }

    /// Every recognized privilege, sorted.
    pub fn all(&self) -> BTreeSet<&AccessType> {
        self.database.iter().chain(&self.global_only).collect()
    }
}

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// What the violation is about: a field, a column, a privilege.
    pub subject: String,
    pub message: String,
}

impl Violation {
    fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

/// All violations found for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }

    /// True if any violation message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.0.iter().any(|v| v.message.contains(needle))
    }

    pub(crate) fn single(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![Violation::new(subject, message)])
    }

    fn push(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        self.0.push(Violation::new(subject, message));
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// Checks declarations against domain invariants.
#[derive(Debug, Clone)]
pub struct Validator {
    allow: Arc<AllowList>,
    default_cluster: Option<String>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Arc::clone(AllowList::standard()))
    }
}

impl Validator {
    pub fn new(allow: impl Into<Arc<AllowList>>) -> Self {
        Self {
            allow: allow.into(),
            default_cluster: None,
        }
    }

    pub fn with_allow_list(mut self, allow: impl Into<Arc<AllowList>>) -> Self {
        self.allow = allow.into();
        self
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow
    }

    /// Cluster-requiring engines accept the default cluster.
    pub fn with_default_cluster(mut self, cluster: Option<String>) -> Self {
        self.default_cluster = cluster.filter(|c| !c.is_empty());
        self
    }

    /// Validate a resource, failing if any violation was found.
    pub fn validate(&self, resource: &Resource) -> Result<(), Violations> {
        let violations = self.violations(resource);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    pub fn violations(&self, resource: &Resource) -> Violations {
        let mut out = Violations::default();
        match resource {
            Resource::Database(db) => self.check_database(db, &mut out),
            Resource::Table(table) => self.check_table(table, &mut out),
            Resource::View(view) => self.check_view(view, &mut out),
            Resource::Role(role) => self.check_role(role, &mut out),
            Resource::User(user) => self.check_user(user, &mut out),
        }
        out
    }

    /// Validate a role given as individual grants: every grant must be
    /// allowed, global-only privileges need the wildcard scope, and there
    /// must be at most one concrete database.
    pub fn validate_grants(&self, role_name: &str, grants: &[Grant]) -> Violations {
        let mut out = Violations::default();
        let databases: BTreeSet<&str> = grants
            .iter()
            .filter_map(|g| g.database.as_deref())
            .filter(|db| *db != WILDCARD_DATABASE)
            .collect();
        if databases.len() > 1 {
            let list: Vec<&str> = databases.into_iter().collect();
            out.push(
                "privileges",
                format!(
                    "role {role_name} has privileges on different databases: {}",
                    list.join(", ")
                ),
            );
        }
        for grant in grants {
            self.check_privilege(&grant.access_type, grant.scope(), &mut out);
        }
        out
    }

    fn check_name(&self, name: &str, out: &mut Violations) {
        if name.trim().is_empty() {
            out.push("name", "must not be empty");
        }
    }

    fn check_privilege(&self, access: &AccessType, database: &str, out: &mut Violations) {
        if !self.allow.is_allowed(access) {
            out.push(
                access.as_str(),
                format!("{access} isn't in the allowed privileges list"),
            );
        } else if self.allow.is_global_only(access) && database != WILDCARD_DATABASE {
            out.push(
                access.as_str(),
                format!("Global privilege {access} is only allowed for database '*'"),
            );
        }
    }

    fn check_database(&self, db: &DatabaseSpec, out: &mut Violations) {
        self.check_name(&db.name, out);
    }

    fn check_role(&self, role: &RoleSpec, out: &mut Violations) {
        self.check_name(&role.name, out);
        if role.database.trim().is_empty() {
            out.push("database", "must be a database name or '*'");
        }
        for access in &role.privileges {
            self.check_privilege(access, &role.database, out);
        }
    }

    fn check_user(&self, user: &UserSpec, out: &mut Violations) {
        self.check_name(&user.name, out);
        if user.password.is_empty() {
            out.push("password", "must not be empty");
        }
        for role in &user.roles {
            if role.trim().is_empty() {
                out.push("roles", "role names must not be empty");
            }
        }
    }

    fn check_view(&self, view: &ViewSpec, out: &mut Violations) {
        self.check_name(&view.name, out);
        if view.database.trim().is_empty() {
            out.push("database", "must not be empty");
        }
        if view.query.trim().is_empty() {
            out.push("query", "must not be empty");
        }
        if !view.materialized && view.to_table.is_some() {
            out.push("to_table", "only materialized views can have a target table");
        }
    }

    fn check_table(&self, table: &TableSpec, out: &mut Violations) {
        self.check_name(&table.name, out);
        if table.database.trim().is_empty() {
            out.push("database", "must not be empty");
        }
        if table.engine.trim().is_empty() {
            out.push("engine", "must not be empty");
        }

        let mut seen = HashSet::new();
        for col in &table.columns {
            if col.name.trim().is_empty() {
                out.push("columns", "column names must not be empty");
            } else if !seen.insert(col.name.as_str()) {
                out.push(
                    format!("columns.{}", col.name),
                    "duplicate column name",
                );
            }
            if col.column_type.trim().is_empty() {
                out.push(format!("columns.{}", col.name), "type must not be empty");
            }
        }

        for (field, keys) in [("order_by", &table.order_by), ("primary_key", &table.primary_key)] {
            for key in keys {
                if key.trim().is_empty() {
                    out.push(field, "entries must not be empty");
                } else if !table.columns.is_empty()
                    && is_identifier(key)
                    && table.find_column(key).is_none()
                {
                    out.push(field, format!("unknown column '{key}'"));
                }
            }
        }

        if !table.primary_key.is_empty()
            && !table.order_by.is_empty()
            && !table.order_by.starts_with(&table.primary_key)
        {
            out.push("primary_key", "must be a prefix of order_by");
        }

        for partition in &table.partition_by {
            if partition.by.trim().is_empty() {
                out.push("partition_by", "'by' must not be empty");
            }
            if partition.modulo == Some(0) {
                out.push("partition_by", "mod must be greater than zero");
            }
        }

        let engine = table.engine.as_str();
        if engine.ends_with("MergeTree") && table.columns.is_empty() {
            out.push("columns", format!("{engine} tables need at least one column"));
        }

        let has_cluster = table.cluster.as_deref().is_some_and(|c| !c.is_empty())
            || self.default_cluster.is_some();
        if (engine.starts_with("Replicated") || engine == "Distributed") && !has_cluster {
            out.push("cluster", format!("{engine} tables need a cluster"));
        }
        if engine == "Distributed" && table.engine_params.len() < 3 {
            out.push(
                "engine_params",
                "Distributed needs at least cluster, database and table parameters",
            );
        }

        for index in &table.indexes {
            if index.name.trim().is_empty()
                || index.expression.trim().is_empty()
                || index.index_type.trim().is_empty()
            {
                out.push("indexes", "indexes need a name, an expression and a type");
            }
        }
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
