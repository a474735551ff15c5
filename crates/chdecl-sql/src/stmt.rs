//! DDL and DCL statements.

use chdecl_spec::DefaultKind;

/// A statement the reconciler can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    CreateDatabase(CreateDatabaseStmt),
    DropDatabase(DropDatabaseStmt),
    CreateTable(CreateTableStmt),
    AlterTable(AlterTableStmt),
    DropTable(DropTableStmt),
    CreateView(CreateViewStmt),
    DropView(DropViewStmt),
    CreateRole(CreateRoleStmt),
    DropRole(DropRoleStmt),
    GrantPrivileges(GrantPrivilegesStmt),
    RevokePrivileges(RevokePrivilegesStmt),
    CreateUser(CreateUserStmt),
    AlterUser(AlterUserStmt),
    DropUser(DropUserStmt),
    GrantRoles(GrantRolesStmt),
    RevokeRoles(RevokeRolesStmt),
}

/// How CREATE statements treat an object that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreateMode {
    /// Fail if the object exists.
    #[default]
    Plain,
    /// `IF NOT EXISTS`
    IfNotExists,
    /// `OR REPLACE`
    OrReplace,
}

impl CreateMode {
    /// Resolve the two configuration flags. `IF NOT EXISTS` wins.
    pub fn from_flags(if_not_exists: bool, or_replace: bool) -> Self {
        match (if_not_exists, or_replace) {
            (true, _) => CreateMode::IfNotExists,
            (false, true) => CreateMode::OrReplace,
            (false, false) => CreateMode::Plain,
        }
    }
}

// ============================================================================
// Databases
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDatabaseStmt {
    pub name: String,
    pub on_cluster: Option<String>,
    pub if_not_exists: bool,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropDatabaseStmt {
    pub name: String,
    pub on_cluster: Option<String>,
}

// ============================================================================
// Tables
// ============================================================================

/// A CREATE TABLE statement.
///
/// `table` is the qualified `database.name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateTableStmt {
    pub table: String,
    pub mode: CreateMode,
    pub on_cluster: Option<String>,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    pub engine: String,
    pub engine_params: Vec<String>,
    pub order_by: Vec<String>,
    /// Rendered partitioning expressions.
    pub partition_by: Vec<String>,
    /// Left empty when it matches `order_by`.
    pub primary_key: Vec<String>,
    pub settings: Vec<(String, String)>,
    pub comment: String,
}

/// A column definition inside CREATE TABLE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// The full type, with any `Nullable(...)` wrapper applied.
    pub column_type: String,
    pub default: Option<(DefaultKind, String)>,
    pub comment: Option<String>,
    /// The complete `CODEC(...)` clause.
    pub codec: Option<String>,
}

/// A data-skipping index inside CREATE TABLE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub expression: String,
    pub index_type: String,
    pub granularity: Option<u64>,
}

/// A single-operation ALTER TABLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterTableStmt {
    pub table: String,
    pub on_cluster: Option<String>,
    pub op: AlterTableOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterTableOp {
    /// MODIFY COMMENT '...'
    ModifyComment(String),
    /// COMMENT COLUMN name '...'
    CommentColumn { column: String, comment: String },
    /// MODIFY TTL expr [action], ...
    ModifyTtl(Vec<TtlEntry>),
    /// REMOVE TTL
    RemoveTtl,
}

/// One TTL rule: an expression and an optional action such as `DELETE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlEntry {
    pub expression: String,
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTableStmt {
    pub table: String,
    pub on_cluster: Option<String>,
}

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateViewStmt {
    pub view: String,
    pub mode: CreateMode,
    pub on_cluster: Option<String>,
    pub materialized: bool,
    /// Qualified target table, materialized views only.
    pub to_table: Option<String>,
    pub query: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropViewStmt {
    pub view: String,
    pub on_cluster: Option<String>,
}

// ============================================================================
// Roles and privileges
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoleStmt {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropRoleStmt {
    pub name: String,
}

/// GRANT p1,p2 ON db.* TO role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPrivilegesStmt {
    pub privileges: Vec<String>,
    /// A database name, or `*` for all databases.
    pub database: String,
    pub role: String,
}

/// REVOKE p1,p2 ON db.* FROM role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokePrivilegesStmt {
    pub privileges: Vec<String>,
    pub database: String,
    pub role: String,
}

// ============================================================================
// Users
// ============================================================================

#[derive(Clone, PartialEq, Eq)]
pub struct CreateUserStmt {
    pub name: String,
    pub password: String,
    pub default_roles: Vec<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AlterUserStmt {
    pub name: String,
    pub rename_to: Option<String>,
    pub password: Option<String>,
    /// Always restated in full; empty means `NONE`.
    pub default_roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropUserStmt {
    pub name: String,
}

/// GRANT r1,r2 TO user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRolesStmt {
    pub roles: Vec<String>,
    pub user: String,
}

/// REVOKE r1,r2 FROM user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeRolesStmt {
    pub roles: Vec<String>,
    pub user: String,
}

impl std::fmt::Debug for CreateUserStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUserStmt")
            .field("name", &self.name)
            .field("password", &"***")
            .field("default_roles", &self.default_roles)
            .finish()
    }
}

impl std::fmt::Debug for AlterUserStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlterUserStmt")
            .field("name", &self.name)
            .field("rename_to", &self.rename_to)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("default_roles", &self.default_roles)
            .finish()
    }
}

// ============================================================================
// Builder-style constructors
// ============================================================================

impl CreateTableStmt {
    pub fn new(table: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            engine: engine.into(),
            ..Default::default()
        }
    }

    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    pub fn order_by(mut self, exprs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.order_by.extend(exprs.into_iter().map(Into::into));
        self
    }

    pub fn partition_by(mut self, expr: impl Into<String>) -> Self {
        self.partition_by.push(expr.into());
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.push((key.into(), value.into()));
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            ..Default::default()
        }
    }
}

impl AlterTableStmt {
    pub fn new(table: impl Into<String>, on_cluster: Option<String>, op: AlterTableOp) -> Self {
        Self {
            table: table.into(),
            on_cluster,
            op,
        }
    }
}

impl From<CreateDatabaseStmt> for Stmt {
    fn from(s: CreateDatabaseStmt) -> Self {
        Stmt::CreateDatabase(s)
    }
}

impl From<DropDatabaseStmt> for Stmt {
    fn from(s: DropDatabaseStmt) -> Self {
        Stmt::DropDatabase(s)
    }
}

impl From<CreateTableStmt> for Stmt {
    fn from(s: CreateTableStmt) -> Self {
        Stmt::CreateTable(s)
    }
}

impl From<AlterTableStmt> for Stmt {
    fn from(s: AlterTableStmt) -> Self {
        Stmt::AlterTable(s)
    }
}

impl From<DropTableStmt> for Stmt {
    fn from(s: DropTableStmt) -> Self {
        Stmt::DropTable(s)
    }
}

impl From<CreateViewStmt> for Stmt {
    fn from(s: CreateViewStmt) -> Self {
        Stmt::CreateView(s)
    }
}

impl From<DropViewStmt> for Stmt {
    fn from(s: DropViewStmt) -> Self {
        Stmt::DropView(s)
    }
}

impl From<CreateRoleStmt> for Stmt {
    fn from(s: CreateRoleStmt) -> Self {
        Stmt::CreateRole(s)
    }
}

impl From<DropRoleStmt> for Stmt {
    fn from(s: DropRoleStmt) -> Self {
        Stmt::DropRole(s)
    }
}

impl From<GrantPrivilegesStmt> for Stmt {
    fn from(s: GrantPrivilegesStmt) -> Self {
        Stmt::GrantPrivileges(s)
    }
}

impl From<RevokePrivilegesStmt> for Stmt {
    fn from(s: RevokePrivilegesStmt) -> Self {
        Stmt::RevokePrivileges(s)
    }
}

impl From<CreateUserStmt> for Stmt {
    fn from(s: CreateUserStmt) -> Self {
        Stmt::CreateUser(s)
    }
}

impl From<AlterUserStmt> for Stmt {
    fn from(s: AlterUserStmt) -> Self {
        Stmt::AlterUser(s)
    }
}

impl From<DropUserStmt> for Stmt {
    fn from(s: DropUserStmt) -> Self {
        Stmt::DropUser(s)
    }
}

impl From<GrantRolesStmt> for Stmt {
    fn from(s: GrantRolesStmt) -> Self {
        Stmt::GrantRoles(s)
    }
}

impl From<RevokeRolesStmt> for Stmt {
    fn from(s: RevokeRolesStmt) -> Self {
        Stmt::RevokeRoles(s)
    }
}
