//! Specification → statement synthesis.
//!
//! Every builder here is a pure function of its input and the
//! [`SynthOptions`]. Semantic checks belong to the validator and must run
//! first; the synthesizer renders whatever it is given.

use chdecl_spec::{
    AccessType, ColumnSpec, DatabaseSpec, IndexSpec, RoleSpec, TableSpec, UserSpec, ViewSpec,
};

use crate::stmt::*;

/// Options that shape synthesized statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthOptions {
    pub create_mode: CreateMode,
    /// Used as `ON CLUSTER` for specs that declare no cluster.
    pub default_cluster: Option<String>,
}

/// Builds statements from specifications.
#[derive(Debug, Clone, Default)]
pub struct Synthesizer {
    options: SynthOptions,
}

impl Synthesizer {
    pub fn new(options: SynthOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SynthOptions {
        &self.options
    }

    fn cluster(&self, declared: Option<&str>) -> Option<String> {
        declared
            .filter(|c| !c.is_empty())
            .or(self.options.default_cluster.as_deref())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    // ========================================================================
    // Databases
    // ========================================================================

    /// `OR REPLACE` has no meaning for databases; only `IF NOT EXISTS` is
    /// honoured.
    pub fn create_database(&self, db: &DatabaseSpec) -> CreateDatabaseStmt {
        CreateDatabaseStmt {
            name: db.name.clone(),
            on_cluster: self.cluster(db.cluster.as_deref()),
            if_not_exists: self.options.create_mode == CreateMode::IfNotExists,
            comment: db.comment.clone(),
        }
    }

    pub fn drop_database(&self, db: &DatabaseSpec) -> DropDatabaseStmt {
        DropDatabaseStmt {
            name: db.name.clone(),
            on_cluster: self.cluster(db.cluster.as_deref()),
        }
    }

    // ========================================================================
    // Tables
    // ========================================================================

    pub fn create_table(&self, table: &TableSpec) -> CreateTableStmt {
        let primary_key = if table.primary_key.is_empty() || table.primary_key == table.order_by {
            Vec::new()
        } else {
            table.primary_key.clone()
        };

        CreateTableStmt {
            table: table.qualified_name(),
            mode: self.options.create_mode,
            on_cluster: self.cluster(table.cluster.as_deref()),
            columns: table.columns.iter().map(column_def).collect(),
            indexes: table.indexes.iter().map(index_def).collect(),
            engine: table.engine.clone(),
            engine_params: table.engine_params.clone(),
            order_by: table.order_by.clone(),
            partition_by: table.partition_by.iter().map(|p| p.to_string()).collect(),
            primary_key,
            settings: table
                .settings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            comment: table.comment.clone(),
        }
    }

    /// The follow-up statement that applies the table's TTL, if it has one.
    pub fn modify_ttl(&self, table: &TableSpec) -> Option<AlterTableStmt> {
        if table.ttl.is_empty() {
            return None;
        }
        let entries = table
            .ttl
            .iter()
            .map(|(expression, action)| TtlEntry {
                expression: expression.clone(),
                action: ttl_action(action),
            })
            .collect();
        Some(self.alter_table(table, AlterTableOp::ModifyTtl(entries)))
    }

    pub fn remove_ttl(&self, table: &TableSpec) -> AlterTableStmt {
        self.alter_table(table, AlterTableOp::RemoveTtl)
    }

    pub fn modify_comment(&self, table: &TableSpec) -> AlterTableStmt {
        self.alter_table(table, AlterTableOp::ModifyComment(table.comment.clone()))
    }

    pub fn comment_column(&self, table: &TableSpec, column: &ColumnSpec) -> AlterTableStmt {
        self.alter_table(
            table,
            AlterTableOp::CommentColumn {
                column: column.name.clone(),
                comment: column.comment.clone(),
            },
        )
    }

    fn alter_table(&self, table: &TableSpec, op: AlterTableOp) -> AlterTableStmt {
        AlterTableStmt::new(
            table.qualified_name(),
            self.cluster(table.cluster.as_deref()),
            op,
        )
    }

    pub fn drop_table(&self, table: &TableSpec) -> DropTableStmt {
        DropTableStmt {
            table: table.qualified_name(),
            on_cluster: self.cluster(table.cluster.as_deref()),
        }
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Materialized views cannot be replaced in place, so `OR REPLACE`
    /// degrades to a plain create for them.
    pub fn create_view(&self, view: &ViewSpec) -> CreateViewStmt {
        let mode = match self.options.create_mode {
            CreateMode::OrReplace if view.materialized => CreateMode::Plain,
            mode => mode,
        };
        CreateViewStmt {
            view: view.qualified_name(),
            mode,
            on_cluster: self.cluster(view.cluster.as_deref()),
            materialized: view.materialized,
            to_table: if view.materialized {
                view.qualified_to_table()
            } else {
                None
            },
            query: view.query.trim().to_string(),
            comment: view.comment.clone(),
        }
    }

    /// Views take comment changes through ALTER TABLE.
    pub fn modify_view_comment(&self, view: &ViewSpec) -> AlterTableStmt {
        AlterTableStmt::new(
            view.qualified_name(),
            self.cluster(view.cluster.as_deref()),
            AlterTableOp::ModifyComment(view.comment.clone()),
        )
    }

    pub fn drop_view(&self, view: &ViewSpec) -> DropViewStmt {
        DropViewStmt {
            view: view.qualified_name(),
            on_cluster: self.cluster(view.cluster.as_deref()),
        }
    }

    // ========================================================================
    // Roles
    // ========================================================================

    pub fn create_role(&self, role: &RoleSpec) -> CreateRoleStmt {
        CreateRoleStmt {
            name: role.name.clone(),
        }
    }

    pub fn drop_role(&self, name: &str) -> DropRoleStmt {
        DropRoleStmt {
            name: name.to_string(),
        }
    }

    /// `None` when there is nothing to grant.
    pub fn grant_privileges<'a>(
        &self,
        role: &str,
        database: &str,
        privileges: impl IntoIterator<Item = &'a AccessType>,
    ) -> Option<GrantPrivilegesStmt> {
        let privileges = privilege_list(privileges);
        if privileges.is_empty() {
            return None;
        }
        Some(GrantPrivilegesStmt {
            privileges,
            database: database.to_string(),
            role: role.to_string(),
        })
    }

    /// `None` when there is nothing to revoke.
    pub fn revoke_privileges<'a>(
        &self,
        role: &str,
        database: &str,
        privileges: impl IntoIterator<Item = &'a AccessType>,
    ) -> Option<RevokePrivilegesStmt> {
        let privileges = privilege_list(privileges);
        if privileges.is_empty() {
            return None;
        }
        Some(RevokePrivilegesStmt {
            privileges,
            database: database.to_string(),
            role: role.to_string(),
        })
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn create_user(&self, user: &UserSpec) -> CreateUserStmt {
        CreateUserStmt {
            name: user.name.clone(),
            password: user.password.clone(),
            default_roles: user.roles.iter().cloned().collect(),
        }
    }

    /// ALTER USER for `current_name`, restating the full default-role list.
    pub fn alter_user(
        &self,
        current_name: &str,
        user: &UserSpec,
        password_changed: bool,
    ) -> AlterUserStmt {
        AlterUserStmt {
            name: current_name.to_string(),
            rename_to: (current_name != user.name).then(|| user.name.clone()),
            password: password_changed.then(|| user.password.clone()),
            default_roles: user.roles.iter().cloned().collect(),
        }
    }

    pub fn drop_user(&self, name: &str) -> DropUserStmt {
        DropUserStmt {
            name: name.to_string(),
        }
    }

    pub fn grant_roles<'a>(
        &self,
        user: &str,
        roles: impl IntoIterator<Item = &'a String>,
    ) -> Option<GrantRolesStmt> {
        let roles = sorted(roles);
        (!roles.is_empty()).then(|| GrantRolesStmt {
            roles,
            user: user.to_string(),
        })
    }

    pub fn revoke_roles<'a>(
        &self,
        user: &str,
        roles: impl IntoIterator<Item = &'a String>,
    ) -> Option<RevokeRolesStmt> {
        let roles = sorted(roles);
        (!roles.is_empty()).then(|| RevokeRolesStmt {
            roles,
            user: user.to_string(),
        })
    }
}

fn column_def(col: &ColumnSpec) -> ColumnDef {
    ColumnDef {
        name: col.name.clone(),
        column_type: col.full_type(),
        default: col
            .default
            .as_ref()
            .filter(|d| !d.expression.is_empty())
            .map(|d| (d.kind, d.expression.clone())),
        comment: (!col.comment.is_empty()).then(|| col.comment.clone()),
        codec: col.codec.as_deref().and_then(codec_clause),
    }
}

fn index_def(index: &IndexSpec) -> IndexDef {
    IndexDef {
        name: index.name.clone(),
        expression: index.expression.clone(),
        index_type: index.index_type.clone(),
        granularity: index.granularity,
    }
}

/// Wrap a codec list in `CODEC(...)` unless it already is one.
pub fn codec_clause(codec: &str) -> Option<String> {
    let codec = codec.trim();
    if codec.is_empty() {
        None
    } else if codec.to_ascii_uppercase().starts_with("CODEC(") {
        Some(codec.to_string())
    } else {
        Some(format!("CODEC({codec})"))
    }
}

/// An empty or `default` TTL action means the bare expression.
fn ttl_action(action: &str) -> Option<String> {
    let action = action.trim();
    if action.is_empty() || action.eq_ignore_ascii_case("default") {
        None
    } else {
        Some(action.to_string())
    }
}

fn privilege_list<'a>(privileges: impl IntoIterator<Item = &'a AccessType>) -> Vec<String> {
    let mut list: Vec<String> = privileges.into_iter().map(|p| p.to_string()).collect();
    list.sort();
    list.dedup();
    list
}

fn sorted<'a>(items: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut list: Vec<String> = items.into_iter().cloned().collect();
    list.sort();
    list.dedup();
    list
}
