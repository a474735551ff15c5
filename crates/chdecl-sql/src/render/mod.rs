//! Render statement AST to SQL text.

use std::fmt;

use crate::stmt::*;
use crate::{Joined, Lit, OnCluster};

/// Rendering options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderContext {
    /// Replace passwords with `***`. Used for anything that ends up in logs
    /// or error messages.
    pub redact_secrets: bool,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redacted() -> Self {
        Self {
            redact_secrets: true,
        }
    }

    fn secret<'a>(&self, value: &'a str) -> &'a str {
        if self.redact_secrets { "***" } else { value }
    }
}

/// Wrapper for rendering a `Render` type via `Display`.
///
/// Allows using `write!(f, "{}", Fmt(ctx, &stmt))` in format strings.
pub struct Fmt<'a, T: Render>(
    /// The rendering options.
    &'a RenderContext,
    /// The value to render.
    &'a T,
);

impl<T: Render> fmt::Display for Fmt<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.1.render(self.0, f)
    }
}

// ============================================================================
// Render implementations
// ============================================================================

/// Trait for types that can be rendered to SQL.
pub trait Render {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl Render for CreateDatabaseStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE DATABASE ")?;
        if self.if_not_exists {
            write!(f, "IF NOT EXISTS ")?;
        }
        let cluster = OnCluster(self.on_cluster.as_deref());
        let comment = Lit(&self.comment);
        write!(f, "{}{cluster} COMMENT {comment}", self.name)
    }
}

impl Render for DropDatabaseStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cluster = OnCluster(self.on_cluster.as_deref());
        write!(f, "DROP DATABASE {}{cluster} SYNC", self.name)
    }
}

impl Render for ColumnDef {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.column_type)?;
        if let Some((kind, expr)) = &self.default {
            write!(f, " {kind} {expr}")?;
        }
        if let Some(comment) = &self.comment {
            write!(f, " COMMENT {}", Lit(comment))?;
        }
        if let Some(codec) = &self.codec {
            write!(f, " {codec}")?;
        }
        Ok(())
    }
}

impl Render for IndexDef {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "INDEX {} {} TYPE {}",
            self.name, self.expression, self.index_type
        )?;
        if let Some(granularity) = self.granularity {
            write!(f, " GRANULARITY {granularity}")?;
        }
        Ok(())
    }
}

impl Render for CreateTableStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE ")?;
        if self.mode == CreateMode::OrReplace {
            write!(f, "OR REPLACE ")?;
        }
        write!(f, "TABLE ")?;
        if self.mode == CreateMode::IfNotExists {
            write!(f, "IF NOT EXISTS ")?;
        }
        write!(f, "{}{}", self.table, OnCluster(self.on_cluster.as_deref()))?;

        // Column list, omitted entirely when empty
        if !self.columns.is_empty() || !self.indexes.is_empty() {
            write!(f, " (")?;
            let mut first = true;
            for col in &self.columns {
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                write!(f, "{}", Fmt(ctx, col))?;
            }
            for index in &self.indexes {
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                write!(f, "{}", Fmt(ctx, index))?;
            }
            write!(f, ")")?;
        }

        let params = Joined(&self.engine_params, ", ");
        write!(f, " ENGINE = {}({params})", self.engine)?;

        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ({})", Joined(&self.order_by, ", "))?;
        }

        if !self.partition_by.is_empty() {
            write!(f, " PARTITION BY {}", Joined(&self.partition_by, ", "))?;
        }

        if !self.primary_key.is_empty() {
            write!(f, " PRIMARY KEY ({})", Joined(&self.primary_key, ", "))?;
        }

        if !self.settings.is_empty() {
            write!(f, " SETTINGS ")?;
            for (i, (key, value)) in self.settings.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key} = {}", Lit(value))?;
            }
        }

        write!(f, " COMMENT {}", Lit(&self.comment))
    }
}

impl Render for AlterTableStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cluster = OnCluster(self.on_cluster.as_deref());
        write!(f, "ALTER TABLE {}{cluster} ", self.table)?;
        match &self.op {
            AlterTableOp::ModifyComment(comment) => write!(f, "MODIFY COMMENT {}", Lit(comment)),
            AlterTableOp::CommentColumn { column, comment } => {
                write!(f, "COMMENT COLUMN {column} {}", Lit(comment))
            }
            AlterTableOp::ModifyTtl(entries) => {
                write!(f, "MODIFY TTL ")?;
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", entry.expression)?;
                    if let Some(action) = &entry.action {
                        write!(f, " {action}")?;
                    }
                }
                Ok(())
            }
            AlterTableOp::RemoveTtl => write!(f, "REMOVE TTL"),
        }
    }
}

impl Render for DropTableStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cluster = OnCluster(self.on_cluster.as_deref());
        write!(f, "DROP TABLE {}{cluster} SYNC", self.table)
    }
}

impl Render for CreateViewStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE ")?;
        if self.mode == CreateMode::OrReplace {
            write!(f, "OR REPLACE ")?;
        }
        if self.materialized {
            write!(f, "MATERIALIZED ")?;
        }
        write!(f, "VIEW ")?;
        if self.mode == CreateMode::IfNotExists {
            write!(f, "IF NOT EXISTS ")?;
        }
        write!(f, "{}{}", self.view, OnCluster(self.on_cluster.as_deref()))?;
        if self.materialized
            && let Some(to_table) = &self.to_table
        {
            write!(f, " TO {to_table}")?;
        }
        write!(f, " AS {}", self.query)?;
        if !self.comment.is_empty() {
            write!(f, " COMMENT {}", Lit(&self.comment))?;
        }
        Ok(())
    }
}

impl Render for DropViewStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cluster = OnCluster(self.on_cluster.as_deref());
        write!(f, "DROP VIEW {}{cluster} SYNC", self.view)
    }
}

impl Render for CreateRoleStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE ROLE {}", self.name)
    }
}

impl Render for DropRoleStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DROP ROLE {}", self.name)
    }
}

impl Render for GrantPrivilegesStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let privileges = Joined(&self.privileges, ",");
        write!(f, "GRANT {privileges} ON {}.* TO {}", self.database, self.role)
    }
}

impl Render for RevokePrivilegesStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let privileges = Joined(&self.privileges, ",");
        write!(
            f,
            "REVOKE {privileges} ON {}.* FROM {}",
            self.database, self.role
        )
    }
}

impl Render for CreateUserStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = Lit(ctx.secret(&self.password));
        write!(
            f,
            "CREATE USER {} IDENTIFIED WITH sha256_password BY {password}",
            self.name
        )?;
        if !self.default_roles.is_empty() {
            write!(f, " DEFAULT ROLE {}", Joined(&self.default_roles, ","))?;
        }
        Ok(())
    }
}

impl Render for AlterUserStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALTER USER {}", self.name)?;
        if let Some(new_name) = &self.rename_to {
            write!(f, " RENAME TO {new_name}")?;
        }
        if let Some(password) = &self.password {
            let password = Lit(ctx.secret(password));
            write!(f, " IDENTIFIED WITH sha256_password BY {password}")?;
        }
        if self.default_roles.is_empty() {
            write!(f, " DEFAULT ROLE NONE")
        } else {
            write!(f, " DEFAULT ROLE {}", Joined(&self.default_roles, ","))
        }
    }
}

impl Render for DropUserStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DROP USER {}", self.name)
    }
}

impl Render for GrantRolesStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GRANT {} TO {}", Joined(&self.roles, ","), self.user)
    }
}

impl Render for RevokeRolesStmt {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REVOKE {} FROM {}", Joined(&self.roles, ","), self.user)
    }
}

impl Render for Stmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::CreateDatabase(s) => s.render(ctx, f),
            Stmt::DropDatabase(s) => s.render(ctx, f),
            Stmt::CreateTable(s) => s.render(ctx, f),
            Stmt::AlterTable(s) => s.render(ctx, f),
            Stmt::DropTable(s) => s.render(ctx, f),
            Stmt::CreateView(s) => s.render(ctx, f),
            Stmt::DropView(s) => s.render(ctx, f),
            Stmt::CreateRole(s) => s.render(ctx, f),
            Stmt::DropRole(s) => s.render(ctx, f),
            Stmt::GrantPrivileges(s) => s.render(ctx, f),
            Stmt::RevokePrivileges(s) => s.render(ctx, f),
            Stmt::CreateUser(s) => s.render(ctx, f),
            Stmt::AlterUser(s) => s.render(ctx, f),
            Stmt::DropUser(s) => s.render(ctx, f),
            Stmt::GrantRoles(s) => s.render(ctx, f),
            Stmt::RevokeRoles(s) => s.render(ctx, f),
        }
    }
}

// ============================================================================
// Convenience methods
// ============================================================================

/// Render a statement to the SQL text sent to the server.
pub fn render(stmt: &impl Render) -> String {
    let ctx = RenderContext::new();
    format!("{}", Fmt(&ctx, stmt))
}

/// Render a statement with secrets masked, for logs and errors.
pub fn render_redacted(stmt: &impl Render) -> String {
    let ctx = RenderContext::redacted();
    format!("{}", Fmt(&ctx, stmt))
}
