//! Declarations as the host writes them, and their conversion to specs.
//!
//! Field names follow the provider's attribute names (`engine_params`,
//! `partition_function`, `mod`, ...). Shapes are checked once, here; the
//! rest of the crate only ever sees typed specs.

use chdecl_spec::{
    AccessType, ColumnDefault, ColumnSpec, DatabaseSpec, DefaultKind, IndexSpec,
    PartitionFunction, PartitionSpec, Resource, RoleSpec, TableSpec, UserSpec, ViewSpec,
    WILDCARD_DATABASE,
};
use facet::Facet;
use indexmap::IndexMap;
use thiserror::Error;

use crate::validate::AllowList;

/// A declaration that could not be turned into a spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclError {
    #[error("{field}: unknown value '{value}'")]
    Unknown { field: String, value: String },

    #[error("{field}: {message}")]
    Invalid { field: String, message: String },

    #[error("failed to parse declaration: {0}")]
    Parse(String),
}

impl DeclError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        DeclError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

macro_rules! impl_from_styx {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Parse a styx document into this declaration.
                pub fn from_styx(source: &str) -> Result<Self, DeclError> {
                    facet_styx::from_str(source).map_err(|e| DeclError::Parse(e.to_string()))
                }
            }
        )*
    };
}

impl_from_styx!(DatabaseDecl, TableDecl, ViewDecl, RoleDecl, UserDecl);

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Databases
// ============================================================================

#[derive(Debug, Clone, Default, Facet)]
pub struct DatabaseDecl {
    #[facet(default)]
    pub cluster: Option<String>,
    pub name: String,
    #[facet(default)]
    pub comment: String,
}

impl TryFrom<DatabaseDecl> for DatabaseSpec {
    type Error = DeclError;

    fn try_from(decl: DatabaseDecl) -> Result<Self, DeclError> {
        Ok(DatabaseSpec {
            cluster: non_empty(decl.cluster),
            name: decl.name,
            comment: decl.comment,
        })
    }
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, Default, Facet)]
pub struct ColumnDecl {
    pub name: String,
    #[facet(rename = "type")]
    pub column_type: String,
    #[facet(default)]
    pub nullable: bool,
    #[facet(default)]
    pub comment: String,
    #[facet(default)]
    pub default_kind: Option<String>,
    #[facet(default)]
    pub default_expression: Option<String>,
    #[facet(default)]
    pub compression_codec: Option<String>,
}

impl TryFrom<ColumnDecl> for ColumnSpec {
    type Error = DeclError;

    fn try_from(decl: ColumnDecl) -> Result<Self, DeclError> {
        let field = |name: &str| format!("column.{}.{name}", decl.name);

        let kind = match non_empty(decl.default_kind.clone()) {
            Some(kind) => Some(DefaultKind::parse(&kind).ok_or_else(|| DeclError::Unknown {
                field: field("default_kind"),
                value: kind.clone(),
            })?),
            None => None,
        };
        let default = match (kind, non_empty(decl.default_expression.clone())) {
            (kind, Some(expression)) => Some(ColumnDefault {
                kind: kind.unwrap_or(DefaultKind::Default),
                expression,
            }),
            (Some(_), None) => {
                return Err(DeclError::invalid(
                    field("default_kind"),
                    "requires a default_expression",
                ));
            }
            (None, None) => None,
        };

        Ok(ColumnSpec {
            default,
            codec: non_empty(decl.compression_codec),
            name: decl.name,
            column_type: decl.column_type,
            nullable: decl.nullable,
            comment: decl.comment,
        })
    }
}

#[derive(Debug, Clone, Default, Facet)]
pub struct IndexDecl {
    pub name: String,
    pub expression: String,
    #[facet(rename = "type")]
    pub index_type: String,
    #[facet(default)]
    pub granularity: Option<u64>,
}

impl TryFrom<IndexDecl> for IndexSpec {
    type Error = DeclError;

    fn try_from(decl: IndexDecl) -> Result<Self, DeclError> {
        if decl.granularity == Some(0) {
            return Err(DeclError::invalid(
                format!("index.{}.granularity", decl.name),
                "must be at least 1",
            ));
        }
        Ok(IndexSpec {
            name: decl.name,
            expression: decl.expression,
            index_type: decl.index_type,
            granularity: decl.granularity,
        })
    }
}

#[derive(Debug, Clone, Default, Facet)]
pub struct PartitionDecl {
    pub by: String,
    #[facet(default)]
    pub partition_function: Option<String>,
    #[facet(default, rename = "mod")]
    pub modulo: Option<u64>,
}

impl TryFrom<PartitionDecl> for PartitionSpec {
    type Error = DeclError;

    fn try_from(decl: PartitionDecl) -> Result<Self, DeclError> {
        let function = match non_empty(decl.partition_function) {
            Some(name) => Some(PartitionFunction::parse(&name).ok_or_else(|| {
                DeclError::Unknown {
                    field: "partition_by.partition_function".to_string(),
                    value: name.clone(),
                }
            })?),
            None => None,
        };
        if decl.modulo == Some(0) {
            return Err(DeclError::invalid("partition_by.mod", "must not be 0"));
        }
        Ok(PartitionSpec {
            by: decl.by,
            function,
            modulo: decl.modulo,
        })
    }
}

#[derive(Debug, Clone, Default, Facet)]
pub struct TableDecl {
    #[facet(default)]
    pub cluster: Option<String>,
    pub database: String,
    pub name: String,
    #[facet(default)]
    pub engine: Option<String>,
    #[facet(default)]
    pub engine_params: Vec<String>,
    #[facet(default)]
    pub column: Vec<ColumnDecl>,
    #[facet(default)]
    pub index: Vec<IndexDecl>,
    #[facet(default)]
    pub order_by: Vec<String>,
    #[facet(default)]
    pub primary_key: Vec<String>,
    #[facet(default)]
    pub partition_by: Vec<PartitionDecl>,
    #[facet(default)]
    pub settings: IndexMap<String, String>,
    /// Expression to action; an empty action means the default (delete).
    #[facet(default)]
    pub ttl: IndexMap<String, String>,
    #[facet(default)]
    pub comment: String,
}

impl TryFrom<TableDecl> for TableSpec {
    type Error = DeclError;

    fn try_from(decl: TableDecl) -> Result<Self, DeclError> {
        let mut table = TableSpec::new(decl.database, decl.name);
        table.cluster = non_empty(decl.cluster);
        if let Some(engine) = non_empty(decl.engine) {
            table.engine = engine;
        }
        table.engine_params = decl.engine_params;
        table.columns = decl
            .column
            .into_iter()
            .map(ColumnSpec::try_from)
            .collect::<Result<_, _>>()?;
        table.indexes = decl
            .index
            .into_iter()
            .map(IndexSpec::try_from)
            .collect::<Result<_, _>>()?;
        table.order_by = decl.order_by;
        table.primary_key = decl.primary_key;
        table.partition_by = decl
            .partition_by
            .into_iter()
            .map(PartitionSpec::try_from)
            .collect::<Result<_, _>>()?;
        table.settings = decl.settings.into_iter().collect();
        table.ttl = decl.ttl.into_iter().collect();
        table.comment = decl.comment;
        Ok(table)
    }
}

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Clone, Default, Facet)]
pub struct ViewDecl {
    #[facet(default)]
    pub cluster: Option<String>,
    pub database: String,
    pub name: String,
    pub query: String,
    #[facet(default)]
    pub materialized: bool,
    #[facet(default)]
    pub to_table: Option<String>,
    #[facet(default)]
    pub comment: String,
}

impl TryFrom<ViewDecl> for ViewSpec {
    type Error = DeclError;

    fn try_from(decl: ViewDecl) -> Result<Self, DeclError> {
        let to_table = non_empty(decl.to_table);
        if to_table.is_some() && !decl.materialized {
            return Err(DeclError::invalid(
                "to_table",
                "only materialized views have a target table",
            ));
        }
        Ok(ViewSpec {
            cluster: non_empty(decl.cluster),
            database: decl.database,
            name: decl.name,
            query: decl.query,
            materialized: decl.materialized,
            to_table,
            comment: decl.comment,
        })
    }
}

// ============================================================================
// Roles and users
// ============================================================================

#[derive(Debug, Clone, Default, Facet)]
pub struct RoleDecl {
    pub name: String,
    /// Defaults to all databases.
    #[facet(default)]
    pub database: Option<String>,
    #[facet(default)]
    pub privileges: Vec<String>,
}

impl TryFrom<RoleDecl> for RoleSpec {
    type Error = DeclError;

    fn try_from(decl: RoleDecl) -> Result<Self, DeclError> {
        let database = non_empty(decl.database).unwrap_or_else(|| WILDCARD_DATABASE.to_string());
        let mut role = RoleSpec::new(decl.name, database);
        let allow = AllowList::standard();
        for privilege in decl.privileges {
            let privilege = privilege.trim();
            if privilege.is_empty() {
                return Err(DeclError::invalid("privileges", "must not contain empty entries"));
            }
            let access = match allow.canonical(privilege) {
                Some(known) => known.clone(),
                None => AccessType::new(privilege.to_string()),
            };
            role.privileges.insert(access);
        }
        Ok(role)
    }
}

#[derive(Clone, Default, Facet)]
pub struct UserDecl {
    pub name: String,
    pub password: String,
    #[facet(default)]
    pub roles: Vec<String>,
}

impl std::fmt::Debug for UserDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDecl")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .field("roles", &self.roles)
            .finish()
    }
}

impl TryFrom<UserDecl> for UserSpec {
    type Error = DeclError;

    fn try_from(decl: UserDecl) -> Result<Self, DeclError> {
        let mut user = UserSpec::new(decl.name, decl.password);
        user.roles = decl.roles.into_iter().collect();
        Ok(user)
    }
}

// ============================================================================
// Any resource
// ============================================================================

/// One declaration of any kind.
#[derive(Debug, Clone)]
pub enum ResourceDecl {
    Database(DatabaseDecl),
    Table(TableDecl),
    View(ViewDecl),
    Role(RoleDecl),
    User(UserDecl),
}

impl TryFrom<ResourceDecl> for Resource {
    type Error = DeclError;

    fn try_from(decl: ResourceDecl) -> Result<Self, DeclError> {
        Ok(match decl {
            ResourceDecl::Database(d) => Resource::Database(d.try_into()?),
            ResourceDecl::Table(d) => Resource::Table(d.try_into()?),
            ResourceDecl::View(d) => Resource::View(d.try_into()?),
            ResourceDecl::Role(d) => Resource::Role(d.try_into()?),
            ResourceDecl::User(d) => Resource::User(d.try_into()?),
        })
    }
}
