//! Table specifications.

use std::collections::BTreeMap;
use std::fmt;

use crate::Identity;

/// A table to create.
///
/// List-valued fields (`order_by`, `primary_key`, `partition_by`, `columns`,
/// `indexes`) keep declaration order; map-valued fields are sorted by key so
/// that rendered statements are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSpec {
    pub cluster: Option<String>,
    pub database: String,
    pub name: String,

    /// Engine name, e.g. `MergeTree` or `ReplacingMergeTree`.
    pub engine: String,

    /// Engine parameters, rendered verbatim inside `Engine(...)`.
    pub engine_params: Vec<String>,

    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,

    pub order_by: Vec<String>,

    /// Rendered only when it differs from `order_by`.
    pub primary_key: Vec<String>,

    pub partition_by: Vec<PartitionSpec>,

    pub settings: BTreeMap<String, String>,

    /// TTL expression to action (`DELETE`, `TO DISK 'x'`, ...). An empty or
    /// `default` action means the bare expression.
    pub ttl: BTreeMap<String, String>,

    pub comment: String,
}

impl TableSpec {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            engine: "MergeTree".to_string(),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.cluster.as_deref(), &self.database, &self.name)
    }

    /// `database.name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    pub fn order_by<I, S>(mut self, exprs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = exprs.into_iter().map(Into::into).collect();
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The effective primary key: the declared one, or the ordering key.
    pub fn effective_primary_key(&self) -> &[String] {
        if self.primary_key.is_empty() {
            &self.order_by
        } else {
            &self.primary_key
        }
    }
}

/// A column in a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    /// ClickHouse type, without the `Nullable(...)` wrapper.
    pub column_type: String,
    pub nullable: bool,
    pub comment: String,
    pub default: Option<ColumnDefault>,
    /// Compression codec, either a bare codec list (`ZSTD(3)`) or a full
    /// `CODEC(...)` clause.
    pub codec: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            ..Default::default()
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn default_expr(mut self, kind: DefaultKind, expression: impl Into<String>) -> Self {
        self.default = Some(ColumnDefault {
            kind,
            expression: expression.into(),
        });
        self
    }

    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    /// The full type, wrapped in `Nullable(...)` when nullable.
    pub fn full_type(&self) -> String {
        if self.nullable {
            format!("Nullable({})", self.column_type)
        } else {
            self.column_type.clone()
        }
    }
}

/// How a column's default expression is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultKind {
    Default,
    Materialized,
    Alias,
    Ephemeral,
}

impl DefaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DefaultKind::Default => "DEFAULT",
            DefaultKind::Materialized => "MATERIALIZED",
            DefaultKind::Alias => "ALIAS",
            DefaultKind::Ephemeral => "EPHEMERAL",
        }
    }

    /// Parse the keyword as reported by `system.columns.default_kind`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEFAULT" => Some(DefaultKind::Default),
            "MATERIALIZED" => Some(DefaultKind::Materialized),
            "ALIAS" => Some(DefaultKind::Alias),
            "EPHEMERAL" => Some(DefaultKind::Ephemeral),
            _ => None,
        }
    }
}

impl fmt::Display for DefaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefault {
    pub kind: DefaultKind,
    pub expression: String,
}

/// A data-skipping index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub expression: String,
    /// Index type, e.g. `minmax` or `bloom_filter(0.01)`.
    pub index_type: String,
    pub granularity: Option<u64>,
}

/// Granularity the server applies when an index declares none.
pub const DEFAULT_INDEX_GRANULARITY: u64 = 1;

impl IndexSpec {
    pub fn effective_granularity(&self) -> u64 {
        self.granularity.unwrap_or(DEFAULT_INDEX_GRANULARITY)
    }

    /// Equal as far as the server can tell: an unset granularity is the
    /// default one.
    pub fn same_as(&self, other: &IndexSpec) -> bool {
        self.name == other.name
            && self.expression.trim() == other.expression.trim()
            && self.index_type.trim() == other.index_type.trim()
            && self.effective_granularity() == other.effective_granularity()
    }
}

/// One partitioning key element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSpec {
    /// Column or expression to partition by.
    pub by: String,
    pub function: Option<PartitionFunction>,
    pub modulo: Option<u64>,
}

impl PartitionSpec {
    pub fn by(expr: impl Into<String>) -> Self {
        Self {
            by: expr.into(),
            ..Default::default()
        }
    }

    pub fn function(mut self, function: PartitionFunction) -> Self {
        self.function = Some(function);
        self
    }

    pub fn modulo(mut self, modulo: u64) -> Self {
        self.modulo = Some(modulo);
        self
    }
}

/// Displays the partitioning expression: `toYYYYMM(ts)`, `id % 16`, or `id`.
impl fmt::Display for PartitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.function {
            Some(func) => write!(f, "{}({})", func, self.by)?,
            None => f.write_str(&self.by)?,
        }
        if let Some(m) = self.modulo {
            write!(f, " % {}", m)?;
        }
        Ok(())
    }
}

/// Date bucketing functions allowed in a partitioning key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionFunction {
    ToYyyyMm,
    ToYyyyMmDd,
    ToYyyyMmDdHhMmSs,
}

impl PartitionFunction {
    pub const ALL: [PartitionFunction; 3] = [
        PartitionFunction::ToYyyyMm,
        PartitionFunction::ToYyyyMmDd,
        PartitionFunction::ToYyyyMmDdHhMmSs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PartitionFunction::ToYyyyMm => "toYYYYMM",
            PartitionFunction::ToYyyyMmDd => "toYYYYMMDD",
            PartitionFunction::ToYyyyMmDdHhMmSs => "toYYYYMMDDhhmmss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

impl fmt::Display for PartitionFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
