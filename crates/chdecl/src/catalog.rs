//! Observed state, read from the server's system tables.
//!
//! Absence is not an error: every lookup returns `Ok(None)` when the object
//! does not exist. Nothing here parses DDL text; tables and views are
//! assembled from the catalog's metadata columns. Fields the catalog does not
//! expose structurally are taken from the prior declared spec when the
//! catalog agrees with it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chdecl_spec::{
    ColumnDefault, ColumnSpec, DatabaseInfo, DatabaseSpec, DefaultKind, Grant, IndexSpec,
    ObservedRole, ObservedUser, PartitionFunction, PartitionSpec, Resource, TableSpec, ViewSpec,
};

use crate::row::Row;
use crate::traced::{BoxFuture, Connection, ConnectionExt, DbError};

/// The setting the server reports for every MergeTree table.
const IMPLICIT_SETTINGS: &[(&str, &str)] = &[("index_granularity", "8192")];

/// An observed database and the tables that live in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedDatabase {
    pub info: DatabaseInfo,
    pub dependents: Vec<String>,
}

impl ObservedDatabase {
    /// The observed database as a spec. The catalog has no notion of the
    /// cluster a database was created on, so it comes from `cluster`.
    pub fn to_spec(&self, cluster: Option<&str>) -> DatabaseSpec {
        DatabaseSpec {
            cluster: cluster.map(str::to_string),
            name: self.info.name.clone(),
            comment: self.info.comment.clone(),
        }
    }
}

/// Any observed resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Database(ObservedDatabase),
    Table(TableSpec),
    View(ViewSpec),
    Role(ObservedRole),
    User(ObservedUser),
}

/// Source of observed state.
pub trait Catalog: Send + Sync {
    fn database<'a>(&'a self, name: &'a str)
    -> BoxFuture<'a, Result<Option<DatabaseInfo>, DbError>>;

    /// Names of the tables and views in `database`, sorted.
    fn dependents<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Result<Vec<String>, DbError>>;

    fn table<'a>(
        &'a self,
        database: &'a str,
        name: &'a str,
        prior: Option<&'a TableSpec>,
    ) -> BoxFuture<'a, Result<Option<TableSpec>, DbError>>;

    fn view<'a>(
        &'a self,
        database: &'a str,
        name: &'a str,
        prior: Option<&'a ViewSpec>,
    ) -> BoxFuture<'a, Result<Option<ViewSpec>, DbError>>;

    fn role<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<ObservedRole>, DbError>>;

    fn user<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<ObservedUser>, DbError>>;
}

/// Look up the observed counterpart of `target`.
///
/// `prior` is the previously declared spec, used to fill in what the catalog
/// cannot tell.
pub async fn observe<K: Catalog + ?Sized>(
    catalog: &K,
    target: &Resource,
    prior: Option<&Resource>,
) -> Result<Option<Observed>, DbError> {
    let observed = match target {
        Resource::Database(db) => match catalog.database(&db.name).await? {
            Some(info) => {
                let dependents = catalog.dependents(&info.name).await?;
                Some(Observed::Database(ObservedDatabase { info, dependents }))
            }
            None => None,
        },
        Resource::Table(table) => {
            let prior = match prior {
                Some(Resource::Table(t)) => Some(t),
                _ => None,
            };
            catalog
                .table(&table.database, &table.name, prior)
                .await?
                .map(Observed::Table)
        }
        Resource::View(view) => {
            let prior = match prior {
                Some(Resource::View(v)) => Some(v),
                _ => None,
            };
            catalog
                .view(&view.database, &view.name, prior)
                .await?
                .map(Observed::View)
        }
        Resource::Role(role) => catalog.role(&role.name).await?.map(Observed::Role),
        Resource::User(user) => catalog.user(&user.name).await?.map(Observed::User),
    };
    Ok(observed)
}

/// [`Catalog`] backed by ClickHouse `system.*` tables.
pub struct SystemCatalog<C: Connection + ?Sized> {
    conn: Arc<C>,
}

impl<C: Connection + ?Sized> SystemCatalog<C> {
    pub fn new(conn: Arc<C>) -> Self {
        Self { conn }
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        self.conn.traced().query(sql).await
    }

    async fn fetch_database(&self, name: &str) -> Result<Option<DatabaseInfo>, DbError> {
        let sql = format!(
            "SELECT name, engine, data_path, metadata_path, toString(uuid) AS uuid, comment \
             FROM system.databases WHERE name = '{name}'"
        );
        let rows = self.query(&sql).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(DatabaseInfo {
            name: row.str("name")?.to_string(),
            engine: row.str("engine")?.to_string(),
            data_path: row.str("data_path")?.to_string(),
            metadata_path: row.str("metadata_path")?.to_string(),
            uuid: row.str("uuid")?.to_string(),
            comment: row.str("comment")?.to_string(),
        }))
    }

    async fn fetch_dependents(&self, database: &str) -> Result<Vec<String>, DbError> {
        let sql =
            format!("SELECT name FROM system.tables WHERE database = '{database}' ORDER BY name");
        self.query(&sql)
            .await?
            .iter()
            .map(|row| row.str("name").map(str::to_string))
            .collect()
    }

    async fn fetch_table(
        &self,
        database: &str,
        name: &str,
        prior: Option<&TableSpec>,
    ) -> Result<Option<TableSpec>, DbError> {
        let sql = format!(
            "SELECT database, name, engine, engine_full, sorting_key, primary_key, \
             partition_key, comment FROM system.tables \
             WHERE database = '{database}' AND name = '{name}'"
        );
        let rows = self.query(&sql).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let engine = row.str("engine")?;
        if is_view_engine(engine) {
            return Ok(None);
        }

        let sql = format!(
            "SELECT name, type, default_kind, default_expression, comment, compression_codec \
             FROM system.columns WHERE database = '{database}' AND table = '{name}' \
             ORDER BY position"
        );
        let column_rows = self.query(&sql).await?;

        let sql = format!(
            "SELECT name, expr, type_full, granularity FROM system.data_skipping_indices \
             WHERE database = '{database}' AND table = '{name}'"
        );
        let index_rows = self.query(&sql).await?;

        assemble_table(row, &column_rows, &index_rows, prior).map(Some)
    }

    async fn fetch_view(
        &self,
        database: &str,
        name: &str,
        prior: Option<&ViewSpec>,
    ) -> Result<Option<ViewSpec>, DbError> {
        let sql = format!(
            "SELECT database, name, engine, as_select, comment FROM system.tables \
             WHERE database = '{database}' AND name = '{name}'"
        );
        let rows = self.query(&sql).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let engine = row.str("engine")?;
        if !is_view_engine(engine) {
            return Ok(None);
        }
        let materialized = engine == "MaterializedView";
        Ok(Some(ViewSpec {
            cluster: prior.and_then(|p| p.cluster.clone()),
            database: row.str("database")?.to_string(),
            name: row.str("name")?.to_string(),
            query: row.str("as_select")?.to_string(),
            materialized,
            to_table: if materialized {
                prior.and_then(|p| p.to_table.clone())
            } else {
                None
            },
            comment: row.str("comment")?.to_string(),
        }))
    }

    async fn fetch_role(&self, name: &str) -> Result<Option<ObservedRole>, DbError> {
        let sql = format!("SELECT name FROM system.roles WHERE name = '{name}'");
        if self.query(&sql).await?.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT role_name, access_type, database FROM system.grants \
             WHERE role_name = '{name}' ORDER BY access_type"
        );
        let grants = self
            .query(&sql)
            .await?
            .iter()
            .map(|row| {
                Ok(Grant::new(
                    row.str("role_name")?,
                    row.str("access_type")?,
                    row.opt_str("database")?,
                ))
            })
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(Some(ObservedRole {
            name: name.to_string(),
            grants,
        }))
    }

    async fn fetch_user(&self, name: &str) -> Result<Option<ObservedUser>, DbError> {
        let sql = format!("SELECT name, default_roles_list FROM system.users WHERE name = '{name}'");
        let rows = self.query(&sql).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(ObservedUser {
            name: row.str("name")?.to_string(),
            default_roles: row.strings("default_roles_list")?.into_iter().collect(),
        }))
    }
}

impl<C: Connection + ?Sized> Catalog for SystemCatalog<C> {
    fn database<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<DatabaseInfo>, DbError>> {
        Box::pin(self.fetch_database(name))
    }

    fn dependents<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Result<Vec<String>, DbError>> {
        Box::pin(self.fetch_dependents(database))
    }

    fn table<'a>(
        &'a self,
        database: &'a str,
        name: &'a str,
        prior: Option<&'a TableSpec>,
    ) -> BoxFuture<'a, Result<Option<TableSpec>, DbError>> {
        Box::pin(self.fetch_table(database, name, prior))
    }

    fn view<'a>(
        &'a self,
        database: &'a str,
        name: &'a str,
        prior: Option<&'a ViewSpec>,
    ) -> BoxFuture<'a, Result<Option<ViewSpec>, DbError>> {
        Box::pin(self.fetch_view(database, name, prior))
    }

    fn role<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<ObservedRole>, DbError>> {
        Box::pin(self.fetch_role(name))
    }

    fn user<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<ObservedUser>, DbError>> {
        Box::pin(self.fetch_user(name))
    }
}

fn is_view_engine(engine: &str) -> bool {
    engine == "View" || engine == "MaterializedView"
}

// ============================================================================
// Assembly
// ============================================================================

fn assemble_table(
    row: &Row,
    column_rows: &[Row],
    index_rows: &[Row],
    prior: Option<&TableSpec>,
) -> Result<TableSpec, DbError> {
    let engine = row.str("engine")?.to_string();
    let engine_full = row.str("engine_full")?;

    let columns = column_rows
        .iter()
        .map(assemble_column)
        .collect::<Result<Vec<_>, _>>()?;

    let indexes = index_rows
        .iter()
        .map(|r| {
            let index = IndexSpec {
                name: r.str("name")?.to_string(),
                expression: r.str("expr")?.to_string(),
                index_type: r.str("type_full")?.to_string(),
                granularity: Some(r.u64("granularity")?),
            };
            Ok(adopt_index(index, prior))
        })
        .collect::<Result<Vec<_>, DbError>>()?;

    Ok(TableSpec {
        cluster: prior.and_then(|p| p.cluster.clone()),
        database: row.str("database")?.to_string(),
        name: row.str("name")?.to_string(),
        engine_params: engine_params(&engine, engine_full),
        engine,
        columns,
        indexes,
        order_by: split_top_level(row.str("sorting_key")?),
        primary_key: primary_key(split_top_level(row.str("primary_key")?), prior),
        partition_by: partitions(row.str("partition_key")?, prior),
        settings: settings(engine_full, prior),
        ttl: ttl(engine_full, prior),
        comment: row.str("comment")?.to_string(),
    })
}

fn assemble_column(row: &Row) -> Result<ColumnSpec, DbError> {
    let raw_type = row.str("type")?;
    let (column_type, nullable) = match raw_type
        .strip_prefix("Nullable(")
        .and_then(|t| t.strip_suffix(')'))
    {
        Some(inner) => (inner.to_string(), true),
        None => (raw_type.to_string(), false),
    };

    let expression = row.str("default_expression")?;
    let default = DefaultKind::parse(row.str("default_kind")?)
        .filter(|_| !expression.is_empty())
        .map(|kind| ColumnDefault {
            kind,
            expression: expression.to_string(),
        });

    let codec = row.str("compression_codec")?;
    Ok(ColumnSpec {
        name: row.str("name")?.to_string(),
        column_type,
        nullable,
        comment: row.str("comment")?.to_string(),
        default,
        codec: (!codec.is_empty()).then(|| codec.to_string()),
    })
}

/// Split at commas that are not nested in parentheses, brackets or quotes.
pub(crate) fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '\'' => quoted = !quoted,
            '(' | '[' if !quoted => depth += 1,
            ')' | ']' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                let part = current.trim();
                if !part.is_empty() {
                    parts.push(part.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    let part = current.trim();
    if !part.is_empty() {
        parts.push(part.to_string());
    }
    parts
}

/// The catalog always reports a primary key; keep the prior's empty one when
/// it means the same thing.
fn primary_key(observed: Vec<String>, prior: Option<&TableSpec>) -> Vec<String> {
    match prior {
        Some(prior) if prior.effective_primary_key() == observed.as_slice() => {
            prior.primary_key.clone()
        }
        _ => observed,
    }
}

/// The parenthesized arguments directly following the engine name.
fn engine_params(engine: &str, engine_full: &str) -> Vec<String> {
    let Some(rest) = engine_full.trim_start().strip_prefix(engine) else {
        return Vec::new();
    };
    let Some(args) = rest.strip_prefix('(') else {
        return Vec::new();
    };
    let mut depth = 1usize;
    let mut quoted = false;
    for (i, c) in args.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth -= 1;
                if depth == 0 {
                    return split_top_level(&args[..i]);
                }
            }
            _ => {}
        }
    }
    Vec::new()
}

fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn render_partitions(partitions: &[PartitionSpec]) -> String {
    partitions
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn partitions(partition_key: &str, prior: Option<&TableSpec>) -> Vec<PartitionSpec> {
    if let Some(prior) = prior
        && squash(&render_partitions(&prior.partition_by)) == squash(partition_key)
    {
        return prior.partition_by.clone();
    }
    split_top_level(partition_key)
        .iter()
        .map(|entry| parse_partition(entry))
        .collect()
}

/// `toYYYYMM(ts)`, `id % 8` or a bare expression.
fn parse_partition(entry: &str) -> PartitionSpec {
    let (expr, modulo) = match entry.rsplit_once('%') {
        Some((lhs, rhs)) => match rhs.trim().parse::<u64>() {
            Ok(m) => (lhs.trim(), Some(m)),
            Err(_) => (entry, None),
        },
        None => (entry, None),
    };
    let mut spec = PartitionSpec::by(expr);
    for function in PartitionFunction::ALL {
        if let Some(arg) = expr
            .strip_prefix(function.as_str())
            .and_then(|r| r.strip_prefix('('))
            .and_then(|r| r.strip_suffix(')'))
        {
            spec = PartitionSpec::by(arg.trim()).function(function);
            break;
        }
    }
    spec.modulo = modulo;
    spec
}

/// The `SETTINGS` section of `engine_full`, quotes stripped.
fn engine_settings(engine_full: &str) -> BTreeMap<String, String> {
    let Some((_, section)) = engine_full.rsplit_once(" SETTINGS ") else {
        return BTreeMap::new();
    };
    split_top_level(section)
        .iter()
        .filter_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            Some((k.trim().to_string(), unquote(v.trim()).to_string()))
        })
        .collect()
}

fn unquote(v: &str) -> &str {
    v.strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(v)
}

/// An index the prior declared without a granularity keeps it unset while
/// the server reports the default.
fn adopt_index(index: IndexSpec, prior: Option<&TableSpec>) -> IndexSpec {
    let declared = prior.and_then(|p| p.indexes.iter().find(|i| i.name == index.name));
    match declared {
        Some(declared) if declared.granularity.is_none() && declared.same_as(&index) => IndexSpec {
            granularity: None,
            ..index
        },
        _ => index,
    }
}

fn settings(engine_full: &str, prior: Option<&TableSpec>) -> BTreeMap<String, String> {
    let observed = without_implicit(engine_settings(engine_full));
    if let Some(prior) = prior {
        let declared = without_implicit(
            prior
                .settings
                .iter()
                .map(|(k, v)| (k.clone(), unquote(v).to_string()))
                .collect(),
        );
        if declared == observed {
            return prior.settings.clone();
        }
    }
    observed
}

fn without_implicit(mut settings: BTreeMap<String, String>) -> BTreeMap<String, String> {
    for (key, value) in IMPLICIT_SETTINGS {
        if settings.get(*key).is_some_and(|v| v == value) {
            settings.remove(*key);
        }
    }
    settings
}

fn ttl(engine_full: &str, prior: Option<&TableSpec>) -> BTreeMap<String, String> {
    let Some((_, rest)) = engine_full.split_once(" TTL ") else {
        return BTreeMap::new();
    };
    match prior {
        Some(prior) if !prior.ttl.is_empty() => prior.ttl.clone(),
        _ => {
            let raw = rest
                .split_once(" SETTINGS ")
                .map_or(rest, |(ttl, _)| ttl)
                .trim();
            BTreeMap::from([(raw.to_string(), String::new())])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_nesting_and_quotes() {
        assert_eq!(
            split_top_level("a, toDate(b, 'x,y'), [1, 2]"),
            vec!["a", "toDate(b, 'x,y')", "[1, 2]"]
        );
        assert!(split_top_level("").is_empty());
        assert!(split_top_level("tuple()").len() == 1);
    }

    #[test]
    fn engine_params_from_engine_full() {
        assert_eq!(
            engine_params(
                "ReplacingMergeTree",
                "ReplacingMergeTree(eventTime) ORDER BY key SETTINGS index_granularity = 8192"
            ),
            vec!["eventTime"]
        );
        assert!(engine_params("MergeTree", "MergeTree ORDER BY key").is_empty());
        assert_eq!(
            engine_params("Distributed", "Distributed('main', 'd1', 't1', rand())"),
            vec!["'main'", "'d1'", "'t1'", "rand()"]
        );
    }

    #[test]
    fn partitions_prefer_prior_when_equal() {
        let mut prior = TableSpec::new("d1", "t1");
        prior.partition_by = vec![PartitionSpec::by("ts").function(PartitionFunction::ToYyyyMm)];
        assert_eq!(partitions("toYYYYMM(ts)", Some(&prior)), prior.partition_by);
    }

    #[test]
    fn partitions_parsed_without_prior() {
        assert_eq!(
            partitions("toYYYYMMDD(ts), id % 8, region", None),
            vec![
                PartitionSpec::by("ts").function(PartitionFunction::ToYyyyMmDd),
                PartitionSpec::by("id").modulo(8),
                PartitionSpec::by("region"),
            ]
        );
    }

    #[test]
    fn settings_drop_implicit_granularity() {
        let full = "MergeTree ORDER BY id SETTINGS index_granularity = 8192";
        assert!(settings(full, None).is_empty());

        let full = "MergeTree ORDER BY id SETTINGS index_granularity = 1024, ttl_only_drop_parts = 1";
        let observed = settings(full, None);
        assert_eq!(observed.get("index_granularity").map(String::as_str), Some("1024"));
        assert_eq!(observed.len(), 2);
    }

    #[test]
    fn settings_use_prior_when_they_agree() {
        let mut prior = TableSpec::new("d1", "t1");
        prior.settings.insert("index_granularity".into(), "8192".into());
        let full = "MergeTree ORDER BY id SETTINGS index_granularity = 8192";
        assert_eq!(settings(full, Some(&prior)), prior.settings);
    }

    #[test]
    fn settings_the_prior_lacks_are_reported() {
        let prior = TableSpec::new("d1", "t1");
        let full = "MergeTree ORDER BY id SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1";
        assert_eq!(
            settings(full, Some(&prior)),
            BTreeMap::from([("ttl_only_drop_parts".to_string(), "1".to_string())])
        );

        let mut prior = TableSpec::new("d1", "t1");
        prior.settings.insert("storage_policy".into(), "'hot'".into());
        let full = "MergeTree ORDER BY id SETTINGS storage_policy = 'hot', min_bytes_for_wide_part = 0";
        let observed = settings(full, Some(&prior));
        assert_eq!(observed.len(), 2);
        assert_eq!(observed.get("storage_policy").map(String::as_str), Some("hot"));
    }

    #[test]
    fn index_keeps_unset_granularity_from_prior() {
        let declared = IndexSpec {
            name: "idx".into(),
            expression: "key".into(),
            index_type: "minmax".into(),
            granularity: None,
        };
        let mut prior = TableSpec::new("d1", "t1");
        prior.indexes.push(declared.clone());

        let observed = IndexSpec {
            granularity: Some(1),
            ..declared.clone()
        };
        assert_eq!(adopt_index(observed.clone(), Some(&prior)), declared);
        assert_eq!(adopt_index(observed.clone(), None), observed);

        let coarser = IndexSpec {
            granularity: Some(4),
            ..declared
        };
        assert_eq!(adopt_index(coarser.clone(), Some(&prior)), coarser);
    }

    #[test]
    fn ttl_from_prior_or_raw() {
        let full = "MergeTree ORDER BY id TTL ts + toIntervalDay(1) SETTINGS index_granularity = 8192";
        assert_eq!(
            ttl(full, None),
            BTreeMap::from([("ts + toIntervalDay(1)".to_string(), String::new())])
        );

        let mut prior = TableSpec::new("d1", "t1");
        prior.ttl.insert("ts + INTERVAL 1 DAY".into(), "DELETE".into());
        assert_eq!(ttl(full, Some(&prior)), prior.ttl);
        assert!(ttl("MergeTree ORDER BY id", Some(&prior)).is_empty());
    }

    #[test]
    fn nullable_column_is_unwrapped() {
        let row = Row::new()
            .with("name", "ts")
            .with("type", "Nullable(DateTime)")
            .with("default_kind", "")
            .with("default_expression", "")
            .with("comment", "")
            .with("compression_codec", "");
        let col = assemble_column(&row).unwrap();
        assert_eq!(col.column_type, "DateTime");
        assert!(col.nullable);
        assert!(col.default.is_none());
        assert!(col.codec.is_none());
    }
}
