//! Desired vs. observed comparison.
//!
//! Every differ takes the desired specification and the observed one (or
//! `None` when the resource does not exist) and returns a [`ChangeSet`].
//! Grant and revoke sets are plain set differences, so they are disjoint and
//! applying both to the observed set yields the desired set.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chdecl_spec::{
    AccessType, ColumnSpec, DatabaseSpec, ObservedUser, RoleSpec, TableSpec, UserSpec, ViewSpec,
};
use chdecl_sql::codec_clause;

/// The result of diffing one resource.
///
/// `T` is the element type of the grant/revoke sets: privileges for roles,
/// role names for users. Other kinds leave both sets empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<T: Ord = String> {
    pub to_grant: BTreeSet<T>,
    pub to_revoke: BTreeSet<T>,
    pub to_alter: Vec<Change>,
    /// Some attribute cannot be altered in place; drop and recreate.
    pub must_replace: bool,
    /// Nothing was observed; everything must be created.
    pub full_create: bool,
}

impl<T: Ord> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            to_grant: BTreeSet::new(),
            to_revoke: BTreeSet::new(),
            to_alter: Vec::new(),
            must_replace: false,
            full_create: false,
        }
    }
}

impl<T: Ord> ChangeSet<T> {
    /// A change set for a resource that does not exist yet.
    pub fn full_create(to_grant: BTreeSet<T>) -> Self {
        Self {
            to_grant,
            full_create: true,
            ..Default::default()
        }
    }

    /// True if nothing needs to happen.
    pub fn is_empty(&self) -> bool {
        !self.full_create
            && !self.must_replace
            && self.to_grant.is_empty()
            && self.to_revoke.is_empty()
            && self.to_alter.is_empty()
    }

    fn push(&mut self, change: Change) {
        if change.forces_replace() {
            self.must_replace = true;
        }
        self.to_alter.push(change);
    }
}

impl<T: Ord + fmt::Display> fmt::Display for ChangeSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No changes detected.");
        }
        if self.full_create {
            writeln!(f, "+ create")?;
        }
        for item in &self.to_grant {
            writeln!(f, "+ {item}")?;
        }
        for item in &self.to_revoke {
            writeln!(f, "- {item}")?;
        }
        for change in &self.to_alter {
            writeln!(f, "{change}")?;
        }
        Ok(())
    }
}

/// One attribute-level change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// The object comment changed.
    Comment { from: String, to: String },
    /// The TTL rules changed.
    Ttl {
        from: BTreeMap<String, String>,
        to: BTreeMap<String, String>,
    },
    /// Only a column's comment changed.
    ColumnComment {
        column: String,
        from: String,
        to: String,
    },
    /// A user is renamed.
    Rename { from: String, to: String },
    /// A user's password changed.
    Password,
    /// An attribute that can only change by recreating the object.
    Replace {
        field: &'static str,
        from: String,
        to: String,
    },
}

impl Change {
    pub fn forces_replace(&self) -> bool {
        matches!(self, Change::Replace { .. })
    }

    fn replace(field: &'static str, from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Change::Replace {
            field,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Comment { from, to } => write!(f, "~ comment: '{from}' -> '{to}'"),
            Change::Ttl { from, to } => {
                write!(f, "~ ttl: {} -> {}", TtlList(from), TtlList(to))
            }
            Change::ColumnComment { column, from, to } => {
                write!(f, "~ {column} comment: '{from}' -> '{to}'")
            }
            Change::Rename { from, to } => write!(f, "~ rename {from} -> {to}"),
            Change::Password => write!(f, "~ password"),
            Change::Replace { field, from, to } => {
                write!(f, "! {field}: {from} -> {to} (replace)")
            }
        }
    }
}

struct TtlList<'a>(&'a BTreeMap<String, String>);

impl fmt::Display for TtlList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(none)");
        }
        for (i, (expr, action)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{expr}")?;
            if !action.is_empty() {
                write!(f, " {action}")?;
            }
        }
        Ok(())
    }
}

/// Comma-joined list for change descriptions.
struct List<'a, T>(&'a [T]);

impl<T: fmt::Display> fmt::Display for List<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}")?;
        }
        write!(f, ")")
    }
}

fn set_difference<T: Ord + Clone>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> BTreeSet<T> {
    a.difference(b).cloned().collect()
}

fn cluster_str(cluster: &Option<String>) -> &str {
    cluster.as_deref().unwrap_or_default()
}

// ============================================================================
// Roles and users
// ============================================================================

/// Diff a role's privileges.
///
/// A name or database change recreates the role; the grant set is then the
/// whole desired set.
pub fn diff_role(desired: &RoleSpec, observed: Option<&RoleSpec>) -> ChangeSet<AccessType> {
    let Some(observed) = observed else {
        return ChangeSet::full_create(desired.privileges.clone());
    };

    let mut changes = ChangeSet::default();
    if desired.name != observed.name {
        changes.push(Change::replace("name", &observed.name, &desired.name));
    }
    if desired.database != observed.database {
        changes.push(Change::replace(
            "database",
            &observed.database,
            &desired.database,
        ));
    }

    if changes.must_replace {
        changes.to_grant = desired.privileges.clone();
    } else {
        changes.to_grant = set_difference(&desired.privileges, &observed.privileges);
        changes.to_revoke = set_difference(&observed.privileges, &desired.privileges);
    }
    changes
}

/// Diff a user's role assignment.
///
/// Passwords are never read back, so a password change is detected against
/// `prior`, the previously declared spec. Without one the password is
/// always restated.
pub fn diff_user(
    desired: &UserSpec,
    observed: Option<&ObservedUser>,
    prior: Option<&UserSpec>,
) -> ChangeSet<String> {
    let Some(observed) = observed else {
        return ChangeSet::full_create(desired.roles.clone());
    };

    let mut changes = ChangeSet {
        to_grant: set_difference(&desired.roles, &observed.default_roles),
        to_revoke: set_difference(&observed.default_roles, &desired.roles),
        ..Default::default()
    };
    if desired.name != observed.name {
        changes.push(Change::Rename {
            from: observed.name.clone(),
            to: desired.name.clone(),
        });
    }
    if prior.is_none_or(|p| p.password != desired.password) {
        changes.push(Change::Password);
    }
    changes
}

// ============================================================================
// Databases
// ============================================================================

pub fn diff_database(desired: &DatabaseSpec, observed: Option<&DatabaseSpec>) -> ChangeSet {
    let Some(observed) = observed else {
        return ChangeSet::full_create(BTreeSet::new());
    };

    let mut changes = ChangeSet::default();
    if desired.name != observed.name {
        changes.push(Change::replace("name", &observed.name, &desired.name));
    }
    if cluster_str(&desired.cluster) != cluster_str(&observed.cluster) {
        changes.push(Change::replace(
            "cluster",
            cluster_str(&observed.cluster),
            cluster_str(&desired.cluster),
        ));
    }
    if desired.comment != observed.comment {
        changes.push(Change::replace(
            "comment",
            &observed.comment,
            &desired.comment,
        ));
    }
    changes
}

// ============================================================================
// Tables
// ============================================================================

fn same_column(desired: &ColumnSpec, observed: &ColumnSpec) -> bool {
    let codec = |c: &ColumnSpec| c.codec.as_deref().and_then(codec_clause);
    let default = |c: &ColumnSpec| {
        c.default
            .as_ref()
            .filter(|d| !d.expression.trim().is_empty())
            .map(|d| (d.kind, d.expression.trim().to_string()))
    };
    desired.name == observed.name
        && desired.column_type.trim() == observed.column_type.trim()
        && desired.nullable == observed.nullable
        && default(desired) == default(observed)
        && codec(desired) == codec(observed)
}

fn describe_columns(columns: &[ColumnSpec]) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.full_type()))
        .collect();
    List(&cols).to_string()
}

pub fn diff_table(desired: &TableSpec, observed: Option<&TableSpec>) -> ChangeSet {
    let Some(observed) = observed else {
        return ChangeSet::full_create(BTreeSet::new());
    };

    let mut changes = ChangeSet::default();

    if cluster_str(&desired.cluster) != cluster_str(&observed.cluster) {
        changes.push(Change::replace(
            "cluster",
            cluster_str(&observed.cluster),
            cluster_str(&desired.cluster),
        ));
    }
    if desired.database != observed.database {
        changes.push(Change::replace(
            "database",
            &observed.database,
            &desired.database,
        ));
    }
    if desired.name != observed.name {
        changes.push(Change::replace("name", &observed.name, &desired.name));
    }
    if desired.engine != observed.engine {
        changes.push(Change::replace("engine", &observed.engine, &desired.engine));
    }
    if desired.engine_params != observed.engine_params {
        changes.push(Change::replace(
            "engine_params",
            List(&observed.engine_params),
            List(&desired.engine_params),
        ));
    }

    let columns_match = desired.columns.len() == observed.columns.len()
        && desired
            .columns
            .iter()
            .zip(&observed.columns)
            .all(|(d, o)| same_column(d, o));
    if columns_match {
        for (d, o) in desired.columns.iter().zip(&observed.columns) {
            if d.comment != o.comment {
                changes.push(Change::ColumnComment {
                    column: d.name.clone(),
                    from: o.comment.clone(),
                    to: d.comment.clone(),
                });
            }
        }
    } else {
        changes.push(Change::replace(
            "columns",
            describe_columns(&observed.columns),
            describe_columns(&desired.columns),
        ));
    }

    if desired.order_by != observed.order_by {
        changes.push(Change::replace(
            "order_by",
            List(&observed.order_by),
            List(&desired.order_by),
        ));
    }
    if desired.effective_primary_key() != observed.effective_primary_key() {
        changes.push(Change::replace(
            "primary_key",
            List(observed.effective_primary_key()),
            List(desired.effective_primary_key()),
        ));
    }
    if desired.partition_by != observed.partition_by {
        changes.push(Change::replace(
            "partition_by",
            List(&observed.partition_by),
            List(&desired.partition_by),
        ));
    }
    if desired.settings != observed.settings {
        let render = |m: &BTreeMap<String, String>| {
            let items: Vec<String> = m.iter().map(|(k, v)| format!("{k} = {v}")).collect();
            List(&items).to_string()
        };
        changes.push(Change::replace(
            "settings",
            render(&observed.settings),
            render(&desired.settings),
        ));
    }
    let indexes_match = desired.indexes.len() == observed.indexes.len()
        && desired
            .indexes
            .iter()
            .zip(&observed.indexes)
            .all(|(d, o)| d.same_as(o));
    if !indexes_match {
        let names = |t: &TableSpec| {
            let names: Vec<&str> = t.indexes.iter().map(|i| i.name.as_str()).collect();
            List(&names).to_string()
        };
        changes.push(Change::replace("indexes", names(observed), names(desired)));
    }

    if desired.comment != observed.comment {
        changes.push(Change::Comment {
            from: observed.comment.clone(),
            to: desired.comment.clone(),
        });
    }
    if desired.ttl != observed.ttl {
        changes.push(Change::Ttl {
            from: observed.ttl.clone(),
            to: desired.ttl.clone(),
        });
    }

    changes
}

// ============================================================================
// Views
// ============================================================================

/// Collapse runs of whitespace so formatting-only edits are not changes.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn diff_view(desired: &ViewSpec, observed: Option<&ViewSpec>) -> ChangeSet {
    let Some(observed) = observed else {
        return ChangeSet::full_create(BTreeSet::new());
    };

    let mut changes = ChangeSet::default();
    if cluster_str(&desired.cluster) != cluster_str(&observed.cluster) {
        changes.push(Change::replace(
            "cluster",
            cluster_str(&observed.cluster),
            cluster_str(&desired.cluster),
        ));
    }
    if desired.database != observed.database {
        changes.push(Change::replace(
            "database",
            &observed.database,
            &desired.database,
        ));
    }
    if desired.name != observed.name {
        changes.push(Change::replace("name", &observed.name, &desired.name));
    }
    if desired.materialized != observed.materialized {
        changes.push(Change::replace(
            "materialized",
            observed.materialized,
            desired.materialized,
        ));
    }
    let (want, have) = (desired.qualified_to_table(), observed.qualified_to_table());
    if desired.materialized && want != have {
        changes.push(Change::replace(
            "to_table",
            have.unwrap_or_default(),
            want.unwrap_or_default(),
        ));
    }
    let (want, have) = (normalize_query(&desired.query), normalize_query(&observed.query));
    if want != have {
        changes.push(Change::replace("query", have, want));
    }
    if desired.comment != observed.comment {
        changes.push(Change::Comment {
            from: observed.comment.clone(),
            to: desired.comment.clone(),
        });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chdecl_spec::{DefaultKind, IndexSpec, PartitionFunction, PartitionSpec};

    fn make_role(database: &str, privileges: &[&str]) -> RoleSpec {
        RoleSpec::new("r1", database).privileges(privileges.iter().copied())
    }

    fn access(names: &[&str]) -> BTreeSet<AccessType> {
        names.iter().map(|n| AccessType::new(n.to_string())).collect()
    }

    fn make_table() -> TableSpec {
        TableSpec {
            database: "d1".into(),
            name: "t1".into(),
            engine: "ReplacingMergeTree".into(),
            engine_params: vec!["eventTime".into()],
            order_by: vec!["key".into()],
            primary_key: vec!["key".into()],
            columns: vec![
                ColumnSpec::new("key", "Int64"),
                ColumnSpec::new("someCol", "String"),
                ColumnSpec::new("eventTime", "DateTime"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn role_revokes_removed_privilege() {
        let observed = make_role("db1", &["SELECT", "INSERT"]);
        let desired = make_role("db1", &["SELECT"]);
        let changes = diff_role(&desired, Some(&observed));
        assert!(changes.to_grant.is_empty());
        assert_eq!(changes.to_revoke, access(&["INSERT"]));
        assert!(!changes.must_replace);
    }

    #[test]
    fn role_diff_against_itself_is_empty() {
        let role = make_role("db1", &["SELECT", "ALTER UPDATE"]);
        assert!(diff_role(&role, Some(&role)).is_empty());
    }

    #[test]
    fn role_full_create() {
        let desired = make_role("db1", &["SELECT", "INSERT"]);
        let changes = diff_role(&desired, None);
        assert!(changes.full_create);
        assert_eq!(changes.to_grant, desired.privileges);
        assert!(changes.to_revoke.is_empty());
    }

    #[test]
    fn role_database_change_replaces() {
        let observed = make_role("db1", &["SELECT"]);
        let desired = make_role("db2", &["SELECT"]);
        let changes = diff_role(&desired, Some(&observed));
        assert!(changes.must_replace);
        assert_eq!(changes.to_grant, desired.privileges);
        assert!(changes.to_revoke.is_empty());
    }

    #[test]
    fn user_grants_missing_role() {
        let desired = UserSpec::new("u1", "pw").role("r1").role("r2");
        let observed = ObservedUser {
            name: "u1".into(),
            default_roles: ["r1".to_string()].into(),
        };
        let changes = diff_user(&desired, Some(&observed), Some(&desired));
        assert_eq!(changes.to_grant, ["r2".to_string()].into());
        assert!(changes.to_revoke.is_empty());
        assert!(changes.to_alter.is_empty());
    }

    #[test]
    fn user_rename_and_password_are_in_place() {
        let prior = UserSpec::new("u1", "old").role("r1");
        let desired = UserSpec::new("u2", "new").role("r1");
        let observed = ObservedUser {
            name: "u1".into(),
            default_roles: ["r1".to_string()].into(),
        };
        let changes = diff_user(&desired, Some(&observed), Some(&prior));
        assert!(!changes.must_replace);
        assert_eq!(
            changes.to_alter,
            vec![
                Change::Rename {
                    from: "u1".into(),
                    to: "u2".into()
                },
                Change::Password
            ]
        );
    }

    #[test]
    fn table_diff_against_itself_is_empty() {
        let table = make_table();
        assert!(diff_table(&table, Some(&table)).is_empty());
    }

    #[test]
    fn table_comment_and_ttl_are_in_place() {
        let observed = make_table();
        let mut desired = make_table().comment("events");
        desired
            .ttl
            .insert("eventTime + INTERVAL 1 DAY".into(), "DELETE".into());
        desired.columns[1].comment = "payload".into();

        let changes = diff_table(&desired, Some(&observed));
        assert!(!changes.must_replace);
        assert_eq!(changes.to_alter.len(), 3);
        assert!(matches!(
            &changes.to_alter[0],
            Change::ColumnComment { column, .. } if column == "someCol"
        ));
        assert!(matches!(&changes.to_alter[1], Change::Comment { to, .. } if to == "events"));
        assert!(matches!(&changes.to_alter[2], Change::Ttl { .. }));
    }

    #[test]
    fn table_structure_changes_replace() {
        let observed = make_table();

        let engine = make_table().engine("MergeTree");
        assert!(diff_table(&engine, Some(&observed)).must_replace);

        let column = make_table().column(ColumnSpec::new("extra", "UInt8"));
        assert!(diff_table(&column, Some(&observed)).must_replace);

        let mut nullable = make_table();
        nullable.columns[1].nullable = true;
        assert!(diff_table(&nullable, Some(&observed)).must_replace);

        let mut partition = make_table();
        partition.partition_by =
            vec![PartitionSpec::by("eventTime").function(PartitionFunction::ToYyyyMm)];
        assert!(diff_table(&partition, Some(&observed)).must_replace);

        let mut settings = make_table();
        settings
            .settings
            .insert("index_granularity".into(), "1024".into());
        assert!(diff_table(&settings, Some(&observed)).must_replace);
    }

    #[test]
    fn primary_key_defaults_to_order_by() {
        let observed = make_table();
        let mut desired = make_table();
        desired.primary_key.clear();
        assert!(diff_table(&desired, Some(&observed)).is_empty());
    }

    #[test]
    fn codec_spelling_is_normalized() {
        let mut observed = make_table();
        observed.columns[1].codec = Some("CODEC(ZSTD(1))".into());
        let mut desired = make_table();
        desired.columns[1].codec = Some("ZSTD(1)".into());
        assert!(diff_table(&desired, Some(&observed)).is_empty());

        desired.columns[1] = desired.columns[1]
            .clone()
            .default_expr(DefaultKind::Default, "'x'");
        assert!(diff_table(&desired, Some(&observed)).must_replace);
    }

    #[test]
    fn unset_index_granularity_matches_server_default() {
        let index = IndexSpec {
            name: "idx_key".into(),
            expression: "key".into(),
            index_type: "minmax".into(),
            granularity: None,
        };
        let mut desired = make_table();
        desired.indexes.push(index.clone());
        let mut observed = make_table();
        observed.indexes.push(IndexSpec {
            granularity: Some(1),
            ..index.clone()
        });
        assert!(diff_table(&desired, Some(&observed)).is_empty());

        observed.indexes[0].granularity = Some(3);
        assert!(diff_table(&desired, Some(&observed)).must_replace);
    }

    #[test]
    fn view_query_whitespace_is_ignored() {
        let observed = ViewSpec::new("d1", "v", "SELECT a\n  FROM t");
        let desired = ViewSpec::new("d1", "v", "SELECT a FROM t");
        assert!(diff_view(&desired, Some(&observed)).is_empty());

        let changed = ViewSpec::new("d1", "v", "SELECT b FROM t");
        assert!(diff_view(&changed, Some(&observed)).must_replace);

        let commented = desired.clone();
        let commented = ViewSpec {
            comment: "docs".into(),
            ..commented
        };
        let changes = diff_view(&commented, Some(&observed));
        assert!(!changes.must_replace);
        assert_eq!(changes.to_alter.len(), 1);
    }

    #[test]
    fn database_comment_forces_replace() {
        let observed = DatabaseSpec::new("d1");
        let mut desired = DatabaseSpec::new("d1");
        desired.comment = "analytics".into();
        assert!(diff_database(&desired, Some(&observed)).must_replace);
        assert!(diff_database(&observed, Some(&observed)).is_empty());
    }

    #[test]
    fn change_set_display() {
        let observed = make_role("db1", &["SELECT", "INSERT"]);
        let desired = make_role("db1", &["SELECT", "ALTER"]);
        let changes = diff_role(&desired, Some(&observed));
        assert_eq!(changes.to_string(), "+ ALTER\n- INSERT\n");

        let changes = diff_table(&make_table().engine("Log"), Some(&make_table()));
        insta::assert_snapshot!(
            changes.to_string().trim_end(),
            @"! engine: ReplacingMergeTree -> Log (replace)"
        );
    }
}
