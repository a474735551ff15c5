//! Turning a diff into an ordered list of statements.
//!
//! Planning is pure: it looks at the prior declaration, the desired one and
//! what the catalog reported, and decides what to run. Nothing here talks to
//! the server.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chdecl_spec::{
    AccessType, DatabaseSpec, Identity, ObservedRole, ObservedUser, Resource, ResourceKind, RoleSpec,
    TableSpec, UserSpec, ViewSpec,
};
use chdecl_sql::{Stmt, Synthesizer, render, render_redacted};

use crate::catalog::{Observed, ObservedDatabase};
use crate::diff::{self, Change};
use crate::error::{Error, Result};
use crate::validate::Violations;

/// The step a statement belongs to. Carried into execution errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Reading the catalog, before or after the statements.
    Observe,
    Drop,
    Create,
    Grant,
    Revoke,
    Alter,
    Ttl,
    Comment,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Observe => "observe",
            Phase::Drop => "drop",
            Phase::Create => "create",
            Phase::Grant => "grant",
            Phase::Revoke => "revoke",
            Phase::Alter => "alter",
            Phase::Ttl => "ttl",
            Phase::Comment => "comment",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What reconciliation decided to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Destroy,
    Update,
    /// Destroy, then create.
    Replace,
    Noop,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Destroy => "destroy",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Noop => "noop",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStatement {
    pub phase: Phase,
    pub stmt: Stmt,
}

impl PlannedStatement {
    pub fn new(phase: Phase, stmt: impl Into<Stmt>) -> Self {
        Self {
            phase,
            stmt: stmt.into(),
        }
    }

    /// The statement as sent to the server.
    pub fn sql(&self) -> String {
        render(&self.stmt)
    }

    /// The statement with secrets masked, for logs and errors.
    pub fn redacted(&self) -> String {
        render_redacted(&self.stmt)
    }
}

/// The statements for one resource, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub identity: Identity,
    pub kind: ResourceKind,
    pub action: Action,
    pub statements: Vec<PlannedStatement>,
    /// Human-readable change summary.
    pub summary: String,
}

impl Plan {
    fn new(identity: Identity, kind: ResourceKind, action: Action) -> Self {
        Self {
            identity,
            kind,
            action,
            statements: Vec::new(),
            summary: String::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.action == Action::Noop
    }

    /// Rendered statements, secrets masked.
    pub fn redacted(&self) -> Vec<String> {
        self.statements.iter().map(PlannedStatement::redacted).collect()
    }

    fn push(&mut self, phase: Phase, stmt: impl Into<Stmt>) {
        self.statements.push(PlannedStatement::new(phase, stmt));
    }

    fn push_opt<S: Into<Stmt>>(&mut self, phase: Phase, stmt: Option<S>) {
        if let Some(stmt) = stmt {
            self.push(phase, stmt);
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.action, self.identity)?;
        for stmt in &self.statements {
            writeln!(f, "  [{}] {}", stmt.phase, stmt.redacted())?;
        }
        Ok(())
    }
}

/// Builds plans from synthesizer output.
pub struct Planner<'a> {
    synth: &'a Synthesizer,
}

impl<'a> Planner<'a> {
    pub fn new(synth: &'a Synthesizer) -> Self {
        Self { synth }
    }

    /// Plan one resource.
    ///
    /// `prior` is the last declared spec (absent on first apply), `desired`
    /// the new one (absent when the resource was removed from the
    /// declaration) and `observed` what the catalog reports under the
    /// prior identity.
    pub fn plan(
        &self,
        prior: Option<&Resource>,
        desired: Option<&Resource>,
        observed: Option<&Observed>,
    ) -> Result<Plan> {
        let Some(desired) = desired else {
            let Some(prior) = prior else {
                return Err(Error::Validation {
                    identity: Identity::new(None, "", ""),
                    violations: Violations::single(
                        "resource",
                        "neither a prior nor a desired declaration was given",
                    ),
                });
            };
            return self.destroy(prior, observed);
        };

        if let Some(prior) = prior
            && prior.kind() != desired.kind()
        {
            return Err(Error::Validation {
                identity: desired.identity(),
                violations: Violations::single(
                    "kind",
                    format!("cannot change from {} to {}", prior.kind(), desired.kind()),
                ),
            });
        }

        let Some(observed) = observed else {
            let mut plan = Plan::new(desired.identity(), desired.kind(), Action::Create);
            self.push_create(&mut plan, desired);
            plan.summary = "+ create\n".to_string();
            return Ok(plan);
        };

        match (desired, observed) {
            (Resource::Database(want), Observed::Database(have)) => {
                let reference = match prior {
                    Some(Resource::Database(p)) => p,
                    _ => want,
                };
                self.update_database(want, have, reference)
            }
            (Resource::Table(want), Observed::Table(have)) => {
                let have = adopt_table(have, prior, want);
                self.update_table(want, &have)
            }
            (Resource::View(want), Observed::View(have)) => {
                let have = adopt_view(have, prior, want);
                self.update_view(want, &have)
            }
            (Resource::Role(want), Observed::Role(have)) => self.update_role(want, have),
            (Resource::User(want), Observed::User(have)) => {
                let prior = match prior {
                    Some(Resource::User(p)) => Some(p),
                    _ => None,
                };
                self.update_user(want, have, prior)
            }
            (want, have) => Err(mismatch(want, have)),
        }
    }

    // ========================================================================
    // Create / destroy
    // ========================================================================

    fn push_create(&self, plan: &mut Plan, desired: &Resource) {
        match desired {
            Resource::Database(db) => plan.push(Phase::Create, self.synth.create_database(db)),
            Resource::Table(table) => {
                plan.push(Phase::Create, self.synth.create_table(table));
                plan.push_opt(Phase::Ttl, self.synth.modify_ttl(table));
            }
            Resource::View(view) => plan.push(Phase::Create, self.synth.create_view(view)),
            Resource::Role(role) => {
                plan.push(Phase::Create, self.synth.create_role(role));
                plan.push_opt(
                    Phase::Grant,
                    self.synth
                        .grant_privileges(&role.name, &role.database, &role.privileges),
                );
            }
            Resource::User(user) => plan.push(Phase::Create, self.synth.create_user(user)),
        }
    }

    fn destroy(&self, prior: &Resource, observed: Option<&Observed>) -> Result<Plan> {
        let identity = prior.identity();
        let mut plan = Plan::new(identity.clone(), prior.kind(), Action::Destroy);
        let Some(observed) = observed else {
            plan.action = Action::Noop;
            plan.summary = "already absent\n".to_string();
            return Ok(plan);
        };

        match (prior, observed) {
            (Resource::Database(db), Observed::Database(have)) => {
                ensure_no_dependents(&identity, have)?;
                plan.push(Phase::Drop, self.synth.drop_database(db));
            }
            (Resource::Table(table), Observed::Table(_)) => {
                plan.push(Phase::Drop, self.synth.drop_table(table));
            }
            (Resource::View(view), Observed::View(_)) => {
                plan.push(Phase::Drop, self.synth.drop_view(view));
            }
            (Resource::Role(_), Observed::Role(have)) => {
                plan.push(Phase::Drop, self.synth.drop_role(&have.name));
            }
            (Resource::User(_), Observed::User(have)) => {
                plan.push(Phase::Drop, self.synth.drop_user(&have.name));
            }
            (want, have) => return Err(mismatch(want, have)),
        }
        plan.summary = "- destroy\n".to_string();
        Ok(plan)
    }

    fn replace(&self, identity: Identity, desired: &Resource, drop: PlannedStatement) -> Plan {
        let mut plan = Plan::new(identity, desired.kind(), Action::Replace);
        plan.statements.push(drop);
        self.push_create(&mut plan, desired);
        plan
    }

    // ========================================================================
    // Updates, per kind
    // ========================================================================

    fn update_database(
        &self,
        want: &DatabaseSpec,
        have: &ObservedDatabase,
        reference: &DatabaseSpec,
    ) -> Result<Plan> {
        let identity = want.identity();
        let observed = have.to_spec(reference.cluster.as_deref());
        let changes = diff::diff_database(want, Some(&observed));
        if changes.is_empty() {
            return Ok(noop(identity, ResourceKind::Database));
        }

        ensure_no_dependents(&identity, have)?;
        let drop = PlannedStatement::new(Phase::Drop, self.synth.drop_database(&observed));
        let mut plan = self.replace(identity, &Resource::Database(want.clone()), drop);
        plan.summary = changes.to_string();
        Ok(plan)
    }

    fn update_table(&self, want: &TableSpec, have: &TableSpec) -> Result<Plan> {
        let identity = want.identity();
        let changes = diff::diff_table(want, Some(have));
        if changes.is_empty() {
            return Ok(noop(identity, ResourceKind::Table));
        }

        let mut plan = if changes.must_replace {
            let drop = PlannedStatement::new(Phase::Drop, self.synth.drop_table(have));
            self.replace(identity, &Resource::Table(want.clone()), drop)
        } else {
            let mut plan = Plan::new(identity, ResourceKind::Table, Action::Update);
            for change in &changes.to_alter {
                match change {
                    Change::Ttl { .. } => match self.synth.modify_ttl(want) {
                        Some(stmt) => plan.push(Phase::Ttl, stmt),
                        None => plan.push(Phase::Ttl, self.synth.remove_ttl(want)),
                    },
                    Change::Comment { .. } => {
                        plan.push(Phase::Comment, self.synth.modify_comment(want));
                    }
                    Change::ColumnComment { column, .. } => {
                        if let Some(col) = want.find_column(column) {
                            plan.push(Phase::Comment, self.synth.comment_column(want, col));
                        }
                    }
                    Change::Rename { .. } | Change::Password | Change::Replace { .. } => {}
                }
            }
            plan
        };
        plan.summary = changes.to_string();
        Ok(plan)
    }

    fn update_view(&self, want: &ViewSpec, have: &ViewSpec) -> Result<Plan> {
        let identity = want.identity();
        let changes = diff::diff_view(want, Some(have));
        if changes.is_empty() {
            return Ok(noop(identity, ResourceKind::View));
        }

        let mut plan = if changes.must_replace {
            let drop = PlannedStatement::new(Phase::Drop, self.synth.drop_view(have));
            self.replace(identity, &Resource::View(want.clone()), drop)
        } else {
            let mut plan = Plan::new(identity, ResourceKind::View, Action::Update);
            if changes
                .to_alter
                .iter()
                .any(|c| matches!(c, Change::Comment { .. }))
            {
                plan.push(Phase::Comment, self.synth.modify_view_comment(want));
            }
            plan
        };
        plan.summary = changes.to_string();
        Ok(plan)
    }

    /// Privileges are diffed on the declared scope only. Grants the role
    /// holds on any other scope are revoked where they are, whatever they
    /// are. A role whose grants all sit on one other database has moved and
    /// is recreated.
    fn update_role(&self, want: &RoleSpec, have: &ObservedRole) -> Result<Plan> {
        let identity = want.identity();
        let (privileges, elsewhere) = have.split_scope(&want.database);

        let moved = if privileges.is_empty() && !elsewhere.is_empty() {
            RoleSpec::from_grants(&have.name, &have.grants, Some(&want.database)).ok()
        } else {
            None
        };
        let observed = moved.unwrap_or_else(|| RoleSpec {
            name: have.name.clone(),
            database: want.database.clone(),
            privileges,
        });

        let changes = diff::diff_role(want, Some(&observed));
        if changes.must_replace {
            let drop = PlannedStatement::new(Phase::Drop, self.synth.drop_role(&have.name));
            let mut plan = self.replace(identity, &Resource::Role(want.clone()), drop);
            plan.summary = changes.to_string();
            return Ok(plan);
        }
        if changes.is_empty() && elsewhere.is_empty() {
            return Ok(noop(identity, ResourceKind::Role));
        }

        let mut plan = Plan::new(identity, ResourceKind::Role, Action::Update);
        plan.push_opt(
            Phase::Grant,
            self.synth
                .grant_privileges(&want.name, &want.database, &changes.to_grant),
        );
        plan.push_opt(
            Phase::Revoke,
            self.synth
                .revoke_privileges(&want.name, &want.database, &changes.to_revoke),
        );

        let mut by_scope: BTreeMap<&str, BTreeSet<&AccessType>> = BTreeMap::new();
        for grant in &elsewhere {
            by_scope
                .entry(grant.scope())
                .or_default()
                .insert(&grant.access_type);
        }
        let mut summary = changes.to_string();
        if changes.is_empty() {
            summary.clear();
        }
        for (scope, access) in by_scope {
            for a in &access {
                summary.push_str(&format!("- {a} ON {scope}.*\n"));
            }
            plan.push_opt(
                Phase::Revoke,
                self.synth
                    .revoke_privileges(&want.name, scope, access.iter().copied()),
            );
        }
        plan.summary = summary;
        Ok(plan)
    }

    fn update_user(
        &self,
        want: &UserSpec,
        have: &ObservedUser,
        prior: Option<&UserSpec>,
    ) -> Result<Plan> {
        let identity = want.identity();
        let changes = diff::diff_user(want, Some(have), prior);
        if changes.is_empty() {
            return Ok(noop(identity, ResourceKind::User));
        }

        let password_changed = changes
            .to_alter
            .iter()
            .any(|c| matches!(c, Change::Password));

        let mut plan = Plan::new(identity, ResourceKind::User, Action::Update);
        plan.push_opt(
            Phase::Grant,
            self.synth.grant_roles(&have.name, &changes.to_grant),
        );
        plan.push_opt(
            Phase::Revoke,
            self.synth.revoke_roles(&have.name, &changes.to_revoke),
        );
        plan.push(
            Phase::Alter,
            self.synth.alter_user(&have.name, want, password_changed),
        );
        plan.summary = changes.to_string();
        Ok(plan)
    }
}

fn noop(identity: Identity, kind: ResourceKind) -> Plan {
    let mut plan = Plan::new(identity, kind, Action::Noop);
    plan.summary = "No changes detected.\n".to_string();
    plan
}

fn ensure_no_dependents(identity: &Identity, have: &ObservedDatabase) -> Result<()> {
    if have.dependents.is_empty() {
        Ok(())
    } else {
        Err(Error::Conflict {
            identity: identity.clone(),
            dependents: have.dependents.clone(),
        })
    }
}

fn mismatch(want: &Resource, have: &Observed) -> Error {
    Error::Catalog {
        identity: want.identity(),
        message: format!("catalog returned a {} for a {}", observed_kind(have), want.kind()),
    }
}

fn observed_kind(observed: &Observed) -> ResourceKind {
    match observed {
        Observed::Database(_) => ResourceKind::Database,
        Observed::Table(_) => ResourceKind::Table,
        Observed::View(_) => ResourceKind::View,
        Observed::Role(_) => ResourceKind::Role,
        Observed::User(_) => ResourceKind::User,
    }
}

/// Fill what the catalog cannot report when there is no prior declaration
/// to take it from.
fn adopt_table(have: &TableSpec, prior: Option<&Resource>, want: &TableSpec) -> TableSpec {
    let mut have = have.clone();
    if prior.is_none() {
        have.cluster = want.cluster.clone();
    }
    have
}

fn adopt_view(have: &ViewSpec, prior: Option<&Resource>, want: &ViewSpec) -> ViewSpec {
    let mut have = have.clone();
    if prior.is_none() {
        have.cluster = want.cluster.clone();
        if have.materialized && have.to_table.is_none() {
            have.to_table = want.to_table.clone();
        }
    }
    have
}

#[cfg(test)]
mod tests {
    use chdecl_spec::{ColumnSpec, Grant};

    use super::*;

    fn make_table() -> TableSpec {
        TableSpec::new("d1", "t1")
            .engine("MergeTree")
            .column(ColumnSpec::new("key", "Int64"))
            .order_by(["key"])
    }

    fn plan(
        prior: Option<&Resource>,
        desired: Option<&Resource>,
        observed: Option<&Observed>,
    ) -> Result<Plan> {
        let synth = Synthesizer::default();
        Planner::new(&synth).plan(prior, desired, observed)
    }

    #[test]
    fn create_table_with_ttl_follow_up() {
        let mut table = make_table();
        table.ttl.insert("ts + INTERVAL 1 DAY".into(), String::new());
        let desired = Resource::Table(table);
        let plan = plan(None, Some(&desired), None).unwrap();

        assert_eq!(plan.action, Action::Create);
        let phases: Vec<Phase> = plan.statements.iter().map(|s| s.phase).collect();
        assert_eq!(phases, vec![Phase::Create, Phase::Ttl]);
        assert_eq!(
            plan.statements[1].sql(),
            "ALTER TABLE d1.t1 MODIFY TTL ts + INTERVAL 1 DAY"
        );
    }

    #[test]
    fn unchanged_table_is_noop() {
        let table = make_table();
        let desired = Resource::Table(table.clone());
        let observed = Observed::Table(table);
        let plan = plan(Some(&desired), Some(&desired), Some(&observed)).unwrap();
        assert!(plan.is_noop());
        assert!(plan.statements.is_empty());
    }

    #[test]
    fn engine_change_replaces_table() {
        let observed = Observed::Table(make_table());
        let desired = Resource::Table(make_table().engine("ReplacingMergeTree"));
        let plan = plan(None, Some(&desired), Some(&observed)).unwrap();

        assert_eq!(plan.action, Action::Replace);
        assert_eq!(plan.statements[0].sql(), "DROP TABLE d1.t1 SYNC");
        assert_eq!(plan.statements[1].phase, Phase::Create);
        assert!(plan.summary.contains("engine"));
    }

    #[test]
    fn comment_change_alters_in_place() {
        let observed = Observed::Table(make_table());
        let desired = Resource::Table(make_table().comment("events"));
        let plan = plan(None, Some(&desired), Some(&observed)).unwrap();

        assert_eq!(plan.action, Action::Update);
        assert_eq!(plan.redacted(), vec!["ALTER TABLE d1.t1 MODIFY COMMENT 'events'"]);
    }

    #[test]
    fn destroy_database_with_dependents_conflicts() {
        let prior = Resource::Database(DatabaseSpec::new("d1"));
        let observed = Observed::Database(ObservedDatabase {
            info: chdecl_spec::DatabaseInfo {
                name: "d1".into(),
                ..Default::default()
            },
            dependents: vec!["t1".into()],
        });
        let err = plan(Some(&prior), None, Some(&observed)).unwrap_err();
        assert!(matches!(&err, Error::Conflict { dependents, .. } if dependents == &["t1"]));
        assert!(err.to_string().contains("dependents: [t1]"));
    }

    #[test]
    fn destroy_of_absent_resource_is_noop() {
        let prior = Resource::Table(make_table());
        let plan = plan(Some(&prior), None, None).unwrap();
        assert!(plan.is_noop());
    }

    #[test]
    fn role_update_grants_then_revokes() {
        let desired = Resource::Role(RoleSpec::new("r1", "db1").privilege("SELECT").privilege("ALTER"));
        let observed = Observed::Role(ObservedRole {
            name: "r1".into(),
            grants: vec![
                Grant::new("r1", "SELECT", Some("db1")),
                Grant::new("r1", "INSERT", Some("db1")),
            ],
        });
        let plan = plan(Some(&desired), Some(&desired), Some(&observed)).unwrap();
        assert_eq!(
            plan.redacted(),
            vec!["GRANT ALTER ON db1.* TO r1", "REVOKE INSERT ON db1.* FROM r1"]
        );
    }

    #[test]
    fn observed_role_on_a_second_database_is_revoked_there() {
        let desired = Resource::Role(RoleSpec::new("r1", "db1").privilege("SELECT"));
        let observed = Observed::Role(ObservedRole {
            name: "r1".into(),
            grants: vec![
                Grant::new("r1", "SELECT", Some("db1")),
                Grant::new("r1", "SELECT", Some("db2")),
            ],
        });
        let plan = plan(None, Some(&desired), Some(&observed)).unwrap();
        assert_eq!(plan.action, Action::Update);
        assert_eq!(plan.redacted(), vec!["REVOKE SELECT ON db2.* FROM r1"]);
    }

    #[test]
    fn unrecognized_observed_grant_is_revoked() {
        let desired = Resource::Role(RoleSpec::new("r1", "db1").privilege("SELECT"));
        let observed = Observed::Role(ObservedRole {
            name: "r1".into(),
            grants: vec![
                Grant::new("r1", "SELECT", Some("db1")),
                Grant::new("r1", "SHOW DICTIONARIES", Some("db1")),
            ],
        });
        let plan = plan(Some(&desired), Some(&desired), Some(&observed)).unwrap();
        assert_eq!(
            plan.redacted(),
            vec!["REVOKE SHOW DICTIONARIES ON db1.* FROM r1"]
        );
    }

    #[test]
    fn global_grant_is_revoked_on_all_databases() {
        let desired = Resource::Role(RoleSpec::new("r1", "db1").privilege("SELECT"));
        let observed = Observed::Role(ObservedRole {
            name: "r1".into(),
            grants: vec![
                Grant::new("r1", "REMOTE", None),
                Grant::new("r1", "INSERT", Some("db1")),
                Grant::new("r1", "SELECT", Some("db1")),
            ],
        });
        let plan = plan(Some(&desired), Some(&desired), Some(&observed)).unwrap();
        assert_eq!(
            plan.redacted(),
            vec!["REVOKE INSERT ON db1.* FROM r1", "REVOKE REMOTE ON *.* FROM r1"]
        );
        assert!(plan.summary.contains("- REMOTE ON *.*"));
    }

    #[test]
    fn role_moved_to_another_database_is_recreated() {
        let desired = Resource::Role(RoleSpec::new("r1", "db2").privilege("SELECT"));
        let observed = Observed::Role(ObservedRole {
            name: "r1".into(),
            grants: vec![Grant::new("r1", "SELECT", Some("db1"))],
        });
        let plan = plan(None, Some(&desired), Some(&observed)).unwrap();
        assert_eq!(plan.action, Action::Replace);
        assert_eq!(plan.statements[0].sql(), "DROP ROLE r1");
    }

    #[test]
    fn kind_change_is_rejected() {
        let prior = Resource::Table(make_table());
        let desired = Resource::View(ViewSpec::new("d1", "t1", "SELECT 1"));
        let err = plan(Some(&prior), Some(&desired), None).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
