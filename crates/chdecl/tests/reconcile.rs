mod common;

use std::sync::Arc;

use chdecl::spec::{
    ColumnSpec, DatabaseInfo, DatabaseSpec, Grant, ObservedRole, ObservedUser, Resource, RoleSpec,
    TableSpec, UserSpec,
};
use chdecl::sql::SynthOptions;
use chdecl::{Action, Config, Error, Observed, ObservedDatabase, Phase, Reconciler};
use common::{FakeCatalog, RecordingConnection, init_tracing};
use tokio_util::sync::CancellationToken;

fn reconciler(
    conn: RecordingConnection,
    catalog: FakeCatalog,
) -> (Arc<RecordingConnection>, Reconciler<RecordingConnection, FakeCatalog>) {
    reconciler_with(conn, catalog, SynthOptions::default())
}

fn reconciler_with(
    conn: RecordingConnection,
    catalog: FakeCatalog,
    options: SynthOptions,
) -> (Arc<RecordingConnection>, Reconciler<RecordingConnection, FakeCatalog>) {
    init_tracing();
    let conn = Arc::new(conn);
    let reconciler = Reconciler::with_catalog(conn.clone(), catalog, options);
    (conn, reconciler)
}

fn make_events_table() -> TableSpec {
    let mut table = TableSpec::new("d1", "t1")
        .engine("ReplacingMergeTree")
        .column(ColumnSpec::new("key", "Int64"))
        .column(ColumnSpec::new("someCol", "String"))
        .column(ColumnSpec::new("eventTime", "DateTime"))
        .order_by(["key"]);
    table.engine_params = vec!["eventTime".to_string()];
    table.primary_key = vec!["key".to_string()];
    table
}

fn make_observed_role(name: &str, database: &str, privileges: &[&str]) -> Observed {
    Observed::Role(ObservedRole {
        name: name.to_string(),
        grants: privileges
            .iter()
            .map(|p| Grant::new(name, p, Some(database)))
            .collect(),
    })
}

#[tokio::test]
async fn creates_missing_table() {
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::empty());
    let desired = Resource::Table(make_events_table());

    let outcome = reconciler
        .reconcile(None, Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Create);
    assert_eq!(outcome.identity.to_string(), ":d1:t1");
    assert_eq!(
        conn.executed(),
        vec![
            "CREATE TABLE d1.t1 (key Int64, someCol String, eventTime DateTime) \
             ENGINE = ReplacingMergeTree(eventTime) ORDER BY (key) COMMENT ''"
        ]
    );
}

#[tokio::test]
async fn revokes_removed_privilege() {
    let observed = make_observed_role("r1", "db1", &["SELECT", "INSERT"]);
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::with(observed));
    let desired = Resource::Role(RoleSpec::new("r1", "db1").privilege("SELECT"));

    let outcome = reconciler
        .reconcile(Some(&desired), Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Update);
    assert_eq!(conn.executed(), vec!["REVOKE INSERT ON db1.* FROM r1"]);
}

#[tokio::test]
async fn grants_added_role_to_user() {
    let observed = Observed::User(ObservedUser {
        name: "u1".to_string(),
        default_roles: ["r1".to_string()].into(),
    });
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::with(observed));
    let prior = Resource::User(UserSpec::new("u1", "pw").role("r1"));
    let desired = Resource::User(UserSpec::new("u1", "pw").role("r1").role("r2"));

    reconciler
        .reconcile(Some(&prior), Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        conn.executed(),
        vec!["GRANT r2 TO u1", "ALTER USER u1 DEFAULT ROLE r1,r2"]
    );
}

#[tokio::test]
async fn password_change_is_restated_redacted_in_outcome() {
    let observed = Observed::User(ObservedUser {
        name: "u1".to_string(),
        default_roles: Default::default(),
    });
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::with(observed));
    let prior = Resource::User(UserSpec::new("u1", "old"));
    let desired = Resource::User(UserSpec::new("u1", "new"));

    let outcome = reconciler
        .reconcile(Some(&prior), Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        conn.executed(),
        vec!["ALTER USER u1 IDENTIFIED WITH sha256_password BY 'new' DEFAULT ROLE NONE"]
    );
    assert_eq!(
        outcome.executed,
        vec!["ALTER USER u1 IDENTIFIED WITH sha256_password BY '***' DEFAULT ROLE NONE"]
    );
}

#[tokio::test]
async fn refuses_to_drop_database_with_tables() {
    let observed = Observed::Database(ObservedDatabase {
        info: DatabaseInfo {
            name: "d1".to_string(),
            engine: "Atomic".to_string(),
            ..Default::default()
        },
        dependents: Vec::new(),
    });
    let catalog = FakeCatalog::with(observed).dependents(&["t1"]);
    let (conn, reconciler) = reconciler(RecordingConnection::new(), catalog);
    let prior = Resource::Database(DatabaseSpec::new("d1"));

    let err = reconciler
        .reconcile(Some(&prior), None, &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        Error::Conflict {
            identity,
            dependents,
        } => {
            assert_eq!(identity.to_string(), "::d1");
            assert_eq!(dependents, &vec!["t1".to_string()]);
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    assert!(err.to_string().contains("t1"));
    assert!(conn.executed().is_empty());
}

#[tokio::test]
async fn drops_empty_database() {
    let observed = Observed::Database(ObservedDatabase {
        info: DatabaseInfo {
            name: "d1".to_string(),
            ..Default::default()
        },
        dependents: Vec::new(),
    });
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::with(observed));
    let prior = Resource::Database(DatabaseSpec::new("d1"));

    let outcome = reconciler
        .reconcile(Some(&prior), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Destroy);
    assert!(outcome.observed.is_none());
    assert_eq!(conn.executed(), vec!["DROP DATABASE d1 SYNC"]);
}

#[tokio::test]
async fn database_comment_change_replaces() {
    let observed = Observed::Database(ObservedDatabase {
        info: DatabaseInfo {
            name: "d1".to_string(),
            comment: "old".to_string(),
            ..Default::default()
        },
        dependents: Vec::new(),
    });
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::with(observed));
    let mut desired = DatabaseSpec::new("d1");
    desired.comment = "new".to_string();
    let desired = Resource::Database(desired);

    let outcome = reconciler
        .reconcile(None, Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Replace);
    assert_eq!(
        conn.executed(),
        vec!["DROP DATABASE d1 SYNC", "CREATE DATABASE d1 COMMENT 'new'"]
    );
}

#[tokio::test]
async fn unchanged_resource_executes_nothing() {
    let table = make_events_table();
    let (conn, reconciler) = reconciler(
        RecordingConnection::new(),
        FakeCatalog::with(Observed::Table(table.clone())),
    );
    let desired = Resource::Table(table);

    let outcome = reconciler
        .reconcile(Some(&desired), Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Noop);
    assert!(outcome.executed.is_empty());
    assert!(conn.executed().is_empty());
    assert!(matches!(outcome.observed, Some(Observed::Table(_))));
}

#[tokio::test]
async fn invalid_declaration_executes_nothing() {
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::empty());
    let desired = Resource::Role(RoleSpec::new("r1", "db1").privilege("NOT_ALLOWED_PRIVILEGE"));

    let err = reconciler
        .reconcile(None, Some(&desired), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::Validation { violations, .. } => {
            assert!(violations.mentions("NOT_ALLOWED_PRIVILEGE"));
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert!(conn.executed().is_empty());
}

#[tokio::test]
async fn first_failure_stops_the_sequence() {
    let observed = make_observed_role("r1", "db1", &["SELECT", "INSERT"]);
    let conn = RecordingConnection::new().fail_on("GRANT");
    let (conn, reconciler) = reconciler(conn, FakeCatalog::with(observed));
    let desired = Resource::Role(RoleSpec::new("r1", "db1").privilege("SELECT").privilege("ALTER"));

    let err = reconciler
        .reconcile(Some(&desired), Some(&desired), &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        Error::Execution {
            phase, statement, ..
        } => {
            assert_eq!(*phase, Phase::Grant);
            assert_eq!(statement, "GRANT ALTER ON db1.* TO r1");
        }
        other => panic!("expected an execution error, got {other:?}"),
    }
    assert!(err.to_string().contains("r1"));
    assert_eq!(conn.executed(), vec!["GRANT ALTER ON db1.* TO r1"]);
}

#[tokio::test]
async fn cancelled_before_start_executes_nothing() {
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::empty());
    let desired = Resource::Table(make_events_table());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = reconciler
        .reconcile(None, Some(&desired), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Cancelled {
            phase: Phase::Observe,
            ..
        }
    ));
    assert!(conn.executed().is_empty());
}

#[tokio::test]
async fn cancelled_token_fails_an_up_to_date_resource() {
    let table = make_events_table();
    let (conn, reconciler) = reconciler(
        RecordingConnection::new(),
        FakeCatalog::with(Observed::Table(table.clone())),
    );
    let desired = Resource::Table(table);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = reconciler
        .reconcile(Some(&desired), Some(&desired), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled { phase: Phase::Observe, .. }));
    assert!(conn.executed().is_empty());
}

#[tokio::test]
async fn cancellation_aborts_a_catalog_read() {
    init_tracing();
    let cancel = CancellationToken::new();
    let conn = Arc::new(
        RecordingConnection::new().cancel_and_hang_on("FROM system.tables", cancel.clone()),
    );
    let reconciler = Reconciler::new(conn.clone(), SynthOptions::default());
    let desired = Resource::Table(make_events_table());

    let err = reconciler
        .reconcile(None, Some(&desired), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled { phase: Phase::Observe, .. }));
    assert_eq!(conn.queries().len(), 1);
    assert!(conn.executed().is_empty());
}

#[tokio::test]
async fn cancellation_aborts_in_flight_statement() {
    let cancel = CancellationToken::new();
    let mut table = make_events_table();
    table.ttl.insert("eventTime + INTERVAL 1 DAY".to_string(), String::new());
    let conn = RecordingConnection::new().cancel_and_hang_on("CREATE TABLE", cancel.clone());
    let (conn, reconciler) = reconciler(conn, FakeCatalog::empty());
    let desired = Resource::Table(table);

    let err = reconciler
        .reconcile(None, Some(&desired), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled { phase: Phase::Create, .. }));
    // The TTL follow-up never ran.
    assert_eq!(conn.executed().len(), 1);
}

#[tokio::test]
async fn default_cluster_applies_to_statements() {
    let options = SynthOptions {
        default_cluster: Some("main".to_string()),
        ..Default::default()
    };
    let (conn, reconciler) =
        reconciler_with(RecordingConnection::new(), FakeCatalog::empty(), options);
    let desired = Resource::Database(DatabaseSpec::new("d1"));

    let outcome = reconciler
        .reconcile(None, Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.identity.to_string(), "::d1");
    assert_eq!(
        conn.executed(),
        vec!["CREATE DATABASE d1 ON CLUSTER main COMMENT ''"]
    );
}

#[tokio::test]
async fn creates_role_with_grants() {
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::empty());
    let desired = Resource::Role(
        RoleSpec::new("reader", "db1")
            .privilege("SELECT")
            .privilege("SHOW TABLES"),
    );

    reconciler
        .reconcile(None, Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        conn.executed(),
        vec!["CREATE ROLE reader", "GRANT SELECT,SHOW TABLES ON db1.* TO reader"]
    );
}

#[tokio::test]
async fn role_database_change_replaces() {
    let observed = make_observed_role("r1", "db1", &["SELECT"]);
    let (conn, reconciler) = reconciler(RecordingConnection::new(), FakeCatalog::with(observed));
    let prior = Resource::Role(RoleSpec::new("r1", "db1").privilege("SELECT"));
    let desired = Resource::Role(RoleSpec::new("r1", "db2").privilege("SELECT"));

    let outcome = reconciler
        .reconcile(Some(&prior), Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.action, Action::Replace);
    assert_eq!(
        conn.executed(),
        vec![
            "DROP ROLE r1",
            "CREATE ROLE r1",
            "GRANT SELECT ON db2.* TO r1"
        ]
    );
}

#[tokio::test]
async fn configured_privileges_are_accepted() {
    init_tracing();
    let config = Config {
        extra_privileges: vec!["SHOW DICTIONARIES".to_string()],
        ..Default::default()
    };
    let conn = Arc::new(RecordingConnection::new());
    let reconciler = Reconciler::from_config(conn.clone(), &config);
    let desired = Resource::Role(RoleSpec::new("r1", "db1").privilege("SHOW DICTIONARIES"));

    reconciler
        .reconcile(None, Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        conn.executed(),
        vec!["CREATE ROLE r1", "GRANT SHOW DICTIONARIES ON db1.* TO r1"]
    );
}

#[tokio::test]
async fn discovered_config_sets_default_cluster() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join(".config")).unwrap();
    std::fs::write(root.path().join(".config/chdecl.styx"), "default_cluster main\n").unwrap();

    let conn = Arc::new(RecordingConnection::new());
    let reconciler = Reconciler::discover(conn.clone(), root.path()).unwrap();
    let desired = Resource::Database(DatabaseSpec::new("d1"));

    reconciler
        .reconcile(None, Some(&desired), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        conn.executed(),
        vec!["CREATE DATABASE d1 ON CLUSTER main COMMENT ''"]
    );
}
