use std::fs;
use std::path::Path;

use sql_migration_tests::test_api::*;

fn write_migration(dir: &Path, file_name: &str, sql: &str) {
    fs::write(dir.join(file_name), sql).unwrap();
}

#[test]
fn migrations_apply_once_and_only_once() {
    let api = TestApi::new();
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "0001-init.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");
    write_migration(dir.path(), "0002-posts.sql", "CREATE TABLE posts (id INTEGER PRIMARY KEY);");

    let files = list_migration_files(dir.path()).unwrap();
    let host = RecordingHost::default();
    let summary = run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &host).unwrap();

    assert_eq!(summary.applied.len(), 2);
    assert!(summary.skipped.is_empty() && summary.tampered.is_empty());
    pretty_eq!(host.plain_messages(), vec!["✓ 1: init", "✓ 2: posts"]);

    // Second run: everything is already tracked; nothing executes.
    let host = RecordingHost::default();
    let summary = run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &host).unwrap();

    assert!(summary.applied.is_empty());
    assert_eq!(summary.skipped.len(), 2);
    pretty_eq!(host.plain_messages(), vec!["✓ 1: init", "✓ 2: posts"]);
}

#[test]
fn bookkeeping_rows_carry_hex_sha256_hashes() {
    let api = TestApi::new();
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "0001-init.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");

    let files = list_migration_files(dir.path()).unwrap();
    run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &RecordingHost::default()).unwrap();

    let (name, version, hash): (String, i64, String) = api
        .conn()
        .query_row(
            &format!("SELECT name, version, hash FROM {MIGRATIONS_TABLE}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();

    assert_eq!((name.as_str(), version), ("init", 1));
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn modified_history_is_reported_and_skipped_but_the_run_continues() {
    let api = TestApi::new();
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "0001-init.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");

    let files = list_migration_files(dir.path()).unwrap();
    run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &RecordingHost::default()).unwrap();

    // Rewrite history, then add a legitimate new migration.
    write_migration(
        dir.path(),
        "0001-init.sql",
        "CREATE TABLE users (id INTEGER PRIMARY KEY);\n-- edited after apply\n",
    );
    write_migration(dir.path(), "0002-posts.sql", "CREATE TABLE posts (id INTEGER PRIMARY KEY);");

    let files = list_migration_files(dir.path()).unwrap();
    let host = RecordingHost::default();
    let summary = run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &host).unwrap();

    pretty_eq!(
        summary.tampered,
        vec![MigrationRef { version: 1, name: "init".into() }]
    );
    pretty_eq!(summary.applied, vec![MigrationRef { version: 2, name: "posts".into() }]);
    pretty_eq!(
        host.plain_messages(),
        vec!["Migration 1 (init) has been modified", "✓ 2: posts"]
    );

    // The tampered file was never re-run: users was not touched.
    assert_eq!(api.count("users"), 0);
}

#[test]
fn failing_migration_stops_the_run_and_records_nothing() {
    let api = TestApi::new();
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "0001-bad.sql", "CREATE TABLE oops (id INTEGER;");

    let files = list_migration_files(dir.path()).unwrap();
    let host = RecordingHost::default();
    let err = run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &host).unwrap_err();

    assert!(matches!(err, MigrateError::Engine(_)), "{err:?}");
    pretty_eq!(host.plain_messages(), vec!["✗ 1: bad"]);

    let tracked: i64 = api
        .conn()
        .query_row(&format!("SELECT COUNT(*) FROM {MIGRATIONS_TABLE}"), [], |row| row.get(0))
        .unwrap();
    assert_eq!(tracked, 0);

    // Fixing the file lets the next run apply it normally.
    write_migration(dir.path(), "0001-bad.sql", "CREATE TABLE oops (id INTEGER);");
    let files = list_migration_files(dir.path()).unwrap();
    let summary =
        run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &RecordingHost::default()).unwrap();
    assert_eq!(summary.applied.len(), 1);
}

#[test]
fn transaction_wrappers_are_stripped_before_execution() {
    let api = TestApi::new();
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "0001-init.sql",
        "BEGIN TRANSACTION;\nCREATE TABLE users (id INTEGER PRIMARY KEY);\nCOMMIT;\n",
    );

    let files = list_migration_files(dir.path()).unwrap();
    let summary =
        run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &RecordingHost::default()).unwrap();

    assert_eq!(summary.applied.len(), 1);
    assert_eq!(api.count("users"), 0);
}

#[test]
fn inner_transactions_fail_the_file_loudly() {
    let api = TestApi::new();
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "0001-init.sql",
        "BEGIN;\nCREATE TABLE a (id INT);\nCOMMIT;\nBEGIN;\nCREATE TABLE b (id INT);\nCOMMIT;\n",
    );

    let files = list_migration_files(dir.path()).unwrap();
    let err = run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &RecordingHost::default())
        .unwrap_err();

    assert!(matches!(err, MigrateError::StatementSplit { .. }), "{err:?}");
}

#[test]
fn migration_files_with_triggers_survive_splitting() {
    let api = TestApi::new();
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "0001-audit.sql",
        indoc! {r"
            CREATE TABLE users (id INTEGER PRIMARY KEY);
            CREATE TABLE audit (entry TEXT);
            CREATE TRIGGER log_user AFTER INSERT ON users
            BEGIN
                INSERT INTO audit VALUES ('user added');
            END;
        "},
    );

    let files = list_migration_files(dir.path()).unwrap();
    run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &RecordingHost::default()).unwrap();

    api.raw_cmd("INSERT INTO users (id) VALUES (1)");
    assert_eq!(api.count("audit"), 1);
}

#[test]
fn status_classifies_every_file() {
    let api = TestApi::new();
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "0001-init.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");

    // Before anything ran, even the bookkeeping table is absent.
    let files = list_migration_files(dir.path()).unwrap();
    let statuses = migration_status(api.conn(), &files, MIGRATIONS_TABLE).unwrap();
    pretty_eq!(
        statuses,
        vec![MigrationStatus { version: 1, name: "init".into(), state: MigrationState::Pending }]
    );

    run_migrations(api.conn(), &files, MIGRATIONS_TABLE, &RecordingHost::default()).unwrap();

    write_migration(dir.path(), "0001-init.sql", "CREATE TABLE users (id INT);");
    write_migration(dir.path(), "0002-posts.sql", "CREATE TABLE posts (id INTEGER PRIMARY KEY);");

    let files = list_migration_files(dir.path()).unwrap();
    let statuses = migration_status(api.conn(), &files, MIGRATIONS_TABLE).unwrap();
    pretty_eq!(
        statuses,
        vec![
            MigrationStatus { version: 1, name: "init".into(), state: MigrationState::Tampered },
            MigrationStatus { version: 2, name: "posts".into(), state: MigrationState::Pending },
        ]
    );
}
