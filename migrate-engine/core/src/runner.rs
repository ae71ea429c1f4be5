//! Plan execution and versioned migration-file bookkeeping.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{FkViolation, MigrateError, MigrateResult};
use crate::plan::{ident, render_plan, MigrationPlan};
use crate::splitter::split_statements;

/// The bookkeeping table. The only persistent state the engine owns.
pub const MIGRATIONS_TABLE: &str = "_calljmp_migrations";

static MIGRATION_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)[-_]([a-zA-Z0-9_-]+)\.sql$").expect("regex should compile"));

/// A migration script on disk: `<version>-<name>.sql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: i64,
    pub name: String,
    pub path: PathBuf,
}

/// Lists the migration files under `dir` in ascending version order. Files
/// not matching the naming convention are ignored; a missing directory is an
/// empty set.
pub fn list_migration_files(dir: &Path) -> MigrateResult<Vec<MigrationFile>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(captures) = MIGRATION_FILE_RE.captures(name) else {
            continue;
        };
        let Ok(version) = captures[1].parse::<i64>() else {
            continue;
        };
        files.push(MigrationFile {
            version,
            name: captures[2].to_owned(),
            path: entry.path(),
        });
    }

    files.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// The version a newly generated migration should carry.
pub fn next_version(files: &[MigrationFile]) -> i64 {
    files.iter().map(|file| file.version).max().unwrap_or(0) + 1
}

/// Zero-padded file name for a new migration, e.g. `0001-init.sql`.
pub fn migration_filename(version: i64, name: &str) -> String {
    format!("{version:04}-{name}.sql")
}

/// Receives the user-visible per-migration lines. The engine never writes to
/// stdout directly.
pub trait MigrationHost {
    fn print(&self, message: &str);
}

/// Default host: one line per message on stdout.
#[derive(Debug, Default)]
pub struct StdoutHost;

impl MigrationHost for StdoutHost {
    fn print(&self, message: &str) {
        println!("{message}");
    }
}

/// Applies a plan to a live database, statement by statement, in plan order.
///
/// No transaction is opened here; a caller that needs all-or-nothing
/// semantics wraps the call itself. The plan's recreate sequence stays legal
/// inside such a transaction because every rename step runs under
/// `defer_foreign_keys`.
pub fn apply(conn: &Connection, plan: &MigrationPlan) -> MigrateResult<()> {
    for statement in render_plan(plan, false) {
        debug!(%statement, "applying");
        conn.execute_batch(&statement)?;
    }

    let violations = foreign_key_check(conn)?;
    if !violations.is_empty() {
        return Err(MigrateError::ForeignKeyViolation(violations));
    }
    Ok(())
}

fn foreign_key_check(conn: &Connection) -> MigrateResult<Vec<FkViolation>> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let violations = stmt
        .query_map([], |row| {
            Ok(FkViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                referenced_table: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(violations)
}

/// `version`/`name` of one migration, as the summary reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRef {
    pub version: i64,
    pub name: String,
}

impl From<&MigrationFile> for MigrationRef {
    fn from(file: &MigrationFile) -> Self {
        MigrationRef { version: file.version, name: file.name.clone() }
    }
}

/// Outcome of one `run_migrations` pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationRunSummary {
    pub applied: Vec<MigrationRef>,
    pub skipped: Vec<MigrationRef>,
    /// Files whose recorded hash no longer matches. Reported, never applied.
    pub tampered: Vec<MigrationRef>,
}

/// Runs every pending migration file, exactly once each, tracking content
/// hashes in `table`.
///
/// Already-applied files with a matching hash are skipped. A file whose
/// hash changed since it was applied is reported and skipped — history is
/// never rewritten — and the run continues. A failing migration stops the
/// run with its engine error.
pub fn run_migrations(
    conn: &Connection,
    files: &[MigrationFile],
    table: &str,
    host: &dyn MigrationHost,
) -> MigrateResult<MigrationRunSummary> {
    ensure_migrations_table(conn, table)?;
    let applied = applied_hashes(conn, table)?;

    let mut summary = MigrationRunSummary::default();
    for file in files {
        let content = fs::read_to_string(&file.path)?;
        let hash = hex::encode(Sha256::digest(content.as_bytes()));

        match applied.get(&file.name) {
            Some(existing) if *existing == hash => {
                host.print(&format!("✓ {}: {}", file.version, file.name).as_str().dimmed().to_string());
                summary.skipped.push(file.into());
            }
            Some(_) => {
                let tampered = MigrateError::MigrationTampered {
                    version: file.version,
                    name: file.name.clone(),
                };
                warn!(version = file.version, name = %file.name, "migration hash mismatch");
                host.print(&tampered.to_string().as_str().red().to_string());
                summary.tampered.push(file.into());
            }
            None => {
                let statements = split_statements(&content)?;
                match execute_migration(conn, table, file, &statements, &hash) {
                    Ok(()) => {
                        host.print(&format!("{} {}: {}", "✓".green(), file.version, file.name));
                        summary.applied.push(file.into());
                    }
                    Err(err) => {
                        host.print(&format!("{} {}: {}", "✗".red(), file.version, file.name));
                        return Err(err);
                    }
                }
            }
        }
    }

    Ok(summary)
}

fn execute_migration(
    conn: &Connection,
    table: &str,
    file: &MigrationFile,
    statements: &[String],
    hash: &str,
) -> MigrateResult<()> {
    for statement in statements {
        debug!(version = file.version, %statement, "executing");
        conn.execute_batch(statement)?;
    }
    conn.execute(
        &format!("INSERT INTO {} (name, version, hash) VALUES (?1, ?2, ?3)", ident(table)),
        params![file.name, file.version, hash],
    )?;
    Ok(())
}

fn ensure_migrations_table(conn: &Connection, table: &str) -> MigrateResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             name TEXT NOT NULL UNIQUE, \
             version INTEGER NOT NULL, \
             hash TEXT NOT NULL\
         )",
        ident(table)
    ))?;
    Ok(())
}

fn applied_hashes(conn: &Connection, table: &str) -> MigrateResult<HashMap<String, String>> {
    let mut stmt = conn.prepare(&format!("SELECT name, hash FROM {}", ident(table)))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

/// Per-file migration state for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Applied,
    Pending,
    Tampered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: String,
    pub state: MigrationState,
}

/// Classifies every migration file against the bookkeeping table without
/// touching the database. A missing bookkeeping table means nothing has been
/// applied yet.
pub fn migration_status(
    conn: &Connection,
    files: &[MigrationFile],
    table: &str,
) -> MigrateResult<Vec<MigrationStatus>> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get::<_, i64>(0).map(|n| n != 0),
    )?;
    let applied = if table_exists { applied_hashes(conn, table)? } else { HashMap::new() };

    let mut statuses = Vec::with_capacity(files.len());
    for file in files {
        let content = fs::read_to_string(&file.path)?;
        let hash = hex::encode(Sha256::digest(content.as_bytes()));
        let state = match applied.get(&file.name) {
            Some(existing) if *existing == hash => MigrationState::Applied,
            Some(_) => MigrationState::Tampered,
            None => MigrationState::Pending,
        };
        statuses.push(MigrationStatus { version: file.version, name: file.name.clone(), state });
    }
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "SELECT 1;").unwrap();
    }

    #[test]
    fn migration_files_follow_the_naming_convention() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "0001-init.sql");
        touch(dir.path(), "0002_add-users.sql");
        touch(dir.path(), "1700000000-from_timestamp.sql");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "README.sql");
        touch(dir.path(), "3-bad name.sql");

        let files = list_migration_files(dir.path()).unwrap();
        let names: Vec<(i64, &str)> =
            files.iter().map(|f| (f.version, f.name.as_str())).collect();

        assert_eq!(
            names,
            vec![(1, "init"), (2, "add-users"), (1_700_000_000, "from_timestamp")]
        );
    }

    #[test]
    fn missing_directory_is_an_empty_migration_set() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert_eq!(list_migration_files(&gone).unwrap(), Vec::new());
    }

    #[test]
    fn next_version_counts_from_the_highest_seen() {
        assert_eq!(next_version(&[]), 1);

        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "0001-init.sql");
        touch(dir.path(), "0007-later.sql");
        let files = list_migration_files(dir.path()).unwrap();
        assert_eq!(next_version(&files), 8);
    }

    #[test]
    fn filenames_are_zero_padded() {
        assert_eq!(migration_filename(1, "init"), "0001-init.sql");
        assert_eq!(migration_filename(12345, "big"), "12345-big.sql");
    }
}
