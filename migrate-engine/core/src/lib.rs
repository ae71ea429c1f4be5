//! Declarative SQLite schema migrations for the Calljmp CLI.
//!
//! The engine takes a target schema as plain `CREATE …` scripts, compares it
//! against the state of a live database, and produces a minimal ordered plan
//! that preserves every preservable row: in-place `ALTER TABLE ADD COLUMN`
//! where that suffices, rename-swap recreation (with its foreign-key
//! dependents) where it does not.
//!
//! ```no_run
//! use migrate_core::{plan, render_plan};
//!
//! let plan = plan(
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY);",
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);",
//! )?;
//! for statement in render_plan(&plan, true) {
//!     println!("{statement}");
//! }
//! # Ok::<(), migrate_core::MigrateError>(())
//! ```
//!
//! Versioned migration files are tracked by content hash in the
//! [`MIGRATIONS_TABLE`] bookkeeping table; an applied migration never runs
//! twice and a modified one is refused, not re-run.

mod differ;
mod error;
mod fk_graph;
mod normalize;
mod plan;
mod runner;
mod splitter;

pub use differ::{plan, plan_from_database};
pub use error::{FkViolation, MigrateError, MigrateResult};
pub use normalize::normalize_sql;
pub use plan::{render_plan, render_script, MigrationPlan, MigrationStep};
pub use runner::{
    apply, list_migration_files, migration_filename, migration_status, next_version,
    run_migrations, MigrationFile, MigrationHost, MigrationRef, MigrationRunSummary,
    MigrationState, MigrationStatus, StdoutHost, MIGRATIONS_TABLE,
};
pub use splitter::split_statements;

pub use sqlite_describer::ObjectKind;
