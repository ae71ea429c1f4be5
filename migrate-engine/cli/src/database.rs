//! `calljmp database …` subcommands. Thin glue only: locate schema and
//! migration files, call into the engine, render the outcome.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use migrate_core::{
    apply, list_migration_files, migration_filename, migration_status, next_version, plan_from_database,
    render_plan, render_script, run_migrations, split_statements, MigrationState, StdoutHost,
    MIGRATIONS_TABLE,
};
use rusqlite::Connection;
use structopt::StructOpt;

use crate::remote::RemoteClient;

#[derive(Debug, StructOpt)]
pub enum DatabaseCommand {
    /// Show the statements that would bring the database to the target schema.
    Plan {
        /// Schema file, or directory of `.sql` files applied in name order.
        #[structopt(long, default_value = "schema")]
        schema: PathBuf,
        /// Path to the SQLite database file.
        #[structopt(long)]
        database: PathBuf,
        /// Emit executable statements only, one per line, `;`-terminated.
        #[structopt(long)]
        script: bool,
    },

    /// Plan and apply the target schema to the database in one step.
    Push {
        #[structopt(long, default_value = "schema")]
        schema: PathBuf,
        #[structopt(long)]
        database: PathBuf,
    },

    /// Generate a migration file for the pending schema changes.
    New {
        /// Migration name, e.g. `add-users`.
        name: String,
        #[structopt(long, default_value = "schema")]
        schema: PathBuf,
        #[structopt(long, default_value = "migrations")]
        migrations: PathBuf,
    },

    /// Apply pending migration files, locally or to the remote database.
    Migrate {
        /// Path to the SQLite database file (local mode).
        #[structopt(long, required_unless = "remote")]
        database: Option<PathBuf>,
        #[structopt(long, default_value = "migrations")]
        migrations: PathBuf,
        /// Ship the migration scripts to the remote database instead.
        #[structopt(long)]
        remote: bool,
        /// Control-plane base URL. Defaults to $CALLJMP_API_URL.
        #[structopt(long)]
        api_url: Option<String>,
    },

    /// Show the status of every migration file.
    Status {
        #[structopt(long)]
        database: PathBuf,
        #[structopt(long, default_value = "migrations")]
        migrations: PathBuf,
    },
}

impl DatabaseCommand {
    pub fn run(self) -> Result<()> {
        match self {
            DatabaseCommand::Plan { schema, database, script } => plan_command(&schema, &database, script),
            DatabaseCommand::Push { schema, database } => push_command(&schema, &database),
            DatabaseCommand::New { name, schema, migrations } => new_command(&name, &schema, &migrations),
            DatabaseCommand::Migrate { database, migrations, remote, api_url } => {
                migrate_command(database.as_deref(), &migrations, remote, api_url)
            }
            DatabaseCommand::Status { database, migrations } => status_command(&database, &migrations),
        }
    }
}

/// Reads the target schema: a single file verbatim, or every `.sql` file in
/// a directory concatenated in name order.
fn load_schema(path: &Path) -> Result<String> {
    if path.is_file() {
        return fs::read_to_string(path).with_context(|| format!("reading {}", path.display()));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("reading schema directory {}", path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "sql"))
        .collect();
    files.sort();

    if files.is_empty() {
        bail!("no .sql files under {}", path.display());
    }

    let mut schema = String::new();
    for file in files {
        schema.push_str(
            &fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?,
        );
        schema.push('\n');
    }
    Ok(schema)
}

fn open_database(path: &Path) -> Result<Connection> {
    Connection::open(path).with_context(|| format!("opening database {}", path.display()))
}

fn plan_command(schema: &Path, database: &Path, script: bool) -> Result<()> {
    let target = load_schema(schema)?;
    let conn = open_database(database)?;
    let plan = plan_from_database(&conn, &target)?;

    if plan.is_empty() {
        println!("{}", "Database schema is up to date.".dimmed());
        return Ok(());
    }

    if script {
        for statement in render_plan(&plan, false) {
            println!("{statement};");
        }
    } else {
        for line in render_plan(&plan, true) {
            println!("{line}");
        }
    }
    Ok(())
}

fn push_command(schema: &Path, database: &Path) -> Result<()> {
    let target = load_schema(schema)?;
    let conn = open_database(database)?;
    let plan = plan_from_database(&conn, &target)?;

    if plan.is_empty() {
        println!("{}", "Database schema is up to date.".dimmed());
        return Ok(());
    }

    let steps = plan.steps.len();
    apply(&conn, &plan)?;
    println!("{} applied {steps} steps", "✓".green());
    Ok(())
}

fn new_command(name: &str, schema: &Path, migrations: &Path) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        bail!("migration names may only contain letters, digits, '_' and '-'");
    }

    let target = load_schema(schema)?;
    let files = list_migration_files(migrations)?;

    // Replay the existing migrations on a scratch database; whatever is
    // missing from it afterwards becomes the new migration.
    let scratch = Connection::open_in_memory()?;
    for file in &files {
        let content = fs::read_to_string(&file.path)
            .with_context(|| format!("reading {}", file.path.display()))?;
        for statement in split_statements(&content)? {
            scratch.execute_batch(&statement).with_context(|| {
                format!("replaying migration {} ({})", file.version, file.name)
            })?;
        }
    }

    let plan = plan_from_database(&scratch, &target)?;
    if plan.is_empty() {
        println!("{}", "No schema changes; nothing to generate.".dimmed());
        return Ok(());
    }

    fs::create_dir_all(migrations)?;
    let path = migrations.join(migration_filename(next_version(&files), name));
    fs::write(&path, render_script(&plan)).with_context(|| format!("writing {}", path.display()))?;
    println!("{} wrote {}", "✓".green(), path.display());
    Ok(())
}

fn migrate_command(
    database: Option<&Path>,
    migrations: &Path,
    remote: bool,
    api_url: Option<String>,
) -> Result<()> {
    let files = list_migration_files(migrations)?;
    if files.is_empty() {
        println!("{}", "No migration files found.".dimmed());
        return Ok(());
    }

    if remote {
        let api_url = api_url
            .or_else(|| std::env::var("CALLJMP_API_URL").ok())
            .context("pass --api-url or set CALLJMP_API_URL")?;
        let token = std::env::var("CALLJMP_API_TOKEN").context("set CALLJMP_API_TOKEN")?;

        let mut script = String::new();
        for file in &files {
            script.push_str(
                &fs::read_to_string(&file.path)
                    .with_context(|| format!("reading {}", file.path.display()))?,
            );
            script.push('\n');
        }

        RemoteClient::new(api_url, token).migrate(&script)?;
        println!("{} remote migration complete", "✓".green());
        return Ok(());
    }

    let database = database.context("pass --database for local migrations")?;
    let conn = open_database(database)?;
    let summary = run_migrations(&conn, &files, MIGRATIONS_TABLE, &StdoutHost)?;

    if !summary.tampered.is_empty() {
        println!(
            "{}",
            format!("{} migration(s) were modified after being applied", summary.tampered.len())
                .as_str()
                .red()
        );
    }
    Ok(())
}

fn status_command(database: &Path, migrations: &Path) -> Result<()> {
    let files = list_migration_files(migrations)?;
    if files.is_empty() {
        println!("{}", "No migration files found.".dimmed());
        return Ok(());
    }

    let conn = open_database(database)?;
    for status in migration_status(&conn, &files, MIGRATIONS_TABLE)? {
        let line = format!("{}: {}", status.version, status.name);
        match status.state {
            MigrationState::Applied => println!("{} {line}", "✓".green()),
            MigrationState::Pending => println!("{} {line} (pending)", "•".dimmed()),
            MigrationState::Tampered => println!("{} {line} (modified after apply)", "✗".red()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_directories_concatenate_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.sql"), "CREATE TABLE b (id INT);").unwrap();
        fs::write(dir.path().join("a.sql"), "CREATE TABLE a (id INT);").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let schema = load_schema(dir.path()).unwrap();
        assert!(!schema.contains("ignored"));
        assert!(schema.find("CREATE TABLE a").unwrap() < schema.find("CREATE TABLE b").unwrap());
    }

    #[test]
    fn empty_schema_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_schema(dir.path()).is_err());
    }
}
