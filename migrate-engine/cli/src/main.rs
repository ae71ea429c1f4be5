mod database;
mod remote;

use anyhow::Result;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, StructOpt)]
#[structopt(name = "calljmp", about = "Calljmp developer CLI")]
enum Cli {
    /// Work with the project's SQLite database schema and migrations.
    Database(database::DatabaseCommand),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::from_args() {
        Cli::Database(command) => command.run(),
    }
}
