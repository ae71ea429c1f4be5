use std::fmt;

pub type MigrateResult<T> = Result<T, MigrateError>;

/// One row of `PRAGMA foreign_key_check` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkViolation {
    pub table: String,
    /// Absent for `WITHOUT ROWID` tables.
    pub rowid: Option<i64>,
    pub referenced_table: String,
    pub fk_index: i64,
}

impl fmt::Display for FkViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rowid {
            Some(rowid) => write!(
                f,
                "{} (rowid {rowid}) references missing row in {}",
                self.table, self.referenced_table
            ),
            None => write!(f, "{} references missing row in {}", self.table, self.referenced_table),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The target schema scripts failed to load into the pristine database.
    #[error("invalid target schema: {0}")]
    SchemaInvalid(#[source] rusqlite::Error),

    /// A structural rewrite would introduce a column that existing rows
    /// cannot satisfy. Raised during planning, before any mutation.
    #[error(
        "cannot migrate table {table}: column {column} is NOT NULL without a default \
         and the table is not empty"
    )]
    PlanInfeasible { table: String, column: String },

    /// `PRAGMA foreign_key_check` reported violations after a plan ran.
    #[error("foreign key violations after migration: {}", format_violations(.0))]
    ForeignKeyViolation(Vec<FkViolation>),

    /// A migration file still contains transaction statements after the
    /// head/tail strip. The execution backend owns transaction boundaries.
    #[error("migration script must not manage transactions; remove the extra {statement}")]
    StatementSplit { statement: String },

    /// A `BEGIN…END` / `CASE…END` block, block comment, or dollar-quoted
    /// section never closed.
    #[error("unterminated {construct} in SQL input")]
    UnterminatedBlock { construct: &'static str },

    #[error("unterminated string literal in SQL input")]
    UnterminatedString,

    /// An applied migration's file content no longer matches its recorded
    /// hash. Reported per file; never fails the whole run.
    #[error("Migration {version} ({name}) has been modified")]
    MigrationTampered { version: i64, name: String },

    #[error(transparent)]
    Engine(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_violations(violations: &[FkViolation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
