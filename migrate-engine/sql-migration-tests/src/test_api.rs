//! A small builder-style API for exercising the migration engine against a
//! real in-memory database.

use std::cell::RefCell;
use std::collections::BTreeSet;

pub use expect_test::expect;
pub use indoc::indoc;
pub use migrate_core::*;
pub use pretty_assertions::assert_eq as pretty_eq;

use rusqlite::Connection;
use sqlite_describer::{columns, foreign_keys, list_objects};

pub struct TestApi {
    conn: Connection,
}

impl Default for TestApi {
    fn default() -> Self {
        Self::new()
    }
}

impl TestApi {
    pub fn new() -> Self {
        TestApi { conn: Connection::open_in_memory().expect("opening in-memory database") }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn raw_cmd(&self, sql: &str) {
        self.conn.execute_batch(sql).expect("raw_cmd");
    }

    /// Plans the migration of the live database to `target_schema`.
    pub fn plan_to(&self, target_schema: &str) -> MigrationPlan {
        plan_from_database(&self.conn, target_schema).expect("planning")
    }

    /// Plans and applies in one go, returning the plan that ran.
    pub fn push_schema(&self, target_schema: &str) -> MigrationPlan {
        let plan = self.plan_to(target_schema);
        apply(&self.conn, &plan).expect("applying plan");
        plan
    }

    /// The executable statement list for the live database → `target_schema`.
    pub fn plan_statements(&self, target_schema: &str) -> Vec<String> {
        render_plan(&self.plan_to(target_schema), false)
    }

    pub fn count(&self, table: &str) -> i64 {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count")
    }

    /// Asserts that the live schema now matches `target_schema`: same object
    /// names per kind, table structure equal column-by-column and FK-by-FK,
    /// other objects equal up to normalization.
    pub fn assert_matches_schema(&self, target_schema: &str) {
        let pristine = Connection::open_in_memory().expect("opening pristine database");
        pristine.execute_batch(target_schema).expect("loading target schema");

        for kind in ObjectKind::ALL {
            let live = list_objects(&self.conn, kind).expect("listing live objects");
            let expected = list_objects(&pristine, kind).expect("listing pristine objects");

            let live_keys: BTreeSet<&String> = live.keys().collect();
            let expected_keys: BTreeSet<&String> = expected.keys().collect();
            pretty_eq!(live_keys, expected_keys, "{kind} set mismatch");

            for (key, expected_obj) in &expected {
                let live_obj = &live[key];
                if kind == ObjectKind::Table {
                    pretty_eq!(
                        columns(&self.conn, &live_obj.name).unwrap(),
                        columns(&pristine, &expected_obj.name).unwrap(),
                        "columns of {key}"
                    );
                    pretty_eq!(
                        foreign_keys(&self.conn, &live_obj.name).unwrap(),
                        foreign_keys(&pristine, &expected_obj.name).unwrap(),
                        "foreign keys of {key}"
                    );
                } else {
                    pretty_eq!(
                        normalize_sql(&live_obj.sql),
                        normalize_sql(&expected_obj.sql),
                        "sql of {kind} {key}"
                    );
                }
            }
        }
    }
}

/// A `MigrationHost` that records what the engine would have shown the user.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub messages: RefCell<Vec<String>>,
}

impl MigrationHost for RecordingHost {
    fn print(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_owned());
    }
}

impl RecordingHost {
    /// Messages with ANSI color escapes stripped.
    pub fn plain_messages(&self) -> Vec<String> {
        self.messages
            .borrow()
            .iter()
            .map(|message| strip_ansi(message))
            .collect()
    }
}

fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            for c in chars.by_ref() {
                if c == 'm' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
