//! The migration planner.
//!
//! Diffs the current schema against a pristine in-memory database built from
//! the target DDL and emits an ordered statement plan: cheap `ALTER TABLE
//! ADD COLUMN` work where possible, rename-swap recreation where not, with
//! foreign-key dependents recreated alongside and all orderings resolved
//! through the target's FK graph.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;
use sqlite_describer::{
    columns, foreign_keys, has_rows, list_objects, ColumnInfo, ForeignKey, ObjectKind, SchemaObject,
};
use tracing::debug;

use crate::error::{MigrateError, MigrateResult};
use crate::fk_graph::ForeignKeyGraph;
use crate::normalize::normalize_sql;
use crate::plan::{ident, MigrationPlan, MigrationStep};

static INDEX_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bINDEX\s+(?:IF\s+NOT\s+EXISTS\s+)?["'`\[]?[A-Za-z0-9_]+["'`\]]?\s+ON\s+["'`\[]?([A-Za-z0-9_]+)"#)
        .expect("regex should compile")
});

static TRIGGER_TARGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bON\s+["'`\[]?([A-Za-z0-9_]+)"#).expect("regex should compile"));

static VIEW_TARGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bFROM\s+["'`\[]?([A-Za-z0-9_]+)"#).expect("regex should compile"));

/// The table an index, trigger, or view is defined over, lowercased, as far
/// as its `CREATE` text reveals it.
fn owning_table(kind: ObjectKind, sql: &str) -> Option<String> {
    let re = match kind {
        ObjectKind::Table => return None,
        ObjectKind::Index => &INDEX_TARGET_RE,
        ObjectKind::Trigger => &TRIGGER_TARGET_RE,
        ObjectKind::View => &VIEW_TARGET_RE,
    };
    re.captures(sql).map(|captures| captures[1].to_lowercase())
}

/// Plans the migration from one schema script to another. Both scripts are
/// loaded into scratch in-memory databases that are gone before this
/// returns.
pub fn plan(current_schema: &str, target_schema: &str) -> MigrateResult<MigrationPlan> {
    let current = Connection::open_in_memory()?;
    if !current_schema.trim().is_empty() {
        current.execute_batch(current_schema)?;
    }
    plan_from_database(&current, target_schema)
}

/// Plans the migration of a live database to `target_schema`.
pub fn plan_from_database(current: &Connection, target_schema: &str) -> MigrateResult<MigrationPlan> {
    let target = Connection::open_in_memory()?;
    target
        .execute_batch(target_schema)
        .map_err(MigrateError::SchemaInvalid)?;
    diff(current, &target)
}

fn diff(current: &Connection, target: &Connection) -> MigrateResult<MigrationPlan> {
    let current_tables = list_objects(current, ObjectKind::Table)?;
    let target_tables = list_objects(target, ObjectKind::Table)?;

    let dropped: BTreeSet<String> = current_tables
        .keys()
        .filter(|key| !target_tables.contains_key(*key))
        .cloned()
        .collect();
    let added: BTreeSet<String> = target_tables
        .keys()
        .filter(|key| !current_tables.contains_key(*key))
        .cloned()
        .collect();

    // Classify modified tables, iterating in target order.
    let mut add_only: Vec<(String, Vec<ColumnInfo>)> = Vec::new();
    let mut recreated: BTreeSet<String> = BTreeSet::new();
    for (key, target_obj) in &target_tables {
        let Some(current_obj) = current_tables.get(key) else {
            continue;
        };
        if normalize_sql(&current_obj.sql) == normalize_sql(&target_obj.sql) {
            continue;
        }

        let current_cols = columns(current, &current_obj.name)?;
        let target_cols = columns(target, &target_obj.name)?;
        let current_fks = foreign_keys(current, &current_obj.name)?;
        let target_fks = foreign_keys(target, &target_obj.name)?;

        match classify(&current_cols, &target_cols, &current_fks, &target_fks) {
            TableChange::AddOnly(new_columns) => add_only.push((key.clone(), new_columns)),
            TableChange::Structural => {
                recreated.insert(key.clone());
            }
        }
    }

    // FK graph of the target; edges among dropped tables come from the
    // current database so that drops still run children-first.
    let mut graph = ForeignKeyGraph::default();
    graph.add_edges_from(target, &target_tables)?;
    let dropped_objects: IndexMap<String, SchemaObject> = current_tables
        .iter()
        .filter(|(key, _)| dropped.contains(*key))
        .map(|(key, object)| (key.clone(), object.clone()))
        .collect();
    graph.add_edges_from(current, &dropped_objects)?;

    // A recreated table invalidates everything that references it: the
    // rename-swap rebinds referents' FK clauses to the `_old` table, so they
    // must be rewritten too.
    for dependent in graph.dependents(&recreated) {
        if current_tables.contains_key(&dependent) && target_tables.contains_key(&dependent) {
            recreated.insert(dependent);
        }
    }
    // A table forced into recreation carries its column additions with it.
    add_only.retain(|(key, _)| !recreated.contains(key));

    // Recreation copies only the common columns; a new required column
    // without a default cannot be backfilled once rows exist.
    for key in &recreated {
        let current_obj = &current_tables[key];
        let current_names: BTreeSet<String> = columns(current, &current_obj.name)?
            .into_iter()
            .map(|col| col.name.to_lowercase())
            .collect();
        for col in columns(target, &target_tables[key].name)? {
            if !current_names.contains(&col.name.to_lowercase())
                && col.is_required_without_default()
                && has_rows(current, &current_obj.name)?
            {
                return Err(MigrateError::PlanInfeasible {
                    table: current_obj.name.clone(),
                    column: col.name,
                });
            }
        }
    }

    debug!(
        dropped = dropped.len(),
        added = added.len(),
        add_only = add_only.len(),
        recreated = recreated.len(),
        "classified table changes"
    );

    let affected: BTreeSet<String> =
        dropped.iter().chain(added.iter()).chain(recreated.iter()).cloned().collect();
    let order = graph.topo_order(&affected);

    let mut steps = Vec::new();

    // Phase D — drop removed tables, children before parents.
    for key in order.iter().rev().filter(|key| dropped.contains(*key)) {
        let name = &current_tables[key].name;
        steps.push(MigrationStep::new(
            ObjectKind::Table,
            name.clone(),
            format!("DROP TABLE {}", ident(name)),
        ));
    }

    // Phase A — create new tables, parents before children.
    for key in order.iter().filter(|key| added.contains(*key)) {
        let object = &target_tables[key];
        steps.push(MigrationStep::new(ObjectKind::Table, object.name.clone(), object.sql.clone()));
    }

    // Phase M-add — in-place column additions.
    for (key, new_columns) in &add_only {
        let name = &target_tables[key].name;
        steps.push(MigrationStep {
            kind: ObjectKind::Table,
            target_name: name.clone(),
            statements: new_columns.iter().map(|col| render_add_column(name, col)).collect(),
            requires_deferred_fk: false,
        });
    }

    // Phase R — rename-swap recreation.
    let recreate_order: Vec<&String> =
        order.iter().filter(|key| recreated.contains(*key)).collect();

    for key in &recreate_order {
        let name = &current_tables[key.as_str()].name;
        steps.push(
            MigrationStep::new(
                ObjectKind::Table,
                name.clone(),
                format!("ALTER TABLE {} RENAME TO {}", ident(name), ident(&format!("{name}_old"))),
            )
            .deferring_fk(),
        );
    }
    for key in &recreate_order {
        let object = &target_tables[key.as_str()];
        steps.push(MigrationStep::new(ObjectKind::Table, object.name.clone(), object.sql.clone()));
    }
    for key in &recreate_order {
        let current_name = &current_tables[key.as_str()].name;
        let target_name = &target_tables[key.as_str()].name;
        let target_names: BTreeSet<String> = columns(target, target_name)?
            .into_iter()
            .map(|col| col.name.to_lowercase())
            .collect();
        let common: Vec<String> = columns(current, current_name)?
            .into_iter()
            .filter(|col| target_names.contains(&col.name.to_lowercase()))
            .map(|col| ident(&col.name))
            .collect();
        if !common.is_empty() {
            let column_list = common.join(",");
            steps.push(MigrationStep::new(
                ObjectKind::Table,
                target_name.clone(),
                format!(
                    "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {}",
                    ident(target_name),
                    ident(&format!("{current_name}_old")),
                ),
            ));
        }
    }
    for key in recreate_order.iter().rev() {
        let name = &current_tables[key.as_str()].name;
        steps.push(MigrationStep::new(
            ObjectKind::Table,
            name.clone(),
            format!("DROP TABLE {}", ident(&format!("{name}_old"))),
        ));
    }

    // Indexes, triggers, and views.
    let mut gone_with_table = recreated.clone();
    gone_with_table.extend(dropped.iter().cloned());
    for kind in [ObjectKind::Index, ObjectKind::Trigger, ObjectKind::View] {
        let current_objects = list_objects(current, kind)?;
        let target_objects = list_objects(target, kind)?;
        diff_objects(kind, &current_objects, &target_objects, &recreated, &gone_with_table, &mut steps);
    }

    Ok(MigrationPlan { steps })
}

enum TableChange {
    AddOnly(Vec<ColumnInfo>),
    Structural,
}

/// A modified table is add-only when the target keeps every current column
/// unchanged and in place, only appends, every appended column can be
/// satisfied on existing rows, and the FK constraints are untouched.
/// Anything else needs the rewrite path.
fn classify(
    current_cols: &[ColumnInfo],
    target_cols: &[ColumnInfo],
    current_fks: &[ForeignKey],
    target_fks: &[ForeignKey],
) -> TableChange {
    if target_cols.len() <= current_cols.len() {
        // Columns were dropped or changed, or the difference is in
        // constraints ALTER cannot express.
        return TableChange::Structural;
    }

    for (current, target) in current_cols.iter().zip(target_cols) {
        if !columns_equivalent(current, target) {
            return TableChange::Structural;
        }
    }

    let added = &target_cols[current_cols.len()..];
    if added.iter().any(ColumnInfo::is_required_without_default) {
        return TableChange::Structural;
    }

    if !fks_equivalent(current_fks, target_fks) {
        return TableChange::Structural;
    }

    TableChange::AddOnly(added.to_vec())
}

fn columns_equivalent(a: &ColumnInfo, b: &ColumnInfo) -> bool {
    a.name.eq_ignore_ascii_case(&b.name)
        && a.declared_type.eq_ignore_ascii_case(&b.declared_type)
        && a.not_null == b.not_null
        && match (&a.default_value, &b.default_value) {
            (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
            (None, None) => true,
            _ => false,
        }
        && a.primary_key_rank == b.primary_key_rank
}

fn fks_equivalent(a: &[ForeignKey], b: &[ForeignKey]) -> bool {
    fn canonical(fks: &[ForeignKey]) -> Vec<(String, Vec<(String, Option<String>)>, String, String)> {
        let mut canonical: Vec<_> = fks
            .iter()
            .map(|fk| {
                (
                    fk.referenced_table.to_lowercase(),
                    fk.columns
                        .iter()
                        .map(|(from, to)| {
                            (from.to_lowercase(), to.as_ref().map(|t| t.to_lowercase()))
                        })
                        .collect(),
                    fk.on_delete.to_uppercase(),
                    fk.on_update.to_uppercase(),
                )
            })
            .collect();
        canonical.sort();
        canonical
    }

    canonical(a) == canonical(b)
}

fn render_add_column(table: &str, col: &ColumnInfo) -> String {
    let mut sql = format!("ALTER TABLE {} ADD COLUMN {}", ident(table), ident(&col.name));
    if !col.declared_type.is_empty() {
        sql.push(' ');
        sql.push_str(&col.declared_type);
    }
    if col.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

/// Diffs one non-table object kind. An index or trigger that lived on a
/// dropped or recreated table died with it, so only the `CREATE` side is
/// emitted for those; views survive table rewrites and are always dropped
/// explicitly.
fn diff_objects(
    kind: ObjectKind,
    current_objects: &IndexMap<String, SchemaObject>,
    target_objects: &IndexMap<String, SchemaObject>,
    recreated: &BTreeSet<String>,
    gone_with_table: &BTreeSet<String>,
    steps: &mut Vec<MigrationStep>,
) {
    for (key, object) in current_objects {
        if target_objects.contains_key(key) {
            continue;
        }
        let died_with_table = kind != ObjectKind::View
            && owning_table(kind, &object.sql).is_some_and(|owner| gone_with_table.contains(&owner));
        if died_with_table {
            continue;
        }
        steps.push(MigrationStep::new(
            kind,
            object.name.clone(),
            format!("DROP {} {}", kind.sql_keyword(), ident(&object.name)),
        ));
    }

    for (key, target_obj) in target_objects {
        let Some(current_obj) = current_objects.get(key) else {
            steps.push(MigrationStep::new(kind, target_obj.name.clone(), target_obj.sql.clone()));
            continue;
        };

        let changed = normalize_sql(&current_obj.sql) != normalize_sql(&target_obj.sql);
        let owner_recreated = owning_table(kind, &target_obj.sql)
            .is_some_and(|owner| recreated.contains(&owner));
        if !changed && !owner_recreated {
            continue;
        }

        let mut step = MigrationStep::new(kind, target_obj.name.clone(), target_obj.sql.clone());
        if kind == ObjectKind::View || !owner_recreated {
            step.statements.insert(
                0,
                format!("DROP {} {}", kind.sql_keyword(), ident(&current_obj.name)),
            );
        }
        steps.push(step);
    }
}
