//! Read-only introspection of a SQLite database schema.
//!
//! Everything here is a thin, faithful projection of what the engine itself
//! reports through `sqlite_master` and the `table_info` / `foreign_key_list`
//! pragmas. No interpretation happens at this layer: the `sql` text of an
//! object is returned exactly as SQLite stored it, and errors from the
//! underlying connection are propagated unchanged.

use indexmap::IndexMap;
use rusqlite::Connection;

/// Result alias for introspection calls. Failures are always engine errors.
pub type DescriberResult<T> = Result<T, rusqlite::Error>;

/// The closed set of schema object kinds the migration engine operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Table,
    Index,
    Trigger,
    View,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Table,
        ObjectKind::Index,
        ObjectKind::Trigger,
        ObjectKind::View,
    ];

    /// The `type` column value in `sqlite_master`.
    pub fn master_type(self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Index => "index",
            ObjectKind::Trigger => "trigger",
            ObjectKind::View => "view",
        }
    }

    /// The keyword used in `CREATE`/`DROP` statements.
    pub fn sql_keyword(self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::Index => "INDEX",
            ObjectKind::Trigger => "TRIGGER",
            ObjectKind::View => "VIEW",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_keyword())
    }
}

/// A named DDL object as stored in `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    /// Name with its original casing.
    pub name: String,
    pub kind: ObjectKind,
    /// The `CREATE …` text exactly as SQLite stored it.
    pub sql: String,
}

/// One row of `PRAGMA table_info`, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    /// The default expression as written, if any.
    pub default_value: Option<String>,
    /// 0 when the column is not part of the primary key, 1-based rank otherwise.
    pub primary_key_rank: i64,
}

impl ColumnInfo {
    /// A column that cannot be backfilled on existing rows.
    pub fn is_required_without_default(&self) -> bool {
        self.not_null && self.default_value.is_none()
    }
}

/// One foreign-key constraint, grouped from `PRAGMA foreign_key_list` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub referenced_table: String,
    /// `(from, to)` column pairs in `seq` order. `to` is absent when the
    /// constraint references the parent's primary key implicitly.
    pub columns: Vec<(String, Option<String>)>,
    pub on_delete: String,
    pub on_update: String,
}

/// Name patterns for engine-internal and bookkeeping objects, as SQL `LIKE`
/// patterns. Objects matching any of these never take part in planning.
pub const RESERVED_NAME_PATTERNS: [&str; 3] = ["sqlite_%", "_cf_%", "%_calljmp_%"];

/// Lists all objects of `kind`, keyed by lowercased name, in `sqlite_master`
/// order. Objects without stored SQL (auto-indexes) and objects matching a
/// reserved name pattern are excluded.
pub fn list_objects(
    conn: &Connection,
    kind: ObjectKind,
) -> DescriberResult<IndexMap<String, SchemaObject>> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master \
         WHERE type = ?1 AND sql IS NOT NULL \
           AND name NOT LIKE 'sqlite_%' \
           AND name NOT LIKE '_cf_%' \
           AND name NOT LIKE '%_calljmp_%'",
    )?;

    let mut objects = IndexMap::new();
    let mut rows = stmt.query([kind.master_type()])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let sql: String = row.get(1)?;
        objects.insert(name.to_lowercase(), SchemaObject { name, kind, sql });
    }

    tracing::trace!(kind = kind.master_type(), count = objects.len(), "listed schema objects");
    Ok(objects)
}

/// Column metadata for `table`, in declaration order.
pub fn columns(conn: &Connection, table: &str) -> DescriberResult<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
    )?;

    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default_value: row.get(3)?,
                primary_key_rank: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns)
}

/// Foreign-key constraints declared on `table`, grouped by constraint.
pub fn foreign_keys(conn: &Connection, table: &str) -> DescriberResult<Vec<ForeignKey>> {
    let mut stmt = conn.prepare(
        "SELECT id, \"table\", \"from\", \"to\", on_delete, on_update \
         FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;

    let mut keys: Vec<(i64, ForeignKey)> = Vec::new();
    let mut rows = stmt.query([table])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let from: String = row.get(2)?;
        let to: Option<String> = row.get(3)?;

        match keys.last_mut() {
            Some((last_id, fk)) if *last_id == id => fk.columns.push((from, to)),
            _ => keys.push((
                id,
                ForeignKey {
                    referenced_table: row.get(1)?,
                    columns: vec![(from, to)],
                    on_delete: row.get(4)?,
                    on_update: row.get(5)?,
                },
            )),
        }
    }

    Ok(keys.into_iter().map(|(_, fk)| fk).collect())
}

/// True when `table` currently holds at least one row.
pub fn has_rows(conn: &Connection, table: &str) -> DescriberResult<bool> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {} LIMIT 1)", quote_ident(table));
    conn.query_row(&sql, [], |row| row.get::<_, i64>(0)).map(|n| n != 0)
}

/// Double-quotes an identifier for interpolation into SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
