//! Foreign-key dependency graph over lowercased table names.
//!
//! An edge `parent → child` records that rows of `child` reference `parent`.
//! Rewriting a parent therefore invalidates its children transitively; that
//! closure, and the creation/drop ordering, both come from this graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use indexmap::IndexMap;
use rusqlite::Connection;
use sqlite_describer::{foreign_keys, SchemaObject};

#[derive(Debug, Default)]
pub(crate) struct ForeignKeyGraph {
    /// parent (lowercase) → children referencing it.
    children: BTreeMap<String, BTreeSet<String>>,
    /// child (lowercase) → parents it references.
    parents: BTreeMap<String, BTreeSet<String>>,
}

impl ForeignKeyGraph {
    /// Reads the FK edges of every table in `tables` from `conn` and adds
    /// them to the graph. Self-references and references to tables outside
    /// `tables` are ignored.
    pub(crate) fn add_edges_from(
        &mut self,
        conn: &Connection,
        tables: &IndexMap<String, SchemaObject>,
    ) -> rusqlite::Result<()> {
        for (child_key, object) in tables {
            for fk in foreign_keys(conn, &object.name)? {
                let parent_key = fk.referenced_table.to_lowercase();
                if parent_key == *child_key || !tables.contains_key(&parent_key) {
                    continue;
                }
                self.children.entry(parent_key.clone()).or_default().insert(child_key.clone());
                self.parents.entry(child_key.clone()).or_default().insert(parent_key);
            }
        }
        Ok(())
    }

    /// Every table that transitively references one of `roots`, roots
    /// excluded unless reachable from another root.
    pub(crate) fn dependents(&self, roots: &BTreeSet<String>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = roots.iter().map(String::as_str).collect();

        while let Some(table) = queue.pop_front() {
            if let Some(children) = self.children.get(table) {
                for child in children {
                    if seen.insert(child.clone()) {
                        queue.push_back(child);
                    }
                }
            }
        }

        seen
    }

    /// Topological order of `subset` with parents before children. Ties are
    /// broken lexicographically; a cycle is broken by emitting its
    /// lexicographically smallest member next, which is only legal under
    /// deferred foreign keys — exactly the mode recreation runs in.
    pub(crate) fn topo_order(&self, subset: &BTreeSet<String>) -> Vec<String> {
        let mut pending: BTreeMap<&str, usize> = subset
            .iter()
            .map(|table| {
                let indegree = self
                    .parents
                    .get(table)
                    .map(|parents| parents.iter().filter(|p| subset.contains(*p)).count())
                    .unwrap_or(0);
                (table.as_str(), indegree)
            })
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while !pending.is_empty() {
            // BTreeMap iteration makes both picks lexicographic.
            let next = pending
                .iter()
                .find(|(_, indegree)| **indegree == 0)
                .or_else(|| pending.iter().next())
                .map(|(table, _)| *table)
                .expect("pending is non-empty");

            pending.remove(next);
            if let Some(children) = self.children.get(next) {
                for child in children {
                    if let Some(indegree) = pending.get_mut(child.as_str()) {
                        *indegree = indegree.saturating_sub(1);
                    }
                }
            }
            order.push(next.to_owned());
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlite_describer::{list_objects, ObjectKind};

    fn graph_of(sql: &str) -> (ForeignKeyGraph, BTreeSet<String>) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(sql).unwrap();
        let tables = list_objects(&conn, ObjectKind::Table).unwrap();
        let keys: BTreeSet<String> = tables.keys().cloned().collect();
        let mut graph = ForeignKeyGraph::default();
        graph.add_edges_from(&conn, &tables).unwrap();
        (graph, keys)
    }

    const HIERARCHY: &str = r"
        CREATE TABLE grandparent (id INTEGER PRIMARY KEY);
        CREATE TABLE parent (
            id INTEGER PRIMARY KEY,
            gp INTEGER REFERENCES grandparent(id)
        );
        CREATE TABLE child (
            id INTEGER PRIMARY KEY,
            p INTEGER REFERENCES parent(id)
        );
    ";

    #[test]
    fn dependents_walk_transitively() {
        let (graph, _) = graph_of(HIERARCHY);

        let roots: BTreeSet<String> = ["grandparent".to_string()].into();
        assert_eq!(
            graph.dependents(&roots),
            BTreeSet::from(["parent".to_string(), "child".to_string()])
        );

        let roots: BTreeSet<String> = ["child".to_string()].into();
        assert!(graph.dependents(&roots).is_empty());
    }

    #[test]
    fn topo_order_puts_parents_first() {
        let (graph, keys) = graph_of(HIERARCHY);
        assert_eq!(graph.topo_order(&keys), vec!["grandparent", "parent", "child"]);
    }

    #[test]
    fn topo_order_breaks_ties_lexicographically() {
        let (graph, keys) = graph_of(
            r"
            CREATE TABLE zeta (id INTEGER PRIMARY KEY);
            CREATE TABLE alpha (id INTEGER PRIMARY KEY);
            CREATE TABLE mid (
                id INTEGER PRIMARY KEY,
                a INTEGER REFERENCES alpha(id),
                z INTEGER REFERENCES zeta(id)
            );
            ",
        );
        assert_eq!(graph.topo_order(&keys), vec!["alpha", "zeta", "mid"]);
    }

    #[test]
    fn cycles_fall_back_to_lexicographic_order() {
        // Mutual references; legal in SQLite when constraints are deferred.
        let (graph, keys) = graph_of(
            r"
            CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a(id));
            CREATE TABLE a (id INTEGER PRIMARY KEY, b_id INTEGER REFERENCES b(id));
            ",
        );
        assert_eq!(graph.topo_order(&keys), vec!["a", "b"]);
    }

    #[test]
    fn self_references_are_ignored() {
        let (graph, keys) = graph_of(
            "CREATE TABLE node (id INTEGER PRIMARY KEY, parent INTEGER REFERENCES node(id));",
        );
        assert_eq!(graph.topo_order(&keys), vec!["node"]);
        assert!(graph.dependents(&BTreeSet::from(["node".to_string()])).is_empty());
    }
}
