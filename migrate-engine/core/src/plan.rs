//! Plan data model and rendering.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlite_describer::ObjectKind;

static BAREWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("regex should compile"));

/// Quotes an identifier only when it is not a bareword, matching how SQLite
/// itself prints schema text.
pub(crate) fn ident(name: &str) -> String {
    if BAREWORD_RE.is_match(name) {
        name.to_owned()
    } else {
        sqlite_describer::quote_ident(name)
    }
}

/// An atomic unit of a migration plan. The statements of one step run in
/// order and together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub kind: ObjectKind,
    pub target_name: String,
    pub statements: Vec<String>,
    pub requires_deferred_fk: bool,
}

impl MigrationStep {
    pub(crate) fn new(kind: ObjectKind, target_name: impl Into<String>, statement: String) -> Self {
        MigrationStep {
            kind,
            target_name: target_name.into(),
            statements: vec![statement],
            requires_deferred_fk: false,
        }
    }

    pub(crate) fn deferring_fk(mut self) -> Self {
        self.requires_deferred_fk = true;
        self
    }
}

/// An ordered migration plan, produced by the planner and consumed once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True iff any step must run under deferred foreign-key enforcement.
    pub fn any_deferred_fk(&self) -> bool {
        self.steps.iter().any(|step| step.requires_deferred_fk)
    }
}

/// Renders the plan as an ordered statement list. With `pretty`, `-- KIND:
/// name` comments precede each step and blank lines separate kind groups;
/// without it, only executable statements are emitted, suitable for a
/// batched prepare.
pub fn render_plan(plan: &MigrationPlan, pretty: bool) -> Vec<String> {
    let mut out = Vec::new();
    let deferred = plan.any_deferred_fk();

    if deferred {
        out.push("PRAGMA defer_foreign_keys = ON".to_owned());
    }

    let mut previous_kind: Option<ObjectKind> = None;
    for step in &plan.steps {
        if pretty {
            if previous_kind.is_some_and(|kind| kind != step.kind) {
                out.push(String::new());
            }
            out.push(format!("-- {}: {}", step.kind, step.target_name));
            previous_kind = Some(step.kind);
        }
        out.extend(step.statements.iter().cloned());
    }

    if deferred {
        out.push("PRAGMA defer_foreign_keys = OFF".to_owned());
    }

    out
}

/// Renders the plan as a migration script: pretty statement list with `;`
/// terminators on executable lines.
pub fn render_script(plan: &MigrationPlan) -> String {
    if plan.is_empty() {
        return "-- This is an empty migration.\n".to_owned();
    }

    let mut script = String::new();
    for line in render_plan(plan, true) {
        if line.is_empty() || line.starts_with("--") {
            script.push_str(&line);
        } else {
            script.push_str(&line);
            script.push(';');
        }
        script.push('\n');
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_plan() -> MigrationPlan {
        MigrationPlan {
            steps: vec![
                MigrationStep::new(ObjectKind::Table, "users", "DROP TABLE users".into()),
                MigrationStep::new(ObjectKind::Table, "customers", "CREATE TABLE customers(id INTEGER)".into()),
                MigrationStep::new(ObjectKind::Index, "idx_name", "CREATE INDEX idx_name ON customers(id)".into()),
            ],
        }
    }

    #[test]
    fn plain_rendering_emits_only_executable_statements() {
        assert_eq!(
            render_plan(&sample_plan(), false),
            vec![
                "DROP TABLE users",
                "CREATE TABLE customers(id INTEGER)",
                "CREATE INDEX idx_name ON customers(id)",
            ]
        );
    }

    #[test]
    fn pretty_rendering_labels_steps_and_separates_kinds() {
        assert_eq!(
            render_plan(&sample_plan(), true),
            vec![
                "-- TABLE: users",
                "DROP TABLE users",
                "-- TABLE: customers",
                "CREATE TABLE customers(id INTEGER)",
                "",
                "-- INDEX: idx_name",
                "CREATE INDEX idx_name ON customers(id)",
            ]
        );
    }

    #[test]
    fn deferred_fk_wraps_the_whole_rendering() {
        let mut plan = sample_plan();
        plan.steps[0].requires_deferred_fk = true;

        let rendered = render_plan(&plan, false);
        assert_eq!(rendered.first().unwrap(), "PRAGMA defer_foreign_keys = ON");
        assert_eq!(rendered.last().unwrap(), "PRAGMA defer_foreign_keys = OFF");
    }

    #[test]
    fn empty_plan_renders_as_a_notice() {
        assert_eq!(render_script(&MigrationPlan::default()), "-- This is an empty migration.\n");
    }

    #[test]
    fn ident_quotes_only_when_needed() {
        assert_eq!(ident("users"), "users");
        assert_eq!(ident("_calljmp_migrations"), "_calljmp_migrations");
        assert_eq!(ident("user table"), "\"user table\"");
        assert_eq!(ident("2fa"), "\"2fa\"");
    }
}
