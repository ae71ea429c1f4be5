//! Context-aware splitting of a SQL script into individual statements.
//!
//! Semicolons only terminate a statement at the top level: never inside a
//! quoted string, a comment, a dollar-quoted section, or a `BEGIN…END` /
//! `CASE…END` compound. The execution backend owns transaction boundaries,
//! so one leading `BEGIN [TRANSACTION]` and one trailing `COMMIT` are
//! stripped; any transaction statement beyond that pair is an error.

use crate::error::{MigrateError, MigrateResult};
use crate::normalize::normalize_sql;
use once_cell::sync::Lazy;
use regex::Regex;

static TXN_BEGIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^BEGIN(\s+(DEFERRED|IMMEDIATE|EXCLUSIVE))?(\s+TRANSACTION)?$")
        .expect("regex should compile")
});

static TXN_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(COMMIT|END)(\s+TRANSACTION)?$").expect("regex should compile"));

#[derive(Debug, Clone, Copy)]
enum Block {
    Begin,
    Case,
}

/// Splits `sql` into trimmed, non-empty statements, stripping the optional
/// surrounding transaction pair.
pub fn split_statements(sql: &str) -> MigrateResult<Vec<String>> {
    let mut statements = split_raw(sql)?;

    if statements.first().is_some_and(|s| is_txn_begin(s)) {
        statements.remove(0);
    }
    if statements.last().is_some_and(|s| is_txn_end(s)) {
        statements.pop();
    }

    if let Some(stray) = statements.iter().find(|s| is_txn_begin(s) || is_txn_end(s)) {
        return Err(MigrateError::StatementSplit { statement: normalize_sql(stray) });
    }

    Ok(statements)
}

fn is_txn_begin(statement: &str) -> bool {
    TXN_BEGIN_RE.is_match(&normalize_sql(statement))
}

fn is_txn_end(statement: &str) -> bool {
    TXN_END_RE.is_match(&normalize_sql(statement))
}

fn split_raw(sql: &str) -> MigrateResult<Vec<String>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = Vec::new();
    let mut current = String::new();
    let mut blocks: Vec<Block> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => i = consume_quoted(&chars, i, &mut current)?,
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    current.push(chars[i]);
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                current.push_str("/*");
                i += 2;
                loop {
                    if i >= chars.len() {
                        return Err(MigrateError::UnterminatedBlock { construct: "block comment" });
                    }
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        current.push_str("*/");
                        i += 2;
                        break;
                    }
                    current.push(chars[i]);
                    i += 1;
                }
            }
            '$' => i = consume_maybe_dollar_quote(&chars, i, &mut current)?,
            ';' if blocks.is_empty() => {
                flush(&mut current, &mut out);
                i += 1;
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_ascii_uppercase().as_str() {
                    "BEGIN" if !begins_transaction(&chars, i) => blocks.push(Block::Begin),
                    "CASE" => blocks.push(Block::Case),
                    "END" => {
                        blocks.pop();
                    }
                    _ => {}
                }
                current.push_str(&word);
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }

    flush(&mut current, &mut out);

    if let Some(block) = blocks.last() {
        let construct = match block {
            Block::Begin => "BEGIN…END block",
            Block::Case => "CASE…END block",
        };
        return Err(MigrateError::UnterminatedBlock { construct });
    }

    Ok(out)
}

fn flush(current: &mut String, out: &mut Vec<String>) {
    let text = current.trim();
    if !text.is_empty() {
        out.push(text.to_owned());
    }
    current.clear();
}

/// Consumes a quoted run starting at `i` (the opening quote), honoring the
/// doubled-quote escape. Returns the index just past the closing quote.
fn consume_quoted(chars: &[char], i: usize, current: &mut String) -> MigrateResult<usize> {
    let quote = chars[i];
    current.push(quote);
    let mut i = i + 1;
    loop {
        if i >= chars.len() {
            return Err(MigrateError::UnterminatedString);
        }
        let c = chars[i];
        current.push(c);
        i += 1;
        if c == quote {
            if chars.get(i) == Some(&quote) {
                current.push(quote);
                i += 1;
            } else {
                return Ok(i);
            }
        }
    }
}

/// `$tag$ … $tag$` with `tag` in `[A-Za-z0-9_]*`. A lone `$` that does not
/// open a dollar quote passes through untouched.
fn consume_maybe_dollar_quote(chars: &[char], i: usize, current: &mut String) -> MigrateResult<usize> {
    let mut j = i + 1;
    while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
        j += 1;
    }

    if chars.get(j) != Some(&'$') {
        current.push('$');
        return Ok(i + 1);
    }

    let tag = &chars[i..=j];
    current.extend(tag.iter());

    let mut k = j + 1;
    loop {
        if k + tag.len() > chars.len() {
            return Err(MigrateError::UnterminatedBlock { construct: "dollar-quoted string" });
        }
        if chars[k..k + tag.len()] == *tag {
            current.extend(chars[j + 1..k + tag.len()].iter());
            return Ok(k + tag.len());
        }
        k += 1;
    }
}

/// Distinguishes `BEGIN` the transaction statement from `BEGIN` opening a
/// trigger body. `i` points just past the keyword.
fn begins_transaction(chars: &[char], i: usize) -> bool {
    let mut i = i;
    loop {
        // Skip whitespace and comments between BEGIN and whatever follows.
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if chars.get(i) == Some(&'-') && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if chars.get(i) == Some(&'/') && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            continue;
        }
        break;
    }

    match chars.get(i) {
        None => true,
        Some(&';') => true,
        Some(c) if c.is_ascii_alphabetic() => {
            let start = i;
            let mut end = i;
            while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            let word: String = chars[start..end].iter().collect();
            matches!(
                word.to_ascii_uppercase().as_str(),
                "TRANSACTION" | "DEFERRED" | "IMMEDIATE" | "EXCLUSIVE"
            )
        }
        Some(_) => false,
    }
}
