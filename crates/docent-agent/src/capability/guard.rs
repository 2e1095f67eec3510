//! Deterministic SQL statement screening

use async_trait::async_trait;
use regex::Regex;
use std::{collections::HashSet, sync::LazyLock};
use thiserror::Error;

use super::{QueryMode, QuerySafety};
use crate::error::Result;

const READ_LEADERS: &[&str] = &["SELECT", "WITH", "EXPLAIN"];
const WRITE_LEADERS: &[&str] = &["INSERT", "UPDATE", "DELETE"];
const DDL: &[&str] = &[
    "CREATE", "ALTER", "DROP", "TRUNCATE", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX",
    "ANALYZE", "GRANT", "REVOKE",
];
const MUTATING: &[&str] = &["INSERT", "UPDATE", "DELETE", "UPSERT", "MERGE"];

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_$]*").expect("static regex"));
static REPLACE_INTO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bREPLACE\s+INTO\b").expect("static regex"));
static TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:INSERT\s+(?:OR\s+[A-Z]+\s+)?INTO|UPDATE\s+(?:OR\s+[A-Z]+\s+)?|DELETE\s+FROM)\s*([A-Z_][A-Z0-9_$.]*)",
    )
    .expect("static regex")
});
static CLAUSE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:WHERE|RETURNING|ORDER|LIMIT)\b").expect("static regex"));
static OR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bOR\b").expect("static regex"));
static AND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bAND\b").expect("static regex"));
// `col = literal`, `literal = col` or `col IN (literal, ...)`, parentheses removed
static KEY_MATCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:[A-Z_][A-Z0-9_$]*\.)?([A-Z_][A-Z0-9_$]*)\s*(?:==?\s*(?:-?\d+|'')|IN\s*(?:-?\d+|'')(?:\s*,\s*(?:-?\d+|''))*)|(?:-?\d+|'')\s*==?\s*(?:[A-Z_][A-Z0-9_$]*\.)?([A-Z_][A-Z0-9_$]*))$",
    )
    .expect("static regex")
});

/// Why the guard refused a statement
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("empty statement")]
    Empty,
    #[error("more than one statement")]
    MultipleStatements,
    #[error("SQL comments are not allowed")]
    Comment,
    #[error("unterminated string literal or quoted identifier")]
    UnterminatedLiteral,
    #[error("{0} statements are not allowed in read mode")]
    NotReadOnly(String),
    #[error("read statement contains mutating keyword {0}")]
    MutatingKeyword(String),
    #[error("{0} statements are not allowed in write mode")]
    NotAWrite(String),
    #[error("schema changes are not allowed ({0})")]
    Ddl(String),
    #[error("table {0} is not writable")]
    TableNotWritable(String),
    #[error("could not determine the target table")]
    UnknownTarget,
    #[error("{0} without a narrowing WHERE clause")]
    Unscoped(String),
}

/// Rule-based query safety. Deterministic and conservative: anything it
/// cannot classify with confidence is rejected.
#[derive(Debug, Clone)]
pub struct StatementGuard {
    writable_tables: HashSet<String>,
    key_columns: HashSet<String>,
}

impl Default for StatementGuard {
    fn default() -> Self {
        Self::with_writable_tables(["tickets"])
    }
}

impl StatementGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow writes only to the named tables
    pub fn with_writable_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            writable_tables: upper_set(tables),
            key_columns: upper_set(["ticket_id", "visitor_email"]),
        }
    }

    /// Columns an UPDATE or DELETE may narrow on. Every `OR` branch of the
    /// WHERE clause must pin one of them to literal values.
    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.key_columns = upper_set(columns);
        self
    }

    /// Check a statement, reporting the first rule it breaks.
    pub fn inspect(&self, sql: &str, mode: QueryMode) -> std::result::Result<(), Rejection> {
        let masked = mask_literals(sql)?;
        let body = masked.trim();
        let body = body.strip_suffix(';').unwrap_or(body).trim_end();
        if body.contains(';') {
            return Err(Rejection::MultipleStatements);
        }

        let normalized = body
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();
        let words: Vec<&str> = WORD.find_iter(&normalized).map(|m| m.as_str()).collect();
        let Some(&first) = words.first() else {
            return Err(Rejection::Empty);
        };

        match mode {
            QueryMode::Read => self.inspect_read(first, &words, &normalized),
            QueryMode::Write => self.inspect_write(first, &words, &normalized),
        }
    }

    fn inspect_read(
        &self,
        first: &str,
        words: &[&str],
        normalized: &str,
    ) -> std::result::Result<(), Rejection> {
        if !READ_LEADERS.contains(&first) {
            return Err(Rejection::NotReadOnly(first.to_string()));
        }
        if let Some(word) = words
            .iter()
            .find(|w| MUTATING.contains(w) || DDL.contains(w))
        {
            return Err(Rejection::MutatingKeyword(word.to_string()));
        }
        if REPLACE_INTO.is_match(normalized) {
            return Err(Rejection::MutatingKeyword("REPLACE".to_string()));
        }
        Ok(())
    }

    fn inspect_write(
        &self,
        first: &str,
        words: &[&str],
        normalized: &str,
    ) -> std::result::Result<(), Rejection> {
        if let Some(word) = words.iter().find(|w| DDL.contains(w)) {
            return Err(Rejection::Ddl(word.to_string()));
        }
        if !WRITE_LEADERS.contains(&first) {
            return Err(Rejection::NotAWrite(first.to_string()));
        }

        let target = TARGET
            .captures(normalized)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().rsplit('.').next().unwrap_or_default().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(Rejection::UnknownTarget)?;
        if !self.writable_tables.contains(&target) {
            return Err(Rejection::TableNotWritable(target.to_lowercase()));
        }

        if first != "INSERT" && !self.is_narrowed(normalized) {
            return Err(Rejection::Unscoped(first.to_string()));
        }
        Ok(())
    }

    /// Whether the statement's top-level WHERE clause can only match rows
    /// identified by key values.
    fn is_narrowed(&self, normalized: &str) -> bool {
        let Some(clause) = top_level_where(normalized) else {
            return false;
        };
        OR.split(clause).all(|branch| {
            AND.split(branch).any(|conjunct| {
                let conjunct: String = conjunct.chars().filter(|c| !matches!(c, '(' | ')')).collect();
                KEY_MATCH
                    .captures(conjunct.trim())
                    .and_then(|c| c.get(1).or_else(|| c.get(2)))
                    .is_some_and(|column| self.key_columns.contains(column.as_str()))
            })
        })
    }
}

fn upper_set<I, S>(items: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().map(|t| t.as_ref().to_uppercase()).collect()
}

/// Body of the WHERE clause outside any parentheses, up to a trailing
/// RETURNING, ORDER BY or LIMIT.
fn top_level_where(normalized: &str) -> Option<&str> {
    let mut depths = Vec::with_capacity(normalized.len() + 1);
    let mut depth = 0i32;
    for byte in normalized.bytes() {
        depths.push(depth);
        match byte {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
    }
    depths.push(depth);

    let mut top = CLAUSE_WORD
        .find_iter(normalized)
        .filter(|m| depths[m.start()] == 0);
    let start = top.find(|m| m.as_str() == "WHERE")?.end();
    let end = top.next().map_or(normalized.len(), |m| m.start());
    Some(normalized[start..end].trim())
}

#[async_trait]
impl QuerySafety for StatementGuard {
    async fn check(&self, sql: &str, mode: QueryMode) -> Result<bool> {
        match self.inspect(sql, mode) {
            Ok(()) => Ok(true),
            Err(reason) => {
                tracing::warn!(%mode, %reason, "Statement rejected: {}", sql);
                Ok(false)
            }
        }
    }
}

/// Blank out string literals and unquote identifiers so keyword and separator
/// checks only see SQL structure. Comments are refused outright.
fn mask_literals(sql: &str) -> std::result::Result<String, Rejection> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                loop {
                    match chars.next() {
                        // '' is an escaped quote inside a literal
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                        }
                        Some('\'') => break,
                        Some(_) => {}
                        None => return Err(Rejection::UnterminatedLiteral),
                    }
                }
                out.push_str("''");
            }
            '"' | '`' => {
                let close = c;
                loop {
                    match chars.next() {
                        Some(ch) if ch == close && chars.peek() == Some(&close) => {
                            chars.next();
                            out.push('_');
                        }
                        Some(ch) if ch == close => break,
                        Some(ch) if ch.is_alphanumeric() || ch == '_' => out.push(ch),
                        Some(_) => out.push('_'),
                        None => return Err(Rejection::UnterminatedLiteral),
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => return Err(Rejection::Comment),
            '/' if chars.peek() == Some(&'*') => return Err(Rejection::Comment),
            _ => out.push(c),
        }
    }

    Ok(out)
}
