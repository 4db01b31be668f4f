//! Variable Resolver
//!
//! Parses `$name$` placeholders out of a view's SQL template and substitutes
//! resolved values back in.
//!
//! ## Template syntax
//!
//! - `delim + name + delim` is a placeholder, `name` is `[A-Za-z0-9_]+`
//! - a doubled delimiter (`$$`) is a literal delimiter
//! - delimiters inside single-quoted literals and comments are literal text
//! - placeholders that name no declared variable stay as written
//!
//! ## Authorization placeholders
//!
//! An authorization placeholder expands to a predicate. When it is the right
//! operand of `=`, `!=`, `<>`, `IN` or `NOT IN` the whole comparison is
//! rewritten, otherwise the variable name is used as the column:
//!
//! ```text
//! region = $region$        ->  region IN ('east','west')
//! $dept$                   ->  dept IN ('sales')
//! (no authorization)       ->  1=1
//! (nothing allowed)        ->  1=0
//! ```

use crate::error::ParseError;
use crate::model::{Param, SqlVariable, VariableKind};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::iter::Peekable;
use std::str::CharIndices;
use std::sync::OnceLock;

/// Predicate used when authorization does not restrict rows.
pub const ALLOW_ALL: &str = "1=1";
/// Predicate used when no value is authorized.
pub const DENY_ALL: &str = "1=0";

/// A piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Placeholder { name: String, kind: VariableKind },
}

/// Working unit threaded through the query pipeline.
///
/// `auth_params` is `None` when rows are unrestricted. Once set it holds an
/// entry for every authorization variable the template references; a missing
/// or empty entry denies every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSqlEntity {
    pub segments: Vec<Segment>,
    pub query_params: HashMap<String, String>,
    pub auth_params: Option<HashMap<String, Vec<String>>>,
}

impl ParsedSqlEntity {
    /// True when the template has no executable text at all.
    pub fn is_blank(&self) -> bool {
        self.segments.iter().all(|s| match s {
            Segment::Text(t) => t.trim().is_empty(),
            Segment::Placeholder { .. } => false,
        })
    }

    /// Names of the authorization variables referenced by the template.
    pub fn authorization_variables(&self) -> BTreeSet<&str> {
        self.placeholders(VariableKind::Authorization)
    }

    /// Names of the query variables referenced by the template.
    pub fn query_variables(&self) -> BTreeSet<&str> {
        self.placeholders(VariableKind::Query)
    }

    fn placeholders(&self, wanted: VariableKind) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder { name, kind } if *kind == wanted => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Overlay caller supplied values on the parsed defaults.
    ///
    /// Values aimed at authorization variables are ignored: those are decided
    /// by role policy only.
    pub fn merge_query_params(&mut self, params: &[Param]) {
        let protected = self
            .authorization_variables()
            .into_iter()
            .map(str::to_string)
            .collect::<BTreeSet<_>>();
        for param in params {
            let name = param.name.trim();
            if protected.contains(name) {
                tracing::warn!(variable = name, "ignoring caller value for authorization variable");
                continue;
            }
            self.query_params.insert(name.to_string(), param.value.clone());
        }
    }
}

/// Validate a configured delimiter and return it as a char.
pub fn delimiter_char(delimiter: &str) -> Result<char, ParseError> {
    let mut chars = delimiter.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !is_name_char(c) && c != '\'' && !c.is_whitespace() => Ok(c),
        _ => Err(ParseError::InvalidDelimiter(delimiter.to_string())),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parse a SQL template against the view's declared variables.
///
/// Query variables are seeded with their declared defaults joined by `,`.
pub fn parse(
    sql: &str,
    variables: &[SqlVariable],
    delimiter: char,
) -> Result<ParsedSqlEntity, ParseError> {
    let declared: HashMap<&str, &SqlVariable> =
        variables.iter().map(|v| (v.name.trim(), v)).collect();

    let mut segments = Vec::new();
    let mut text = String::new();
    let mut chars = sql.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '\'' => {
                text.push(c);
                copy_literal(&mut chars, &mut text, pos)?;
            }
            '-' if next_is(&mut chars, '-') => {
                text.push(c);
                copy_until(&mut chars, &mut text, |c, _| c == '\n');
            }
            '/' if next_is(&mut chars, '*') => {
                text.push(c);
                copy_until(&mut chars, &mut text, |c, prev| prev == Some('*') && c == '/');
            }
            c if c == delimiter => {
                if next_is(&mut chars, delimiter) {
                    chars.next();
                    text.push(delimiter);
                    continue;
                }
                let mut name = String::new();
                while let Some(&(_, n)) = chars.peek() {
                    if !is_name_char(n) {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                match chars.peek() {
                    Some(&(_, n)) if n == delimiter && !name.is_empty() => {
                        chars.next();
                        if let Some(var) = declared.get(name.as_str()) {
                            if !text.is_empty() {
                                segments.push(Segment::Text(std::mem::take(&mut text)));
                            }
                            segments.push(Segment::Placeholder {
                                name,
                                kind: var.kind,
                            });
                        } else {
                            text.push(delimiter);
                            text.push_str(&name);
                            text.push(delimiter);
                        }
                    }
                    None if declared.contains_key(name.as_str()) => {
                        return Err(ParseError::UnterminatedPlaceholder {
                            name,
                            position: pos,
                        });
                    }
                    _ => {
                        text.push(delimiter);
                        text.push_str(&name);
                    }
                }
            }
            c => text.push(c),
        }
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    let query_params = variables
        .iter()
        .filter(|v| v.kind == VariableKind::Query)
        .map(|v| (v.name.trim().to_string(), v.default_values.join(",")))
        .collect();

    Ok(ParsedSqlEntity {
        segments,
        query_params,
        auth_params: None,
    })
}

fn next_is(chars: &mut Peekable<CharIndices<'_>>, expected: char) -> bool {
    chars.peek().is_some_and(|&(_, c)| c == expected)
}

fn copy_literal(
    chars: &mut Peekable<CharIndices<'_>>,
    out: &mut String,
    start: usize,
) -> Result<(), ParseError> {
    while let Some((_, c)) = chars.next() {
        out.push(c);
        if c == '\'' {
            // '' is an escaped quote inside the literal
            if next_is(chars, '\'') {
                chars.next();
                out.push('\'');
                continue;
            }
            return Ok(());
        }
    }
    Err(ParseError::UnterminatedLiteral { position: start })
}

fn copy_until(
    chars: &mut Peekable<CharIndices<'_>>,
    out: &mut String,
    done: impl Fn(char, Option<char>) -> bool,
) {
    let mut prev = None;
    // The opening marker's second char is consumed here so `/*/` does not close.
    if let Some((_, c)) = chars.next() {
        out.push(c);
        if done(c, prev) {
            return;
        }
    }
    while let Some((_, c)) = chars.next() {
        out.push(c);
        if done(c, prev) {
            return;
        }
        prev = Some(c);
    }
}

/// Render the template with every placeholder resolved.
pub fn substitute(entity: &ParsedSqlEntity) -> String {
    let mut out = String::new();
    let mut close_paren = false;

    for segment in &entity.segments {
        match segment {
            Segment::Text(text) => {
                let mut text = text.as_str();
                if close_paren {
                    let trimmed = text.trim_start();
                    if let Some(rest) = trimmed.strip_prefix(')') {
                        text = rest;
                    }
                    close_paren = false;
                }
                out.push_str(text);
            }
            Segment::Placeholder {
                name,
                kind: VariableKind::Query,
            } => {
                if let Some(value) = entity.query_params.get(name) {
                    out.push_str(value);
                }
            }
            Segment::Placeholder {
                name,
                kind: VariableKind::Authorization,
            } => {
                let (column, negated) = match comparison_tail(&out) {
                    Some(tail) => {
                        close_paren = tail.opened_paren;
                        out.truncate(tail.start);
                        (tail.column, tail.negated)
                    }
                    None => (name.clone(), false),
                };
                let allowed = entity
                    .auth_params
                    .as_ref()
                    .map(|auth| auth.get(name).map(Vec::as_slice).unwrap_or_default());
                out.push_str(&auth_predicate(&column, negated, allowed));
            }
        }
    }
    out
}

/// Predicate for one authorization placeholder.
///
/// `allowed` is `None` when rows are unrestricted.
pub fn auth_predicate(column: &str, negated: bool, allowed: Option<&[String]>) -> String {
    match allowed {
        None => ALLOW_ALL.to_string(),
        Some([]) => DENY_ALL.to_string(),
        Some(values) => {
            let list = values
                .iter()
                .map(|v| quote_literal(v))
                .collect::<Vec<_>>()
                .join(",");
            let op = if negated { "NOT IN" } else { "IN" };
            format!("{column} {op} ({list})")
        }
    }
}

/// Single-quote a value for SQL, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

struct ComparisonTail {
    start: usize,
    column: String,
    negated: bool,
    opened_paren: bool,
}

fn comparison_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([A-Za-z_][A-Za-z0-9_.]*)\s*(=|!=|<>|\bnot\s+in\b|\bin\b)\s*(\()?\s*$")
            .expect("comparison pattern is valid")
    })
}

fn comparison_tail(out: &str) -> Option<ComparisonTail> {
    let caps = comparison_regex().captures(out)?;
    let whole = caps.get(0)?;
    let op = caps.get(2)?.as_str().to_ascii_lowercase();
    Some(ComparisonTail {
        start: whole.start(),
        column: caps.get(1)?.as_str().to_string(),
        negated: op == "!=" || op == "<>" || op.starts_with("not"),
        opened_paren: caps.get(3).is_some(),
    })
}
