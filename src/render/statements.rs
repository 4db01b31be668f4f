//! Statement splitting
//!
//! Splits substituted SQL on `;` (outside literals, quoted identifiers and
//! comments) and sorts the pieces into executable statements and queries.
//! `--` comments are stripped so a statement can be embedded in a wrapper.

/// Leading keywords of statements that return rows.
const QUERY_KEYWORDS: &[&str] = &["select", "with", "show", "desc", "describe", "explain", "values"];

/// Statements of one view, in source order within each list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statements {
    /// Setup statements (DDL/DML, session settings)
    pub execute: Vec<String>,
    /// Row-returning statements; only the last one is wrapped
    pub query: Vec<String>,
}

impl Statements {
    pub fn last_query(&self) -> Option<&str> {
        self.query.last().map(String::as_str)
    }
}

/// Split and classify.
pub fn split_statements(sql: &str) -> Statements {
    let mut statements = Statements::default();
    for statement in split(sql) {
        if is_query(&statement) {
            statements.query.push(statement);
        } else {
            statements.execute.push(statement);
        }
    }
    statements
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

fn split(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut state = State::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                ';' => {
                    push_statement(&mut out, &mut current);
                    continue;
                }
                '\'' | '"' | '`' => state = State::Quoted(c),
                '-' if chars.peek() == Some(&'-') => {
                    // Line comments are dropped; the statement may be wrapped
                    state = State::LineComment;
                    continue;
                }
                '/' if chars.peek() == Some(&'*') => {
                    current.push(c);
                    if let Some(star) = chars.next() {
                        current.push(star);
                    }
                    state = State::BlockComment;
                    continue;
                }
                _ => {}
            },
            State::Quoted(q) if c == q => {
                // A doubled quote stays inside the literal
                if chars.peek() == Some(&q) {
                    current.push(c);
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    continue;
                }
                state = State::Code;
            }
            State::LineComment if c == '\n' => state = State::Code,
            State::LineComment => continue,
            State::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                current.push(c);
                if let Some(slash) = chars.next() {
                    current.push(slash);
                }
                state = State::Code;
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    push_statement(&mut out, &mut current);
    out
}

fn push_statement(out: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() && !leading_keyword(statement).is_empty() {
        out.push(statement.to_string());
    }
    current.clear();
}

/// First keyword of a statement, lowercased, skipping comments and parens.
pub fn leading_keyword(statement: &str) -> String {
    let mut rest = statement;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            rest = trimmed;
            break;
        }
    }
    rest.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_lowercase()
}

fn is_query(statement: &str) -> bool {
    QUERY_KEYWORDS.contains(&leading_keyword(statement).as_str())
}
