//! SQL Template Renderer
//!
//! Turns substituted view SQL into what is sent to the source:
//!
//! ```text
//! substituted SQL
//!     ↓ split_statements
//! [execute...] + [query..., last query]
//!                               ↓ QueryTemplate::for_request + column auth
//!                               ↓ format(quoting of the source dialect)
//!                          rendered query
//! ```
//!
//! Rendering reads `ExecuteParams` and never modifies it, so rendering the
//! same request twice yields the same text.

mod dialect;
mod statements;
mod template;

pub use dialect::{Dialect, Quoting};
pub use statements::{leading_keyword, split_statements, Statements};
pub use template::{AggregateFunc, QueryTemplate, SelectItem, DERIVED_TABLE_ALIAS};

use crate::error::ViewResult;
use crate::model::{DistinctParams, ExecuteParams};
use std::collections::BTreeSet;

/// Wrap `sql` with the grouping, aggregation, filters and ordering of `params`.
pub fn render_query(
    sql: &str,
    params: &ExecuteParams,
    excluded_columns: Option<&BTreeSet<String>>,
    quoting: &Quoting,
) -> ViewResult<String> {
    let rendered = QueryTemplate::for_request(sql, params, excluded_columns)?.format(quoting);
    tracing::debug!(sql = %rendered, "rendered view query");
    Ok(rendered)
}

/// Wrap `sql` as a distinct-value lookup.
pub fn render_distinct(sql: &str, distinct: &DistinctParams, quoting: &Quoting) -> ViewResult<String> {
    Ok(QueryTemplate::for_distinct(sql, distinct, quoting)?.format(quoting))
}
