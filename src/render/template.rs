//! Structured query template
//!
//! The last query of a view is wrapped as a derived table and projected,
//! filtered, grouped and ordered according to the request:
//!
//! ```text
//! SELECT <items> FROM (<view sql>) T [WHERE ..] [GROUP BY ..] [ORDER BY ..]
//! ```
//!
//! Column-level security is applied while building: any hidden column is
//! dropped from the select list, the group list and the order list.

use super::dialect::Quoting;
use crate::error::{ParseError, ViewError, ViewResult};
use crate::model::{DistinctParams, ExecuteParams, Order};
use crate::variables::quote_literal;
use std::collections::BTreeSet;

/// Alias of the wrapped view query.
pub const DERIVED_TABLE_ALIAS: &str = "T";

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Sum,
    Count,
    CountDistinct,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn parse(name: &str) -> Result<Self, ParseError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregateFunc::Sum),
            "count" => Ok(AggregateFunc::Count),
            "countdistinct" | "count_distinct" => Ok(AggregateFunc::CountDistinct),
            "avg" => Ok(AggregateFunc::Avg),
            "min" => Ok(AggregateFunc::Min),
            "max" => Ok(AggregateFunc::Max),
            other => Err(ParseError::UnsupportedAggregate(other.to_string())),
        }
    }

    fn name(self) -> &'static str {
        match self {
            AggregateFunc::Sum => "sum",
            AggregateFunc::Count => "count",
            AggregateFunc::CountDistinct => "countdistinct",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
        }
    }
}

/// One entry of the select list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectItem {
    /// Quoted column reference
    Column(String),
    /// Aggregate over a quoted column, aliased as `func(column)`
    Aggregate { func: AggregateFunc, column: String },
    /// Emitted verbatim (native queries)
    Expression(String),
}

/// Clause list of the wrapping query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTemplate {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub source_sql: String,
    /// Predicates, each already valid SQL
    pub filters: Vec<String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<Order>,
}

struct Hidden<'a>(Option<&'a BTreeSet<String>>);

impl Hidden<'_> {
    fn contains(&self, column: &str) -> bool {
        let column = column.trim();
        self.0
            .is_some_and(|hidden| hidden.iter().any(|h| h.eq_ignore_ascii_case(column)))
    }
}

impl QueryTemplate {
    /// Template for a data request. `excluded` holds hidden columns.
    pub fn for_request(
        sql: &str,
        params: &ExecuteParams,
        excluded: Option<&BTreeSet<String>>,
    ) -> ViewResult<Self> {
        let hidden = Hidden(excluded);
        let groups: Vec<String> = params
            .groups()
            .unwrap_or_default()
            .iter()
            .filter(|g| !hidden.contains(g))
            .map(|g| g.trim().to_string())
            .collect();

        let mut select: Vec<SelectItem> = groups.iter().cloned().map(SelectItem::Column).collect();
        for aggregator in params.aggregators().unwrap_or_default() {
            if hidden.contains(&aggregator.column) {
                continue;
            }
            if params.native_query {
                select.push(SelectItem::Expression(aggregator.column.trim().to_string()));
            } else {
                select.push(SelectItem::Aggregate {
                    func: AggregateFunc::parse(&aggregator.func)?,
                    column: aggregator.column.trim().to_string(),
                });
            }
        }
        if select.is_empty() {
            return Err(ViewError::Unauthorized(
                "every requested column is restricted for this user".to_string(),
            ));
        }

        let order_by = params
            .orders()
            .unwrap_or_default()
            .iter()
            .filter(|o| !hidden.contains(&o.column))
            .cloned()
            .collect();

        Ok(QueryTemplate {
            distinct: false,
            select,
            source_sql: sql.trim().to_string(),
            filters: params
                .filters()
                .unwrap_or_default()
                .iter()
                .map(|f| f.trim())
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect(),
            group_by: if params.native_query { Vec::new() } else { groups },
            order_by,
        })
    }

    /// Template for a distinct-value lookup.
    pub fn for_distinct(sql: &str, distinct: &DistinctParams, quoting: &Quoting) -> ViewResult<Self> {
        let select: Vec<SelectItem> = distinct
            .columns
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(|c| SelectItem::Column(c.to_string()))
            .collect();
        if select.is_empty() {
            return Err(ViewError::NotFound("no distinct column requested".to_string()));
        }
        let filters = distinct
            .parents
            .iter()
            .filter(|p| !p.values.is_empty())
            .map(|p| {
                let values = p.values.iter().map(|v| quote_literal(v)).collect::<Vec<_>>();
                format!("{} IN ({})", quoting.quote(&p.column), values.join(","))
            })
            .collect();
        Ok(QueryTemplate {
            distinct: true,
            select,
            source_sql: sql.trim().to_string(),
            filters,
            group_by: Vec::new(),
            order_by: Vec::new(),
        })
    }

    /// Render with the given identifier quoting.
    pub fn format(&self, quoting: &Quoting) -> String {
        let items = self
            .select
            .iter()
            .map(|item| match item {
                SelectItem::Column(c) => quoting.quote(c),
                SelectItem::Expression(e) => e.clone(),
                SelectItem::Aggregate { func, column } => {
                    let alias = quoting.quote(&format!("{}({column})", func.name()));
                    let target = quoting.quote(column);
                    match func {
                        AggregateFunc::CountDistinct => format!("COUNT(DISTINCT {target}) AS {alias}"),
                        other => format!("{}({target}) AS {alias}", other.name().to_uppercase()),
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&items);
        // A trailing line comment must not swallow the closing paren
        let close = if self.source_sql.contains("--") { "\n)" } else { ")" };
        sql.push_str(&format!(" FROM ({}{close} {DERIVED_TABLE_ALIAS}", self.source_sql));

        if !self.filters.is_empty() {
            let filters = self
                .filters
                .iter()
                .map(|f| format!("({f})"))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" WHERE {filters}"));
        }
        if !self.group_by.is_empty() {
            let groups = self.group_by.iter().map(|g| quoting.quote(g)).collect::<Vec<_>>();
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }
        if !self.order_by.is_empty() {
            let orders = self
                .order_by
                .iter()
                .map(|o| format!("{} {}", quoting.quote(&o.column), o.direction))
                .collect::<Vec<_>>();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }
        sql
    }
}
