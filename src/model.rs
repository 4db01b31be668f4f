//! Request and Metadata Types
//!
//! Value objects threaded through a single view query. Field names follow the
//! stored JSON shapes (camelCase) so records decoded from the metadata store
//! and request bodies deserialize directly.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a declared SQL variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// End-user supplied filter value
    #[serde(rename = "query")]
    Query,
    /// Value injected by role policy (row-level security)
    #[serde(rename = "auth")]
    Authorization,
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Query => write!(f, "query"),
            VariableKind::Authorization => write!(f, "auth"),
        }
    }
}

/// A variable declared on a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableKind,
    #[serde(default)]
    pub default_values: Vec<String>,
}

impl SqlVariable {
    pub fn query(name: impl Into<String>, defaults: Vec<String>) -> Self {
        SqlVariable {
            name: name.into(),
            kind: VariableKind::Query,
            default_values: defaults,
        }
    }

    pub fn authorization(name: impl Into<String>, defaults: Vec<String>) -> Self {
        SqlVariable {
            name: name.into(),
            kind: VariableKind::Authorization,
            default_values: defaults,
        }
    }

    pub fn is_authorization(&self) -> bool {
        self.kind == VariableKind::Authorization
    }
}

/// Connection descriptor of a view's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: u64,
    pub project_id: u64,
    pub name: String,
    pub jdbc_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Stored view with its source, as loaded for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewWithSource {
    pub id: u64,
    pub project_id: u64,
    pub name: String,
    pub sql: String,
    #[serde(default)]
    pub variables: Vec<SqlVariable>,
    #[serde(default)]
    pub source: Option<Source>,
}

/// Per (role, view) authorization record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleViewGrant {
    pub role_id: u64,
    pub view_id: u64,
    /// JSON array of `{name, values[]}`
    #[serde(default)]
    pub row_auth: Option<String>,
    /// Comma separated hidden columns
    #[serde(default)]
    pub column_auth: Option<String>,
    #[serde(default)]
    pub created_by: Option<u64>,
}

/// One entry of a grant's row authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParamValue {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Requesting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: String,
}

impl User {
    pub fn new(id: u64, username: impl Into<String>) -> Self {
        User {
            id,
            username: username.into(),
        }
    }
}

/// Caller supplied query variable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

/// Aggregation over one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregator {
    pub column: String,
    pub func: String,
}

impl Aggregator {
    pub fn new(func: impl Into<String>, column: impl Into<String>) -> Self {
        Aggregator {
            column: column.into(),
            func: func.into(),
        }
    }
}

/// Sort direction of an order clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Asc => write!(f, "ASC"),
            Direction::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Shape of the desired result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteParams {
    pub groups: Vec<String>,
    pub aggregators: Vec<Aggregator>,
    pub orders: Vec<Order>,
    /// Raw SQL predicates, joined with AND
    pub filters: Vec<String>,
    pub params: Vec<Param>,
    pub native_query: bool,
    pub page_no: i64,
    pub page_size: i64,
    pub limit: i64,
    pub total_count: bool,
    pub cache: bool,
    /// Cache expiry in seconds
    pub expired: u64,
}

impl ExecuteParams {
    /// Groups, with an empty list normalized to `None`.
    pub fn groups(&self) -> Option<&[String]> {
        non_empty(&self.groups)
    }

    pub fn aggregators(&self) -> Option<&[Aggregator]> {
        non_empty(&self.aggregators)
    }

    pub fn filters(&self) -> Option<&[String]> {
        non_empty(&self.filters)
    }

    pub fn orders(&self) -> Option<&[Order]> {
        non_empty(&self.orders)
    }

    /// Nothing to select: the request is answered without touching a source.
    pub fn is_empty_projection(&self) -> bool {
        self.groups().is_none() && self.aggregators().is_none()
    }

    /// Caching applies only when enabled with a positive expiry.
    pub fn wants_cache(&self) -> bool {
        self.cache && self.expired > 0
    }
}

fn non_empty<T>(items: &[T]) -> Option<&[T]> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Parent filter of a distinct-value lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentFilter {
    pub column: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Distinct values of some columns, optionally narrowed by parent selections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistinctParams {
    pub columns: Vec<String>,
    pub parents: Vec<ParentFilter>,
}

/// Interactive SQL run from the view editor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewExecuteSql {
    pub source_id: u64,
    pub sql: String,
    pub variables: Vec<SqlVariable>,
    pub limit: i64,
}

/// Role grant as submitted with a saved view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleGrantRequest {
    pub role_id: u64,
    pub row_auth: Option<String>,
    pub column_auth: Option<String>,
}

/// Result column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl QueryColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        QueryColumn {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A result row: column name to value.
pub type Row = BTreeMap<String, JsonValue>;

/// Paginated query result. Also the cached payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginateWithQueryColumns {
    pub result_list: Vec<Row>,
    pub columns: Vec<QueryColumn>,
    pub page_no: i64,
    pub page_size: i64,
    #[serde(default)]
    pub total_count: Option<u64>,
}

impl PaginateWithQueryColumns {
    pub fn is_empty(&self) -> bool {
        self.result_list.is_empty()
    }
}
