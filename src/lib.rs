//! # viewquery
//!
//! Execution engine for stored, parameterized SQL views with per-role row and
//! column restrictions.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! View SQL template + declared variables
//!     ↓
//! [Variable Resolver]        → ParsedSqlEntity (segments, query params)
//!     ↓
//! [Authorization Resolver]   → row values per variable, hidden columns
//!     ↓
//! [Auth-Value Fetcher]       → values for variables no grant supplies
//!     ↓
//! substitute + split         → setup statements, last query
//!     ↓
//! [Template Renderer]        → wrapped, grouped, dialect-quoted SQL
//!     ↓
//! [Result Cache]  ──hit──▶ cached page
//!     ↓ miss
//! Relational executor        → PaginateWithQueryColumns
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use viewquery::{Collaborators, Config, ExecuteParams, User, ViewService};
//!
//! let service = ViewService::new(Config::load()?, Collaborators {
//!     views, grants, projects, executors,
//! })?;
//!
//! let params: ExecuteParams = serde_json::from_str(
//!     r#"{"groups":["region"],"aggregators":[{"column":"*","func":"count"}]}"#,
//! )?;
//! let page = service.get_data(view_id, &params, &User::new(7, "alice"))?;
//! ```

// Core data model and errors
pub mod error;
pub mod model;

// Pipeline stages
pub mod authorization;
pub mod fetcher;
pub mod render;
pub mod variables;

// Collaborator interfaces
pub mod executor;
pub mod store;

pub mod config; // Configuration system
pub mod execution; // Result cache, cancellation
pub mod grants; // Background grant writer
pub mod logging;
pub mod service;

pub use authorization::{PermissionLevel, ProjectDetail, ProjectPermission};
pub use config::Config;
pub use error::{ParseError, ViewError, ViewResult};
pub use execution::{CacheStore, MemoryCacheStore, ResultCache, WaitGuard};
pub use executor::{ExecutorFactory, RelationalExecutor};
pub use fetcher::{AuthValueFetcher, AuthValueSource, DeclaredDefaults, FetchOutcome};
pub use grants::{GrantJob, GrantWriter};
pub use model::{
    Aggregator, DistinctParams, ExecuteParams, PaginateWithQueryColumns, Param, RoleGrantRequest,
    RoleViewGrant, Row, Source, SqlVariable, User, VariableKind, ViewExecuteSql, ViewWithSource,
};
pub use service::{Collaborators, NameReservation, ViewService};
pub use store::{GrantStore, ProjectDirectory, ViewStore};
pub use variables::ParsedSqlEntity;
