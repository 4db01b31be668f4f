//! Relational executor interface
//!
//! Statement execution against a source is delegated. The engine only needs
//! to run statements, run paginated queries, and know how the source quotes
//! identifiers.

use crate::error::ViewResult;
use crate::model::{PaginateWithQueryColumns, Row, Source};
use crate::render::{Dialect, Quoting};

/// Executes SQL on one source connection.
pub trait RelationalExecutor: Send + Sync {
    /// Run a statement that returns no rows.
    fn execute(&self, sql: &str) -> ViewResult<()>;

    /// Run a query and return one page. `limit <= 0` means no row limit.
    fn query_page(
        &self,
        sql: &str,
        page_no: i64,
        page_size: i64,
        total_count: bool,
        limit: i64,
    ) -> ViewResult<PaginateWithQueryColumns>;

    /// Run a query and return up to `limit` rows (`-1` for all).
    fn query_rows(&self, sql: &str, limit: i64) -> ViewResult<Vec<Row>>;

    fn keyword_prefix(&self, url: &str) -> String {
        Dialect::from_url(url).keyword_prefix().to_string()
    }

    fn keyword_suffix(&self, url: &str) -> String {
        Dialect::from_url(url).keyword_suffix().to_string()
    }

    /// Identifier quoting for `url`.
    fn quoting(&self, url: &str) -> Quoting {
        Quoting::new(self.keyword_prefix(url), self.keyword_suffix(url))
    }
}

/// Opens executors from connection descriptors (URL, username, password).
pub trait ExecutorFactory: Send + Sync {
    fn connect(&self, source: &Source) -> ViewResult<Box<dyn RelationalExecutor>>;
}
