//! Query Orchestrator
//!
//! `ViewService` sequences a view request end to end:
//!
//! ```text
//! load view ─▶ permission ─▶ parse template ─▶ grants ─▶ row/column auth
//!     ─▶ merge caller params ─▶ fetch auth values ─▶ substitute ─▶ split
//!     ─▶ setup statements ─▶ render last query ─▶ cache ─▶ paginated query
//! ```
//!
//! Every collaborator is reached through a trait object, so the service owns
//! no storage of its own apart from the cache store and the name registry.

mod names;

pub use names::{NameRegistry, NameReservation};

use crate::authorization::{resolve_column_auth, resolve_row_auth, ProjectDetail};
use crate::config::Config;
use crate::error::{ParseError, ViewError, ViewResult};
use crate::execution::{signature, CacheStore, MemoryCacheStore, ResultCache, WaitGuard};
use crate::executor::{ExecutorFactory, RelationalExecutor};
use crate::fetcher::{AuthValueFetcher, AuthValueSource, DeclaredDefaults};
use crate::grants::{build_grants, GrantJob, GrantWriter};
use crate::model::{
    DistinctParams, ExecuteParams, PaginateWithQueryColumns, Param, RoleGrantRequest, Row,
    SqlVariable, User, ViewExecuteSql, ViewWithSource,
};
use crate::render::{render_distinct, render_query, split_statements, Statements};
use crate::store::{GrantStore, ProjectDirectory, ViewStore};
use crate::variables::{self, ParsedSqlEntity};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// External systems the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub views: Arc<dyn ViewStore>,
    pub grants: Arc<dyn GrantStore>,
    pub projects: Arc<dyn ProjectDirectory>,
    pub executors: Arc<dyn ExecutorFactory>,
}

/// Authorization applied to one request.
struct Authorized {
    entity: ParsedSqlEntity,
    excluded_columns: Option<BTreeSet<String>>,
}

pub struct ViewService {
    deps: Collaborators,
    auth_values: Arc<dyn AuthValueSource>,
    cache: Option<ResultCache>,
    fetcher: AuthValueFetcher,
    names: NameRegistry,
    grant_writer: GrantWriter,
    delimiter: char,
    config: Config,
}

impl ViewService {
    /// Build a service. With caching enabled an in-process store sized by
    /// `cache.max_entries` is used until `with_cache_store` replaces it.
    pub fn new(config: Config, deps: Collaborators) -> ViewResult<Self> {
        let delimiter = variables::delimiter_char(&config.view.sql_template_delimiter)?;
        let cache = config.cache.enabled.then(|| {
            let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new(config.cache.max_entries));
            ResultCache::new(store)
        });
        let grant_writer = GrantWriter::new(Arc::clone(&deps.grants))?;
        tracing::info!(
            delimiter = %delimiter,
            fetch_workers = config.fetch.workers,
            cache = config.cache.enabled,
            "view service ready"
        );
        Ok(ViewService {
            auth_values: Arc::new(DeclaredDefaults),
            cache,
            fetcher: AuthValueFetcher::new(config.fetch.workers),
            names: NameRegistry::new(),
            grant_writer,
            delimiter,
            deps,
            config,
        })
    }

    /// Replace where authorization values without a grant come from.
    pub fn with_auth_values(mut self, source: Arc<dyn AuthValueSource>) -> Self {
        self.auth_values = source;
        self
    }

    /// Replace the cache store. Ignored when caching is disabled.
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        if self.config.cache.enabled {
            self.cache = Some(ResultCache::new(store));
        }
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Guard for one authorization fetch, bounded by `fetch.timeout_ms`.
    pub fn wait_guard(&self) -> WaitGuard {
        WaitGuard::from_millis(self.config.fetch.timeout_ms)
    }

    // ── Data ────────────────────────────────────────────────────────────────

    /// Aggregated data of a view. `None` when nothing is selected.
    pub fn get_data(
        &self,
        view_id: u64,
        params: &ExecuteParams,
        user: &User,
    ) -> ViewResult<Option<PaginateWithQueryColumns>> {
        self.get_data_with_guard(view_id, params, user, &self.wait_guard())
    }

    /// `get_data` with a caller-controlled guard for the authorization fetch.
    pub fn get_data_with_guard(
        &self,
        view_id: u64,
        params: &ExecuteParams,
        user: &User,
        guard: &WaitGuard,
    ) -> ViewResult<Option<PaginateWithQueryColumns>> {
        if params.is_empty_projection() {
            return Ok(None);
        }

        let view = self.load_view(view_id)?;
        let project = self.readable_project(&view, user, "you have not permission to get data")?;
        let is_maintainer = self.deps.projects.is_maintainer(&project, user)?;

        self.get_result_data_list(is_maintainer, &view, params, user, guard)
            .map(Some)
    }

    /// Run the full pipeline for an already loaded and permitted view.
    pub fn get_result_data_list(
        &self,
        is_maintainer: bool,
        view: &ViewWithSource,
        params: &ExecuteParams,
        user: &User,
        guard: &WaitGuard,
    ) -> ViewResult<PaginateWithQueryColumns> {
        let empty = || PaginateWithQueryColumns {
            page_no: params.page_no,
            page_size: params.page_size,
            ..Default::default()
        };
        if params.is_empty_projection() {
            return Ok(empty());
        }
        let source = view
            .source
            .as_ref()
            .ok_or_else(|| ViewError::NotFound("source is not found".to_string()))?;
        if view.sql.trim().is_empty() {
            return Ok(empty());
        }

        let authorized = self.authorize(view, &params.params, user, is_maintainer, guard)?;
        let statements = split_statements(&variables::substitute(&authorized.entity));
        let Some(last) = statements.last_query() else {
            return Ok(empty());
        };

        let executor = self.deps.executors.connect(source)?;
        run_setup(executor.as_ref(), &statements)?;

        let quoting = executor.quoting(&source.jdbc_url);
        let sql = render_query(last, params, authorized.excluded_columns.as_ref(), &quoting)?;

        let cache = self.cache.as_ref().filter(|_| params.wants_cache());
        let cache_key = cache.map(|_| signature(params.page_no, params.limit, params.page_size, &sql));
        if let (Some(cache), Some(key)) = (cache, cache_key.as_deref()) {
            if let Some(hit) = cache.get(key) {
                return Ok(hit);
            }
        }

        let result = executor
            .query_page(&sql, params.page_no, params.page_size, params.total_count, params.limit)
            .map_err(into_execution)?;
        tracing::info!(
            view_id = view.id,
            rows = result.result_list.len(),
            "view data fetched"
        );

        if let (Some(cache), Some(key)) = (cache, cache_key.as_deref()) {
            cache.put(key, &result, params.expired);
        }
        Ok(result)
    }

    /// Distinct values of columns, narrowed by parent filters.
    pub fn get_distinct_value(
        &self,
        view_id: u64,
        distinct: &DistinctParams,
        user: &User,
    ) -> ViewResult<Vec<Row>> {
        let view = self.load_view(view_id)?;
        let project = self.readable_project(&view, user, "you have not permission to get data")?;
        let is_maintainer = self.deps.projects.is_maintainer(&project, user)?;
        let source = view
            .source
            .as_ref()
            .ok_or_else(|| ViewError::NotFound("source is not found".to_string()))?;
        if view.sql.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut authorized = self.authorize(&view, &[], user, is_maintainer, &self.wait_guard())?;
        // Distinct lookups carry row authorization only
        authorized.excluded_columns = None;
        let statements = split_statements(&variables::substitute(&authorized.entity));
        let Some(last) = statements.last_query() else {
            return Ok(Vec::new());
        };

        let executor = self.deps.executors.connect(source)?;
        run_setup(executor.as_ref(), &statements)?;
        let sql = render_distinct(last, distinct, &executor.quoting(&source.jdbc_url))?;
        executor.query_rows(&sql, -1).map_err(into_execution)
    }

    /// Run ad hoc SQL from a view editor against a source.
    ///
    /// No row authorization is applied. Every query statement runs with the
    /// given limit and the last result is returned.
    pub fn execute_sql(&self, adhoc: &ViewExecuteSql, user: &User) -> ViewResult<PaginateWithQueryColumns> {
        let source = self
            .deps
            .views
            .source(adhoc.source_id)?
            .ok_or_else(|| ViewError::NotFound("source is not found".to_string()))?;

        let project = self.deps.projects.project_detail(source.project_id, user)?;
        let permission = self.deps.projects.permission(&project, user)?;
        if !permission.can_execute_sql() {
            return Err(ViewError::Unauthorized(
                "you have not permission to execute sql".to_string(),
            ));
        }

        let entity = self.parse(&adhoc.sql, &adhoc.variables)?;
        let statements = split_statements(&variables::substitute(&entity));
        let executor = self.deps.executors.connect(&source)?;
        run_setup(executor.as_ref(), &statements)?;

        let mut result = PaginateWithQueryColumns::default();
        for query in &statements.query {
            result = executor
                .query_page(query, 0, 0, false, adhoc.limit)
                .map_err(into_execution)?;
        }
        tracing::info!(source_id = source.id, user_id = user.id, "ad hoc sql executed");
        Ok(result)
    }

    // ── Names and grants ────────────────────────────────────────────────────

    /// Whether `name` is used in the project by a view other than `id`.
    pub fn is_exist(&self, name: &str, id: Option<u64>, project_id: u64) -> ViewResult<bool> {
        self.names
            .is_exist(self.deps.views.as_ref(), name, id, project_id)
    }

    /// Claim `name` for a create (`id = None`) or rename of view `id`.
    pub fn reserve_name(&self, name: &str, id: Option<u64>, project_id: u64) -> ViewResult<NameReservation> {
        self.names
            .reserve(self.deps.views.as_ref(), name, id, project_id)
    }

    /// Persist role grants of a saved view in the background.
    ///
    /// `variables_json` is the view's declared variables as stored. Roles
    /// whose row authorization names none of them are skipped.
    pub fn save_role_grants(
        &self,
        view_id: u64,
        variables_json: &str,
        roles: &[RoleGrantRequest],
        user: &User,
    ) -> ViewResult<GrantJob> {
        let declared: Vec<SqlVariable> = if variables_json.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(variables_json)
                .map_err(|e| ParseError::InvalidVariables(e.to_string()))?
        };
        let grants = build_grants(view_id, &declared, roles, user);
        self.grant_writer.submit(view_id, grants)
    }

    // ── Pipeline steps ──────────────────────────────────────────────────────

    fn load_view(&self, view_id: u64) -> ViewResult<ViewWithSource> {
        self.deps.views.view_with_source(view_id)?.ok_or_else(|| {
            tracing::info!(view_id, "view not found");
            ViewError::NotFound("view is not found".to_string())
        })
    }

    fn readable_project(&self, view: &ViewWithSource, user: &User, denied: &str) -> ViewResult<ProjectDetail> {
        let project = self.deps.projects.project_detail(view.project_id, user)?;
        if !self.deps.projects.allow_get_data(&project, user)? {
            return Err(ViewError::Unauthorized(denied.to_string()));
        }
        Ok(project)
    }

    fn parse(&self, sql: &str, declared: &[SqlVariable]) -> ViewResult<ParsedSqlEntity> {
        let limit = self.config.view.max_sql_bytes;
        if limit > 0 && sql.len() > limit {
            return Err(ParseError::TooLarge {
                size: sql.len(),
                limit,
            }
            .into());
        }
        Ok(variables::parse(sql, declared, self.delimiter)?)
    }

    /// Parse the view and attach row and column authorization for `user`.
    fn authorize(
        &self,
        view: &ViewWithSource,
        caller_params: &[Param],
        user: &User,
        is_maintainer: bool,
        guard: &WaitGuard,
    ) -> ViewResult<Authorized> {
        let mut entity = self.parse(&view.sql, &view.variables)?;
        entity.merge_query_params(caller_params);

        if is_maintainer {
            entity.auth_params = None;
            return Ok(Authorized {
                entity,
                excluded_columns: None,
            });
        }

        let grants = self.deps.grants.grants_for(user.id, view.id)?;
        let excluded_columns = resolve_column_auth(&grants);
        if grants.is_empty() {
            entity.auth_params = None;
            return Ok(Authorized {
                entity,
                excluded_columns,
            });
        }

        let referenced: BTreeSet<String> = entity
            .authorization_variables()
            .into_iter()
            .map(str::to_string)
            .collect();
        let granted = resolve_row_auth(&grants, &view.variables);

        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for variable in granted {
            if referenced.contains(&variable.name) {
                values.insert(variable.name, variable.default_values);
            }
        }
        let unresolved: Vec<SqlVariable> = view
            .variables
            .iter()
            .filter(|v| v.is_authorization())
            .filter(|v| referenced.contains(v.name.trim()) && !values.contains_key(v.name.trim()))
            .cloned()
            .collect();

        if !unresolved.is_empty() {
            let outcome = self
                .fetcher
                .resolve(&unresolved, Arc::clone(&self.auth_values), guard);
            let complete = outcome.is_complete();
            let fetched = outcome.into_values();
            if complete {
                values.extend(fetched);
            } else {
                // Partial answers are not trusted
                values.clear();
            }
        }
        for name in referenced {
            values.entry(name).or_default();
        }
        entity.auth_params = Some(values);

        Ok(Authorized {
            entity,
            excluded_columns,
        })
    }
}

fn run_setup(executor: &dyn RelationalExecutor, statements: &Statements) -> ViewResult<()> {
    for sql in &statements.execute {
        executor.execute(sql).map_err(into_execution)?;
    }
    Ok(())
}

fn into_execution(e: ViewError) -> ViewError {
    match e {
        ViewError::Execution(_) => e,
        other => ViewError::Execution(other.to_string()),
    }
}
