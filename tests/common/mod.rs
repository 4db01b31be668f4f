//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use viewquery::authorization::{PermissionLevel, ProjectDetail, ProjectPermission};
use viewquery::model::QueryColumn;
use viewquery::{
    Collaborators, Config, ExecutorFactory, GrantStore, PaginateWithQueryColumns,
    ProjectDirectory, RelationalExecutor, RoleViewGrant, Row, Source, SqlVariable, User,
    ViewError, ViewResult, ViewService, ViewStore, ViewWithSource,
};

pub const PROJECT_ID: u64 = 1;
pub const MYSQL_URL: &str = "jdbc:mysql://localhost:3306/sales";

/// Everything the service reaches outside itself, in memory.
pub struct Backend {
    pub views: Mutex<HashMap<u64, ViewWithSource>>,
    /// (user id, grant)
    pub grants: Mutex<Vec<(u64, RoleViewGrant)>>,
    pub inserted: Mutex<Vec<RoleViewGrant>>,
    pub maintainers: Mutex<HashSet<u64>>,
    pub readers_denied: Mutex<HashSet<u64>>,
    pub permission: Mutex<ProjectPermission>,
    /// Every statement the executor saw, in order
    pub executed: Mutex<Vec<String>>,
    pub queries: AtomicUsize,
    pub store_calls: AtomicUsize,
    /// Statements containing this text fail
    pub fail_on: Mutex<Option<String>>,
    pub rows: Mutex<Vec<Row>>,
    /// Delay of name lookups, to widen race windows
    pub lookup_delay: Mutex<Duration>,
}

impl Default for Backend {
    fn default() -> Self {
        Backend {
            views: Mutex::new(HashMap::new()),
            grants: Mutex::new(Vec::new()),
            inserted: Mutex::new(Vec::new()),
            maintainers: Mutex::new(HashSet::new()),
            readers_denied: Mutex::new(HashSet::new()),
            permission: Mutex::new(ProjectPermission {
                view_permission: PermissionLevel::Write,
                source_permission: PermissionLevel::Read,
            }),
            executed: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            store_calls: AtomicUsize::new(0),
            fail_on: Mutex::new(None),
            rows: Mutex::new(vec![sample_row()]),
            lookup_delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl Backend {
    pub fn new() -> Arc<Self> {
        Arc::new(Backend::default())
    }

    pub fn add_view(&self, view: ViewWithSource) {
        self.views.lock().insert(view.id, view);
    }

    pub fn grant(&self, user_id: u64, grant: RoleViewGrant) {
        self.grants.lock().push((user_id, grant));
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn last_query(&self) -> String {
        self.executed.lock().last().cloned().unwrap_or_default()
    }

    fn check(&self, sql: &str) -> ViewResult<()> {
        self.executed.lock().push(sql.to_string());
        match self.fail_on.lock().as_deref() {
            Some(marker) if sql.contains(marker) => {
                Err(ViewError::Execution(format!("statement rejected: {sql}")))
            }
            _ => Ok(()),
        }
    }
}

impl ViewStore for Backend {
    fn view_with_source(&self, view_id: u64) -> ViewResult<Option<ViewWithSource>> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.views.lock().get(&view_id).cloned())
    }

    fn view_id_by_name(&self, name: &str, project_id: u64) -> ViewResult<Option<u64>> {
        let delay = *self.lookup_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(self
            .views
            .lock()
            .values()
            .find(|v| v.name == name && v.project_id == project_id)
            .map(|v| v.id))
    }

    fn source(&self, source_id: u64) -> ViewResult<Option<Source>> {
        Ok(self
            .views
            .lock()
            .values()
            .filter_map(|v| v.source.clone())
            .find(|s| s.id == source_id))
    }
}

impl GrantStore for Backend {
    fn grants_for(&self, user_id: u64, view_id: u64) -> ViewResult<Vec<RoleViewGrant>> {
        Ok(self
            .grants
            .lock()
            .iter()
            .filter(|(u, g)| *u == user_id && g.view_id == view_id)
            .map(|(_, g)| g.clone())
            .collect())
    }

    fn insert_batch(&self, grants: &[RoleViewGrant]) -> ViewResult<usize> {
        self.inserted.lock().extend_from_slice(grants);
        Ok(grants.len())
    }
}

impl ProjectDirectory for Backend {
    fn project_detail(&self, project_id: u64, _user: &User) -> ViewResult<ProjectDetail> {
        Ok(ProjectDetail {
            id: project_id,
            name: "analytics".to_string(),
            owner_id: 1,
        })
    }

    fn permission(&self, _project: &ProjectDetail, _user: &User) -> ViewResult<ProjectPermission> {
        Ok(*self.permission.lock())
    }

    fn allow_get_data(&self, _project: &ProjectDetail, user: &User) -> ViewResult<bool> {
        Ok(!self.readers_denied.lock().contains(&user.id))
    }

    fn is_maintainer(&self, _project: &ProjectDetail, user: &User) -> ViewResult<bool> {
        Ok(self.maintainers.lock().contains(&user.id))
    }
}

pub struct MemoryExecutor(Arc<Backend>);

impl RelationalExecutor for MemoryExecutor {
    fn execute(&self, sql: &str) -> ViewResult<()> {
        self.0.check(sql)
    }

    fn query_page(
        &self,
        sql: &str,
        page_no: i64,
        page_size: i64,
        total_count: bool,
        _limit: i64,
    ) -> ViewResult<PaginateWithQueryColumns> {
        self.0.check(sql)?;
        self.0.queries.fetch_add(1, Ordering::SeqCst);
        let rows = self.0.rows.lock().clone();
        Ok(PaginateWithQueryColumns {
            total_count: total_count.then_some(rows.len() as u64),
            columns: vec![QueryColumn::new("region", "VARCHAR")],
            result_list: rows,
            page_no,
            page_size,
        })
    }

    fn query_rows(&self, sql: &str, _limit: i64) -> ViewResult<Vec<Row>> {
        self.0.check(sql)?;
        self.0.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.0.rows.lock().clone())
    }
}

pub struct MemoryExecutors(pub Arc<Backend>);

impl ExecutorFactory for MemoryExecutors {
    fn connect(&self, _source: &Source) -> ViewResult<Box<dyn RelationalExecutor>> {
        Ok(Box::new(MemoryExecutor(Arc::clone(&self.0))))
    }
}

pub fn collaborators(backend: &Arc<Backend>) -> Collaborators {
    Collaborators {
        views: backend.clone(),
        grants: backend.clone(),
        projects: backend.clone(),
        executors: Arc::new(MemoryExecutors(Arc::clone(backend))),
    }
}

pub fn service(backend: &Arc<Backend>) -> ViewService {
    service_with(backend, Config::default())
}

pub fn service_with(backend: &Arc<Backend>, config: Config) -> ViewService {
    ViewService::new(config, collaborators(backend)).unwrap()
}

pub fn source() -> Source {
    Source {
        id: 11,
        project_id: PROJECT_ID,
        name: "warehouse".to_string(),
        jdbc_url: MYSQL_URL.to_string(),
        username: "reader".to_string(),
        password: "secret".to_string(),
    }
}

pub fn view(id: u64, sql: &str, variables: Vec<SqlVariable>) -> ViewWithSource {
    ViewWithSource {
        id,
        project_id: PROJECT_ID,
        name: format!("view_{id}"),
        sql: sql.to_string(),
        variables,
        source: Some(source()),
    }
}

pub fn row_grant(role_id: u64, view_id: u64, row_auth: &str) -> RoleViewGrant {
    RoleViewGrant {
        role_id,
        view_id,
        row_auth: Some(row_auth.to_string()),
        column_auth: None,
        created_by: None,
    }
}

pub fn column_grant(role_id: u64, view_id: u64, columns: &str) -> RoleViewGrant {
    RoleViewGrant {
        role_id,
        view_id,
        row_auth: None,
        column_auth: Some(columns.to_string()),
        created_by: None,
    }
}

pub fn sample_row() -> Row {
    let mut row = Row::new();
    row.insert("region".to_string(), json!("east"));
    row.insert("count(*)".to_string(), json!(3));
    row
}
