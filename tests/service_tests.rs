//! End-to-end tests of the view query pipeline against in-memory collaborators.

mod common;

use common::{column_grant, row_grant, service, service_with, view, Backend};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use viewquery::authorization::PermissionLevel;
use viewquery::fetcher::FetchError;
use viewquery::model::{Direction, Order, ParentFilter};
use viewquery::{
    Aggregator, AuthValueSource, Config, DistinctParams, ExecuteParams, Param, RoleGrantRequest,
    SqlVariable, User, ViewError, ViewExecuteSql, WaitGuard,
};

const SALES_SQL: &str = "SELECT * FROM t WHERE $dept$";

fn alice() -> User {
    User::new(7, "alice")
}

fn dept() -> Vec<SqlVariable> {
    vec![SqlVariable::authorization("dept", vec![])]
}

fn count_by_region() -> ExecuteParams {
    ExecuteParams {
        groups: vec!["region".to_string()],
        aggregators: vec![Aggregator::new("count", "*")],
        ..Default::default()
    }
}

// ============================================================================
// Short circuits and permissions
// ============================================================================

#[test]
fn test_empty_projection_touches_nothing() {
    let backend = Backend::new();
    backend.add_view(view(1, SALES_SQL, dept()));
    let svc = service(&backend);

    let params = ExecuteParams {
        filters: vec!["a = 1".to_string()],
        ..Default::default()
    };
    assert!(svc.get_data(1, &params, &alice()).unwrap().is_none());
    assert_eq!(backend.store_calls.load(Ordering::SeqCst), 0);
    assert!(backend.executed().is_empty());
}

#[test]
fn test_missing_view_is_not_found() {
    let backend = Backend::new();
    let err = service(&backend)
        .get_data(42, &count_by_region(), &alice())
        .unwrap_err();
    assert!(matches!(err, ViewError::NotFound(_)));
}

#[test]
fn test_missing_source_is_not_found() {
    let backend = Backend::new();
    let mut v = view(1, SALES_SQL, dept());
    v.source = None;
    backend.add_view(v);
    let err = service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap_err();
    assert!(matches!(err, ViewError::NotFound(_)));
}

#[test]
fn test_reader_without_data_permission_is_rejected() {
    let backend = Backend::new();
    backend.add_view(view(1, SALES_SQL, dept()));
    backend.readers_denied.lock().insert(alice().id);
    let err = service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap_err();
    assert!(matches!(err, ViewError::Unauthorized(_)));
    assert!(backend.executed().is_empty());
}

// ============================================================================
// Row and column authorization
// ============================================================================

#[test]
fn test_row_grant_renders_in_list_and_grouping() {
    let backend = Backend::new();
    backend.add_view(view(1, SALES_SQL, dept()));
    backend.grant(alice().id, row_grant(3, 1, r#"[{"name":"dept","values":["sales","ops"]}]"#));

    let page = service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap()
        .unwrap();
    assert_eq!(page.result_list.len(), 1);
    assert_eq!(
        backend.last_query(),
        "SELECT `region`, COUNT(*) AS `count(*)` \
         FROM (SELECT * FROM t WHERE dept IN ('sales','ops')) T GROUP BY `region`"
    );
}

#[test]
fn test_row_values_union_across_roles() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t WHERE dept IN ($dept$)", dept()));
    backend.grant(alice().id, row_grant(3, 1, r#"[{"name":"dept","values":["sales"]}]"#));
    backend.grant(alice().id, row_grant(4, 1, r#"[{"name":"dept","values":["ops","sales"]}]"#));

    service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap();
    assert!(backend.last_query().contains("WHERE dept IN ('sales','ops')"));
}

#[test]
fn test_no_grants_means_unrestricted() {
    let backend = Backend::new();
    backend.add_view(view(1, SALES_SQL, dept()));
    service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap();
    assert!(backend.last_query().contains("WHERE 1=1"));
}

#[test]
fn test_grants_without_values_deny_rows() {
    let backend = Backend::new();
    backend.add_view(view(1, SALES_SQL, dept()));
    backend.grant(alice().id, column_grant(3, 1, "salary"));
    service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap();
    assert!(backend.last_query().contains("WHERE 1=0"));
}

#[test]
fn test_hidden_columns_are_removed() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM staff", vec![]));
    backend.grant(alice().id, column_grant(3, 1, "salary, bonus"));

    let params = ExecuteParams {
        groups: vec!["region".to_string(), "salary".to_string()],
        aggregators: vec![Aggregator::new("sum", "bonus"), Aggregator::new("count", "*")],
        orders: vec![Order {
            column: "salary".to_string(),
            direction: Direction::Desc,
        }],
        ..Default::default()
    };
    service(&backend).get_data(1, &params, &alice()).unwrap();
    assert_eq!(
        backend.last_query(),
        "SELECT `region`, COUNT(*) AS `count(*)` FROM (SELECT * FROM staff) T GROUP BY `region`"
    );
}

#[test]
fn test_all_columns_hidden_is_unauthorized() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM staff", vec![]));
    backend.grant(alice().id, column_grant(3, 1, "salary"));
    let params = ExecuteParams {
        groups: vec!["SALARY".to_string()],
        ..Default::default()
    };
    let err = service(&backend).get_data(1, &params, &alice()).unwrap_err();
    assert!(matches!(err, ViewError::Unauthorized(_)));
    assert!(backend.executed().is_empty());
}

#[test]
fn test_maintainer_matches_unrestricted_user() {
    let sql = "SELECT * FROM t WHERE region = $region$ AND $dept$";
    let variables = vec![
        SqlVariable::authorization("dept", vec![]),
        SqlVariable::authorization("region", vec![]),
    ];
    let params = ExecuteParams {
        groups: vec!["region".to_string(), "salary".to_string()],
        ..Default::default()
    };

    let restricted = Backend::new();
    restricted.add_view(view(1, sql, variables.clone()));
    restricted.maintainers.lock().insert(alice().id);
    restricted.grant(alice().id, row_grant(3, 1, r#"[{"name":"dept","values":["ops"]}]"#));
    restricted.grant(alice().id, column_grant(3, 1, "salary"));
    service(&restricted).get_data(1, &params, &alice()).unwrap();

    let open = Backend::new();
    open.add_view(view(1, sql, variables));
    service(&open).get_data(1, &params, &alice()).unwrap();

    assert_eq!(restricted.last_query(), open.last_query());
    assert!(open.last_query().contains("WHERE 1=1 AND 1=1"));
    assert!(open.last_query().contains("`salary`"));
}

#[test]
fn test_caller_cannot_override_authorization_variable() {
    let backend = Backend::new();
    backend.add_view(view(1, SALES_SQL, dept()));
    backend.grant(alice().id, row_grant(3, 1, r#"[{"name":"dept","values":["ops"]}]"#));

    let mut params = count_by_region();
    params.params = vec![Param {
        name: "dept".to_string(),
        value: "1=1 OR 1".to_string(),
    }];
    service(&backend).get_data(1, &params, &alice()).unwrap();
    let query = backend.last_query();
    assert!(query.contains("dept IN ('ops')"));
    assert!(!query.contains("OR 1"));
}

#[test]
fn test_query_variables_take_caller_values() {
    let backend = Backend::new();
    backend.add_view(view(
        1,
        "SELECT * FROM t WHERE year = $year$ AND month = $month$",
        vec![
            SqlVariable::query("year", vec!["2023".to_string()]),
            SqlVariable::query("month", vec!["1".to_string()]),
        ],
    ));
    let mut params = count_by_region();
    params.params = vec![Param {
        name: " year ".to_string(),
        value: "2024".to_string(),
    }];
    service(&backend).get_data(1, &params, &alice()).unwrap();
    assert!(backend
        .last_query()
        .contains("WHERE year = 2024 AND month = 1"));
}

// ============================================================================
// External authorization values
// ============================================================================

struct Directory;

impl AuthValueSource for Directory {
    fn fetch(&self, variable: &SqlVariable) -> Result<Option<Vec<String>>, FetchError> {
        match variable.name.as_str() {
            "region" => Ok(Some(vec!["east".to_string()])),
            _ => Ok(None),
        }
    }
}

struct Stalled;

impl AuthValueSource for Stalled {
    fn fetch(&self, _variable: &SqlVariable) -> Result<Option<Vec<String>>, FetchError> {
        thread::sleep(Duration::from_millis(300));
        Ok(Some(vec!["late".to_string()]))
    }
}

fn dept_and_region() -> Vec<SqlVariable> {
    vec![
        SqlVariable::authorization("dept", vec![]),
        SqlVariable::authorization("region", vec![]),
    ]
}

#[test]
fn test_values_without_grant_come_from_source() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t WHERE $dept$ AND $region$", dept_and_region()));
    backend.grant(alice().id, row_grant(3, 1, r#"[{"name":"dept","values":["ops"]}]"#));

    let svc = service(&backend).with_auth_values(Arc::new(Directory));
    svc.get_data(1, &count_by_region(), &alice()).unwrap();
    assert!(backend
        .last_query()
        .contains("WHERE dept IN ('ops') AND region IN ('east')"));
}

#[test]
fn test_interrupted_fetch_fails_closed() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t WHERE $dept$ AND $region$", dept_and_region()));
    backend.grant(alice().id, row_grant(3, 1, r#"[{"name":"dept","values":["ops"]}]"#));

    let svc = service(&backend).with_auth_values(Arc::new(Stalled));
    let guard = WaitGuard::new(Some(Duration::from_millis(30)));
    svc.get_data_with_guard(1, &count_by_region(), &alice(), &guard)
        .unwrap();
    let query = backend.last_query();
    assert!(query.contains("WHERE 1=0 AND 1=0"), "{query}");
}

#[test]
fn test_stalled_source_does_not_hold_request() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t WHERE $region$", dept_and_region()));
    backend.grant(alice().id, column_grant(3, 1, "salary"));

    let svc = service(&backend).with_auth_values(Arc::new(Stalled));
    let guard = WaitGuard::new(Some(Duration::from_millis(30)));
    let started = Instant::now();
    svc.get_data_with_guard(1, &count_by_region(), &alice(), &guard)
        .unwrap();
    let took = started.elapsed();

    assert!(took < Duration::from_millis(250), "took {took:?}");
    assert!(backend.last_query().contains("WHERE 1=0"));
}

#[test]
fn test_cancelled_fetch_fails_closed() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t WHERE $region$", dept_and_region()));
    backend.grant(alice().id, column_grant(3, 1, "salary"));

    let svc = service(&backend).with_auth_values(Arc::new(Stalled));
    let guard = WaitGuard::unbounded();
    guard.cancel();
    svc.get_data_with_guard(1, &count_by_region(), &alice(), &guard)
        .unwrap();
    assert!(backend.last_query().contains("WHERE 1=0"));
}

// ============================================================================
// Statements and execution errors
// ============================================================================

#[test]
fn test_setup_statements_run_in_order_before_query() {
    let backend = Backend::new();
    backend.add_view(view(
        1,
        "SET @a = 1; CREATE TEMPORARY TABLE tmp AS SELECT 1; SELECT * FROM tmp",
        vec![],
    ));
    service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap();
    let executed = backend.executed();
    assert_eq!(executed.len(), 3);
    assert_eq!(executed[0], "SET @a = 1");
    assert_eq!(executed[1], "CREATE TEMPORARY TABLE tmp AS SELECT 1");
    assert!(executed[2].contains("FROM (SELECT * FROM tmp) T"));
}

#[test]
fn test_setup_failure_aborts_with_execution_error() {
    let backend = Backend::new();
    backend.add_view(view(1, "CREATE TABLE x (a int); SELECT * FROM x", vec![]));
    *backend.fail_on.lock() = Some("CREATE".to_string());

    let err = service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap_err();
    assert!(matches!(err, ViewError::Execution(ref m) if m.contains("statement rejected")));
    assert_eq!(backend.queries.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unterminated_placeholder_is_parse_error() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t WHERE $dept", dept()));
    let err = service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap_err();
    assert!(matches!(err, ViewError::Parse(_)));
}

#[test]
fn test_trailing_line_comment_keeps_wrapper_intact() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t -- latest rows only", vec![]));
    service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap();
    assert_eq!(
        backend.last_query(),
        "SELECT `region`, COUNT(*) AS `count(*)` FROM (SELECT * FROM t) T GROUP BY `region`"
    );
}

#[test]
fn test_delimiter_inside_object_name_is_literal() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM v$session", vec![]));
    service(&backend)
        .get_data(1, &count_by_region(), &alice())
        .unwrap();
    assert!(backend.last_query().contains("FROM (SELECT * FROM v$session) T"));
}

// ============================================================================
// Cache
// ============================================================================

fn cached(expired: u64) -> ExecuteParams {
    ExecuteParams {
        cache: true,
        expired,
        page_no: 1,
        page_size: 20,
        ..count_by_region()
    }
}

#[test]
fn test_cache_hit_skips_executor() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t", vec![]));
    let svc = service(&backend);

    let first = svc.get_data(1, &cached(60), &alice()).unwrap();
    let second = svc.get_data(1, &cached(60), &alice()).unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.queries.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cache_miss_after_expiry() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t", vec![]));
    let svc = service(&backend);

    svc.get_data(1, &cached(1), &alice()).unwrap();
    thread::sleep(Duration::from_millis(1100));
    svc.get_data(1, &cached(1), &alice()).unwrap();
    assert_eq!(backend.queries.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cache_is_keyed_by_page() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t", vec![]));
    let svc = service(&backend);

    svc.get_data(1, &cached(60), &alice()).unwrap();
    let next_page = ExecuteParams {
        page_no: 2,
        ..cached(60)
    };
    svc.get_data(1, &next_page, &alice()).unwrap();
    assert_eq!(backend.queries.load(Ordering::SeqCst), 2);
}

#[test]
fn test_empty_results_are_not_cached() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t", vec![]));
    backend.rows.lock().clear();
    let svc = service(&backend);

    svc.get_data(1, &cached(60), &alice()).unwrap();
    svc.get_data(1, &cached(60), &alice()).unwrap();
    assert_eq!(backend.queries.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cache_disabled_in_config() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT * FROM t", vec![]));
    let mut config = Config::default();
    config.cache.enabled = false;
    let svc = service_with(&backend, config);

    svc.get_data(1, &cached(60), &alice()).unwrap();
    svc.get_data(1, &cached(60), &alice()).unwrap();
    assert_eq!(backend.queries.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Distinct values, ad hoc SQL, grants
// ============================================================================

#[test]
fn test_distinct_values_keep_row_authorization() {
    let backend = Backend::new();
    backend.add_view(view(1, SALES_SQL, dept()));
    backend.grant(alice().id, row_grant(3, 1, r#"[{"name":"dept","values":["ops"]}]"#));

    let distinct = DistinctParams {
        columns: vec!["city".to_string()],
        parents: vec![ParentFilter {
            column: "country".to_string(),
            values: vec!["fr".to_string()],
        }],
    };
    let rows = service(&backend)
        .get_distinct_value(1, &distinct, &alice())
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        backend.last_query(),
        "SELECT DISTINCT `city` FROM (SELECT * FROM t WHERE dept IN ('ops')) T WHERE (`country` IN ('fr'))"
    );
}

#[test]
fn test_execute_sql_requires_write_permission() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT 1", vec![]));
    backend.permission.lock().view_permission = PermissionLevel::Read;

    let adhoc = ViewExecuteSql {
        source_id: common::source().id,
        sql: "SELECT 1".to_string(),
        variables: vec![],
        limit: 10,
    };
    let err = service(&backend).execute_sql(&adhoc, &alice()).unwrap_err();
    assert!(matches!(err, ViewError::Unauthorized(_)));
}

#[test]
fn test_execute_sql_runs_every_statement() {
    let backend = Backend::new();
    backend.add_view(view(1, "SELECT 1", vec![]));

    let adhoc = ViewExecuteSql {
        source_id: common::source().id,
        sql: "SET @d = 'x'; SELECT 1; SELECT * FROM t WHERE $dept$ AND y = $y$".to_string(),
        variables: vec![
            SqlVariable::authorization("dept", vec![]),
            SqlVariable::query("y", vec!["2".to_string()]),
        ],
        limit: 10,
    };
    let page = service(&backend).execute_sql(&adhoc, &alice()).unwrap();
    assert!(!page.is_empty());
    assert_eq!(
        backend.executed(),
        vec![
            "SET @d = 'x'".to_string(),
            "SELECT 1".to_string(),
            "SELECT * FROM t WHERE 1=1 AND y = 2".to_string(),
        ]
    );
}

#[test]
fn test_execute_sql_unknown_source() {
    let backend = Backend::new();
    let adhoc = ViewExecuteSql {
        source_id: 99,
        sql: "SELECT 1".to_string(),
        ..Default::default()
    };
    let err = service(&backend).execute_sql(&adhoc, &alice()).unwrap_err();
    assert!(matches!(err, ViewError::NotFound(_)));
}

#[test]
fn test_save_role_grants_completes() {
    let backend = Backend::new();
    let svc = service(&backend);
    let roles = vec![
        RoleGrantRequest {
            role_id: 3,
            row_auth: Some(r#"[{"name":"dept","values":["ops"]}]"#.to_string()),
            column_auth: Some("salary".to_string()),
        },
        RoleGrantRequest {
            role_id: 4,
            row_auth: Some(r#"[{"name":"other","values":["x"]}]"#.to_string()),
            column_auth: None,
        },
    ];
    let job = svc
        .save_role_grants(5, r#"[{"name":"dept","type":"auth"}]"#, &roles, &alice())
        .unwrap();
    assert_eq!(job.wait_timeout(Duration::from_secs(5)).unwrap(), 1);

    let inserted = backend.inserted.lock();
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].role_id, 3);
    assert_eq!(inserted[0].view_id, 5);
    assert_eq!(inserted[0].created_by, Some(alice().id));
}

#[test]
fn test_save_role_grants_rejects_bad_variables() {
    let backend = Backend::new();
    let err = service(&backend)
        .save_role_grants(5, "{not json", &[], &alice())
        .err()
        .unwrap();
    assert!(matches!(err, ViewError::Parse(_)));
}
