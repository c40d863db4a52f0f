//! End-to-end tests of the cache-and-join engine.
//!
//! The first half drives [`Engine`] against a counting in-process
//! [`Upstream`] fake and an [`InMemoryCache`]; the second half runs the real
//! `HttpUpstream` against an axum mock of the upstream login and data
//! endpoints, with an [`FsCache`] in a temp directory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use newarp_harness::cache::{CacheKey, CacheStore, FsCache, InMemoryCache};
use newarp_harness::config::{parse_config, EvaluationConfig};
use newarp_harness::engine::Engine;
use newarp_harness::error::{HarnessError, Result};
use newarp_harness::query::{
    render, QueryOutcome, DIVISION_REPORT, EVALUATION_REPORT, USER_REPORT,
};
use newarp_harness::upstream::{Dataset, Session, Upstream};
use serde_json::{json, Value};
use tempfile::TempDir;

// ─── Fixtures ───────────────────────────────────────────────────────

fn master_fixtures() -> HashMap<String, Value> {
    let mut m = HashMap::new();
    m.insert(
        "division".to_string(),
        json!({ "data": [
            { "divisionCode": "D1", "divisionName": "営業事業部", "divisionShortName": "SAL" },
            { "divisionCode": "D2", "divisionName": "技術事業部", "divisionShortName": "ENG" }
        ]}),
    );
    m.insert(
        "department".to_string(),
        json!({ "data": [
            { "departmentCode": "DP1", "departmentName": "営業部", "departmentShortName": "SO", "divisionCode": "D1" },
            { "departmentCode": "DP2", "departmentName": "開発部", "departmentShortName": "DEV", "divisionCode": "D2" }
        ]}),
    );
    m.insert(
        "group".to_string(),
        json!({ "data": [
            { "groupCode": "G1", "groupName": "営業1課", "groupShortName": "S1", "departmentCode": "DP1" },
            { "groupCode": "G2", "groupName": "開発1課", "groupShortName": "BTI", "departmentCode": "DP2" },
            { "groupCode": "G3", "groupName": "開発2課", "groupShortName": "BSS", "departmentCode": "DP2" },
            { "groupCode": "G9", "groupName": "孤立", "groupShortName": "ORP", "departmentCode": "DPX" }
        ]}),
    );
    m.insert(
        "user".to_string(),
        json!({ "data": [
            { "userKey": 101, "userId": "yamada.t", "userName": "山田 太郎", "mailAddress": "yamada.t@example.com",
              "groupShortName": "BTI", "position": "主任", "joiningDate": "2015-04-01" },
            { "userKey": 102, "userId": "yamada.h", "userName": "山田 花子", "mailAddress": "yamada.h@example.com",
              "groupShortName": "BSS", "position": "", "joiningDate": "2019-04-01" },
            { "userKey": 103, "userId": "sato.j", "userName": "佐藤 次郎", "mailAddress": "sato.j@example.com",
              "groupShortName": "BTI", "position": "課長", "joiningDate": "2010-10-01" }
        ]}),
    );
    m
}

fn interview(period_name: &str, goal: &str) -> Value {
    json!({ "data": {
        "info": {
            "periodName": period_name,
            "vision": "アーキテクト",
            "appeal": "設計レビュー",
            "note": "特になし",
            "evaluationKind": "開発",
            "evaluationStage": "3",
            "evaluationClass": "B",
            "expectation": "チームを牽引してほしい"
        },
        "pastDetails": [
            { "goal": goal, "condition": "期末までに完了", "assessment": 90,
              "comment": "完了", "assessmentComment": "よくできました" }
        ]
    }})
}

fn score_sheet(self_points: Value, manager_ids: &[i64]) -> Value {
    let manager: Vec<Value> = manager_ids
        .iter()
        .map(|id| json!({ "groupName": "", "evaluationKind": "", "evaluationKindId": id, "itemPoints": 4 }))
        .collect();
    json!({
        "data": [
            { "groupName": "コミュニケーション", "evaluationKind": "傾聴", "evaluationKindId": 1, "itemPoints": self_points },
            { "groupName": "業績考課", "evaluationKind": "売上", "evaluationKindId": 2, "itemPoints": 5 },
            { "groupName": "技術考課", "evaluationKind": "Rust", "evaluationKindId": 3, "itemPoints": 3 },
            { "groupName": "リーダーシップ", "evaluationKind": "育成", "evaluationKindId": 4, "itemPoints": null }
        ],
        "dataNotSelf": manager
    })
}

fn full_fixtures() -> HashMap<String, Value> {
    let mut m = master_fixtures();
    m.insert(
        "interview_sheet:103:2024-04".to_string(),
        interview("2024年上期", "API刷新"),
    );
    m.insert(
        "interview_sheet:103:2024-10".to_string(),
        interview("2024年下期", "性能改善"),
    );
    m.insert(
        "score_sheet:103:2024-04".to_string(),
        score_sheet(json!(3), &[1, 3]),
    );
    m.insert(
        "score_sheet:103:2024-10".to_string(),
        score_sheet(json!(4), &[1, 3]),
    );
    m
}

// ─── Counting upstream ──────────────────────────────────────────────

struct MockUpstream {
    responses: HashMap<String, Value>,
    logins: AtomicUsize,
    fetched: Mutex<Vec<String>>,
    reject_login: bool,
}

impl MockUpstream {
    fn new(responses: HashMap<String, Value>) -> Self {
        Self {
            responses,
            logins: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
            reject_login: false,
        }
    }

    fn rejecting_login() -> Self {
        Self {
            reject_login: true,
            ..Self::new(HashMap::new())
        }
    }

    fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

fn response_key(dataset: Dataset, payload: &Value) -> String {
    if dataset.is_period_scoped() {
        format!(
            "{}:{}:{}",
            dataset.name(),
            payload["userKey"].as_str().unwrap_or(""),
            payload["goalManagementPeriodId"].as_str().unwrap_or("")
        )
    } else {
        dataset.name().to_string()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn authenticate(&self) -> Result<Session> {
        if self.reject_login {
            return Err(HarnessError::Auth("login rejected with 401 Unauthorized".into()));
        }
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(Session::new(reqwest::Client::new()))
    }

    async fn fetch(&self, dataset: Dataset, payload: &Value, _session: &Session) -> Result<Value> {
        let key = response_key(dataset, payload);
        self.fetched.lock().unwrap().push(key.clone());
        self.responses
            .get(&key)
            .cloned()
            .ok_or_else(|| HarnessError::Upstream(format!("{} returned 500", key)))
    }
}

fn engine_with(upstream: Arc<MockUpstream>, cache: Arc<InMemoryCache>) -> Engine {
    Engine::new(
        upstream,
        cache,
        "999",
        EvaluationConfig {
            periods: vec!["2024-04".to_string(), "2024-10".to_string()],
            next_goal_field: "pastDetails".to_string(),
        },
    )
}

fn setup(responses: HashMap<String, Value>) -> (Arc<MockUpstream>, Arc<InMemoryCache>, Engine) {
    let upstream = Arc::new(MockUpstream::new(responses));
    let cache = Arc::new(InMemoryCache::new());
    let engine = engine_with(upstream.clone(), cache.clone());
    (upstream, cache, engine)
}

// ─── Organization view ──────────────────────────────────────────────

#[tokio::test]
async fn test_cold_cache_logs_in_once_and_fetches_each_table() {
    let (upstream, _cache, engine) = setup(master_fixtures());

    let view = engine.organization_view().await.unwrap();

    assert_eq!(view.rows.len(), 4, "one row per group");
    assert_eq!(view.columns.len(), 9);
    assert_eq!(upstream.logins(), 1);
    assert_eq!(upstream.fetched(), vec!["division", "department", "group"]);
}

#[tokio::test]
async fn test_warm_cache_is_idempotent_and_offline() {
    let (upstream, _cache, engine) = setup(master_fixtures());

    let first = engine.organization_view().await.unwrap();
    let logins = upstream.logins();
    let fetches = upstream.fetched().len();

    let second = engine.organization_view().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(upstream.logins(), logins, "warm cache must not log in");
    assert_eq!(upstream.fetched().len(), fetches, "warm cache must not fetch");
}

#[tokio::test]
async fn test_one_missing_table_refreshes_all_three() {
    let (upstream, cache, engine) = setup(master_fixtures());
    cache
        .write(
            &CacheKey::table(Dataset::Division),
            &master_fixtures()["division"],
        )
        .await
        .unwrap();

    engine.organization_view().await.unwrap();

    assert_eq!(upstream.logins(), 1);
    assert_eq!(upstream.fetched(), vec!["division", "department", "group"]);
}

#[tokio::test]
async fn test_join_resolves_ancestors_and_keeps_orphans() {
    let (_upstream, _cache, engine) = setup(master_fixtures());
    let view = engine.organization_view().await.unwrap();

    let bti = &view.rows[1];
    assert_eq!(bti.group_short_name, "BTI");
    assert_eq!(bti.department_short_name, "DEV");
    assert_eq!(bti.division_short_name, "ENG");
    assert_eq!(bti.division_name, "技術事業部");

    let orphan = &view.rows[3];
    assert_eq!(orphan.group_short_name, "ORP");
    assert_eq!(orphan.department_code, "");
    assert_eq!(orphan.division_code, "");
}

#[tokio::test]
async fn test_division_filter_is_exact() {
    let (_upstream, _cache, engine) = setup(master_fixtures());

    let found = render(engine.by_division_short_name("ENG").await, &DIVISION_REPORT);
    let rows = found["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["事業部短縮名"] == "ENG"));

    let missing = render(engine.by_division_short_name("EN").await, &DIVISION_REPORT);
    assert_eq!(missing["data"], json!([]));
    assert_eq!(missing["description"], "指定された事業部は見つかりませんでした。");
    assert!(missing.get("error").is_none());
}

#[tokio::test]
async fn test_department_and_group_filters() {
    let (_upstream, _cache, engine) = setup(master_fixtures());

    match engine.by_department_short_name("DEV").await.unwrap() {
        QueryOutcome::Found(view) => assert_eq!(view.rows.len(), 2),
        other => panic!("unexpected outcome: {:?}", other),
    }
    match engine.by_group_short_name("S1").await.unwrap() {
        QueryOutcome::Found(view) => {
            assert_eq!(view.rows.len(), 1);
            assert_eq!(view.rows[0].division_short_name, "SAL");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(matches!(
        engine.by_group_short_name("s1").await.unwrap(),
        QueryOutcome::Empty { .. }
    ));
}

// ─── Users ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_user_name_is_substring_group_is_exact() {
    let (upstream, _cache, engine) = setup(master_fixtures());

    let by_name = render(engine.users_by_name("山田").await, &USER_REPORT);
    assert_eq!(by_name["data"].as_array().unwrap().len(), 2);
    assert_eq!(by_name["data"][0]["ユーザキー"], "101");

    let by_group = render(engine.users_by_group_short_name("BTI").await, &USER_REPORT);
    let names: Vec<&str> = by_group["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["ユーザ名"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["山田 太郎", "佐藤 次郎"]);

    let partial = render(engine.users_by_group_short_name("BT").await, &USER_REPORT);
    assert_eq!(partial["data"], json!([]));
    assert_eq!(partial["description"], "該当する社員が見つかりませんでした。");

    assert_eq!(upstream.fetched(), vec!["user"]);
}

// ─── Evaluation history ─────────────────────────────────────────────

#[tokio::test]
async fn test_ambiguous_user_fetches_no_evaluation_data() {
    let (upstream, _cache, engine) = setup(full_fixtures());

    let outcome = engine.evaluation_by_user_name("山田").await.unwrap();
    match &outcome {
        QueryOutcome::Ambiguous { candidates, .. } => assert_eq!(candidates.len(), 2),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let value = render(Ok(outcome), &EVALUATION_REPORT);
    assert_eq!(value["report_title"], "評価面談");
    assert_eq!(value["description"], "該当する社員が複数見つかりました。");
    assert_eq!(upstream.fetched(), vec!["user"]);
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let (upstream, _cache, engine) = setup(full_fixtures());

    let value = render(
        engine.evaluation_by_user_name("鈴木").await,
        &EVALUATION_REPORT,
    );
    assert_eq!(value["data"], json!([]));
    assert_eq!(value["description"], "該当する社員が見つかりませんでした。");
    assert_eq!(upstream.fetched(), vec!["user"]);
}

#[tokio::test]
async fn test_two_periods_give_two_ordered_blocks_with_one_login() {
    let (upstream, _cache, engine) = setup(full_fixtures());

    let value = render(
        engine.evaluation_by_user_name("佐藤").await,
        &EVALUATION_REPORT,
    );
    assert_eq!(value["report_title"], "評価面談情報");
    assert!(value.get("columns").is_none());
    assert_eq!(value["data"]["対象者名"], "佐藤 次郎");

    let blocks = value["data"]["評価情報"].as_array().unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0]["評価年月"], "2024年上期");
    assert_eq!(blocks[1]["評価年月"], "2024年下期");

    let first = &blocks[0];
    assert_eq!(first["評価全体情報"]["将来のあるべき姿"], "アーキテクト");
    assert_eq!(first["前期目標振り返り"][0]["達成度(%)"], "90");
    assert_eq!(first["来季目標"][0]["目標"], "API刷新");
    assert_eq!(blocks[1]["来季目標"][0]["目標"], "性能改善");

    // 業績考課 is dropped and the null-scored 育成 is skipped.
    let skills = first["能力評価得点"].as_array().unwrap();
    assert_eq!(skills.len(), 1);
    assert_eq!(skills[0]["スキル名"], "傾聴");
    assert_eq!(skills[0]["自己評価得点"], 3);
    assert_eq!(skills[0]["管理職評価得点"], 4);
    assert_eq!(blocks[1]["能力評価得点"][0]["自己評価得点"], 4);

    let technical = first["技術評価得点"].as_array().unwrap();
    assert_eq!(technical.len(), 1);
    assert_eq!(technical[0]["スキル種類"], "技術考課");

    assert_eq!(upstream.logins(), 1, "user table and four sheets share one login");
    assert_eq!(
        upstream.fetched(),
        vec![
            "user",
            "interview_sheet:103:2024-04",
            "score_sheet:103:2024-04",
            "interview_sheet:103:2024-10",
            "score_sheet:103:2024-10",
        ]
    );

    // Warm: same history, nothing fetched.
    let again = render(
        engine.evaluation_by_user_name("佐藤").await,
        &EVALUATION_REPORT,
    );
    assert_eq!(again, value);
    assert_eq!(upstream.logins(), 1);
    assert_eq!(upstream.fetched().len(), 5);
}

#[tokio::test]
async fn test_missing_manager_entry_aborts_history() {
    let mut fixtures = full_fixtures();
    fixtures.insert(
        "score_sheet:103:2024-10".to_string(),
        score_sheet(json!(4), &[3]),
    );
    let (_upstream, _cache, engine) = setup(fixtures);

    let value = render(
        engine.evaluation_by_user_name("佐藤").await,
        &EVALUATION_REPORT,
    );
    let obj = value.as_object().unwrap();
    assert_eq!(obj.len(), 1, "no partial history: {}", value);
    assert!(obj["error"].as_str().unwrap().contains("傾聴"));
}

// ─── Failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_rejected_login_is_error_envelope() {
    let upstream = Arc::new(MockUpstream::rejecting_login());
    let cache = Arc::new(InMemoryCache::new());
    let engine = engine_with(upstream, cache.clone());

    let value = render(engine.by_division_short_name("SAL").await, &DIVISION_REPORT);
    assert!(value["error"]
        .as_str()
        .unwrap()
        .starts_with("authentication failed"));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_failed_fetch_is_error_envelope() {
    let mut fixtures = master_fixtures();
    fixtures.remove("group");
    let (_upstream, _cache, engine) = setup(fixtures);

    let value = render(engine.by_division_short_name("SAL").await, &DIVISION_REPORT);
    assert!(value["error"].as_str().unwrap().contains("group"));
    assert!(value.get("data").is_none());
}

#[tokio::test]
async fn test_corrupt_cache_entry_is_error_envelope() {
    let (upstream, cache, engine) = setup(master_fixtures());
    cache.insert_raw(CacheKey::table(Dataset::User), "{ not json");

    let value = render(engine.users_by_name("山田").await, &USER_REPORT);
    assert!(value["error"].as_str().unwrap().contains("corrupt"));
    assert_eq!(upstream.logins(), 0, "present entries are never refetched");
}

// ─── HTTP upstream against a mock server ────────────────────────────

const SESSION_COOKIE: &str = "NEWARPSESSION=s3cr3t";

#[derive(Clone)]
struct MockServerState {
    responses: Arc<HashMap<String, Value>>,
    logins: Arc<AtomicUsize>,
    referers: Arc<Mutex<Vec<String>>>,
}

async fn mock_login(State(state): State<MockServerState>, Json(body): Json<Value>) -> Response {
    if body["engageCode"] == "ACME" && body["userId"] == "svc" && body["pass"] == "secret" {
        state.logins.fetch_add(1, Ordering::SeqCst);
        (
            [(header::SET_COOKIE, format!("{}; Path=/", SESSION_COOKIE))],
            Json(json!({ "result": "ok" })),
        )
            .into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "bad credentials").into_response()
    }
}

async fn mock_data(
    state: MockServerState,
    dataset: &str,
    headers: HeaderMap,
    payload: Value,
) -> Response {
    let has_session = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(SESSION_COOKIE))
        .unwrap_or(false);
    if !has_session {
        return (StatusCode::UNAUTHORIZED, "no session").into_response();
    }
    if let Some(referer) = headers.get(header::REFERER).and_then(|v| v.to_str().ok()) {
        state.referers.lock().unwrap().push(referer.to_string());
    }
    let key = if payload.get("goalManagementPeriodId").is_some() {
        format!(
            "{}:{}:{}",
            dataset,
            payload["userKey"].as_str().unwrap_or(""),
            payload["goalManagementPeriodId"].as_str().unwrap_or("")
        )
    } else {
        dataset.to_string()
    };
    match state.responses.get(&key) {
        Some(data) => Json(json!({ "data": data })).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "no fixture").into_response(),
    }
}

async fn spawn_mock_upstream(state: MockServerState) -> String {
    let mut app = Router::new().route("/login", post(mock_login));
    for dataset in ["division", "department", "group", "user", "interview_sheet", "score_sheet"] {
        app = app.route(
            &format!("/api/{}", dataset),
            post(
                move |State(s): State<MockServerState>,
                      headers: HeaderMap,
                      Json(p): Json<Value>| async move {
                    mock_data(s, dataset, headers, p).await
                },
            ),
        );
    }
    let app = app.with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn http_config_toml(base: &str, cache_dir: &std::path::Path, password: &str) -> String {
    format!(
        r#"
[cache]
dir = "{dir}"

[upstream]
login_url = "{base}/login"
timeout_secs = 5

[upstream.endpoints]
division = {{ url = "{base}/api/division", referer = "{base}/division" }}
department = {{ url = "{base}/api/department" }}
group = {{ url = "{base}/api/group" }}
user = {{ url = "{base}/api/user" }}
interview_sheet = {{ url = "{base}/api/interview_sheet" }}
score_sheet = {{ url = "{base}/api/score_sheet" }}

[credentials]
engage_code = "ACME"
user_id = "svc"
password = "{password}"
proc_user_key = "999"

[evaluation]
periods = ["2024-04", "2024-10"]
"#,
        dir = cache_dir.display(),
        base = base,
        password = password
    )
}

fn mock_state() -> MockServerState {
    MockServerState {
        responses: Arc::new(full_fixtures()),
        logins: Arc::new(AtomicUsize::new(0)),
        referers: Arc::new(Mutex::new(Vec::new())),
    }
}

#[tokio::test]
async fn test_http_upstream_session_cookie_and_file_cache() {
    let state = mock_state();
    let base = spawn_mock_upstream(state.clone()).await;
    let tmp = TempDir::new().unwrap();
    let cfg = parse_config(&http_config_toml(&base, tmp.path(), "secret")).unwrap();

    let engine = Engine::from_config(&cfg).unwrap();
    let view = engine.organization_view().await.unwrap();
    assert_eq!(view.rows.len(), 4);
    assert_eq!(state.logins.load(Ordering::SeqCst), 1);
    assert_eq!(
        state.referers.lock().unwrap().clone(),
        vec![format!("{}/division", base)]
    );

    for name in ["division", "department", "group"] {
        assert!(tmp.path().join(format!("{}.json", name)).is_file());
    }
    let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
        .collect();
    assert!(leftovers.is_empty());

    // A second engine over the same directory answers without the network.
    let offline_cfg =
        parse_config(&http_config_toml("http://127.0.0.1:9", tmp.path(), "secret")).unwrap();
    let offline = Engine::from_config(&offline_cfg).unwrap();
    assert_eq!(offline.organization_view().await.unwrap(), view);
}

#[tokio::test]
async fn test_http_upstream_evaluation_sheets_are_cached_per_period() {
    let state = mock_state();
    let base = spawn_mock_upstream(state.clone()).await;
    let tmp = TempDir::new().unwrap();
    let cfg = parse_config(&http_config_toml(&base, tmp.path(), "secret")).unwrap();

    let engine = Engine::from_config(&cfg).unwrap();
    match engine.evaluation_by_user_name("佐藤").await.unwrap() {
        QueryOutcome::Found(history) => assert_eq!(history.blocks.len(), 2),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(state.logins.load(Ordering::SeqCst), 1);
    assert!(tmp.path().join("interview_sheet_103_2024-04.json").is_file());
    assert!(tmp.path().join("score_sheet_103_2024-10.json").is_file());
}

#[tokio::test]
async fn test_http_upstream_wrong_password() {
    let state = mock_state();
    let base = spawn_mock_upstream(state.clone()).await;
    let tmp = TempDir::new().unwrap();
    let cfg = parse_config(&http_config_toml(&base, tmp.path(), "wrong")).unwrap();

    let engine = Engine::from_config(&cfg).unwrap();
    let err = engine.organization_view().await.unwrap_err();
    assert!(matches!(err, HarnessError::Auth(_)), "got {err}");
    assert!(engine.cache().entries().await.unwrap().is_empty());
}

async fn spawn_stalling_upstream(state: MockServerState) -> String {
    let app = Router::new()
        .route("/login", post(mock_login))
        .route(
            "/api/division",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "data": { "data": [] } }))
            }),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_upstream_timeout_is_upstream_error() {
    let state = mock_state();
    let base = spawn_stalling_upstream(state.clone()).await;
    let tmp = TempDir::new().unwrap();
    let toml = http_config_toml(&base, tmp.path(), "secret")
        .replace("timeout_secs = 5", "timeout_secs = 1");
    let cfg = parse_config(&toml).unwrap();
    assert_eq!(cfg.upstream.timeout_secs, 1);

    let engine = Engine::from_config(&cfg).unwrap();
    let started = Instant::now();
    let err = engine.organization_view().await.unwrap_err();

    assert!(matches!(err, HarnessError::Upstream(_)), "got {err}");
    assert!(err.to_string().contains("timed out"), "got {err}");
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(state.logins.load(Ordering::SeqCst), 1);
    assert!(engine.cache().entries().await.unwrap().is_empty());
}
