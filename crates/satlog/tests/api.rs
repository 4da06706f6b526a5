use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use satlog::{router, AppState};
use satlog_core::{ApiKeyGate, MemoryStore, SatlogConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

const IMPORT_KEY: &str = "import-key";
const ADMIN_KEY: &str = "admin-key";

fn build_app(config: &SatlogConfig) -> Router {
    let store = Arc::new(MemoryStore::new());
    let gate = Arc::new(ApiKeyGate::new(Some(IMPORT_KEY), Some(ADMIN_KEY)));
    router(Arc::new(AppState::new(store, gate, config)))
}

fn app() -> Router {
    build_app(&SatlogConfig::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn import_request(key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/import")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn record_request(method: Method, id: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(format!("/api/records/{id}"));
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn clear_request(key: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri("/api/clear")
        .header(header::AUTHORIZATION, format!("Bearer {key}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn import_reports_per_record_failures() {
    let app = app();
    let (status, body) = send(
        &app,
        import_request(
            Some(IMPORT_KEY),
            json!({"records": [
                {"计划ID": "P1", "开始时间": "2025-03-01 09:30:00", "所属客户": "Acme"},
                {"计划ID": "P2", "开始时间": "not-a-date"},
            ]}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["inserted"], json!(1));
    assert_eq!(body["failed"], json!(1));
    assert_eq!(body["total"], json!(2));
    assert_eq!(body["policy"], json!("skip"));
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert_eq!(body["errors"][0]["index"], json!(1));
    assert_eq!(body["errors"][0]["originalValue"], json!("not-a-date"));
    assert!(body["batchId"].is_string());

    let (status, page) = send(&app, get("/api/records")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], json!(1));
    assert_eq!(page["page"], json!(1));
    assert_eq!(page["pageSize"], json!(20));
    assert_eq!(page["records"][0]["planId"], json!("P1"));
    assert_eq!(
        page["records"][0]["startTime"],
        json!("2025-03-01T09:30:00+08:00")
    );
}

#[tokio::test]
async fn import_requires_the_import_key() {
    let app = app();
    let body = json!({"records": [{"计划ID": "P1", "开始时间": "2025-03-01"}]});

    let (status, error) = send(&app, import_request(None, body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["code"], json!("UNAUTHORIZED"));

    let (status, _) = send(&app, import_request(Some(ADMIN_KEY), body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let bearer = Request::builder()
        .method(Method::POST)
        .uri("/api/import")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {IMPORT_KEY}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, report) = send(&app, bearer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["inserted"], json!(1));
}

#[tokio::test]
async fn malformed_batches_are_bad_requests() {
    let app = app();

    let (status, error) = send(&app, import_request(Some(IMPORT_KEY), json!({"records": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], json!("EMPTY_BATCH"));

    let (status, error) = send(&app, import_request(Some(IMPORT_KEY), json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], json!("EMPTY_BATCH"));

    let (status, error) = send(
        &app,
        import_request(Some(IMPORT_KEY), json!({"records": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], json!("BAD_REQUEST"));

    let (status, _) = send(
        &app,
        import_request(
            Some(IMPORT_KEY),
            json!({"records": [{}], "duplicatePolicy": "replace"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_batch_is_refused() {
    let mut config = SatlogConfig::default();
    config.ingest.max_batch = 2;
    let app = build_app(&config);

    let records: Vec<Value> = (0..3)
        .map(|i| json!({"计划ID": format!("P{i}"), "开始时间": "2025-03-01"}))
        .collect();
    let (status, error) = send(
        &app,
        import_request(Some(IMPORT_KEY), json!({ "records": records })),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error["code"], json!("BATCH_TOO_LARGE"));
    assert!(error["error"].as_str().unwrap().contains("limit of 2"));
}

#[tokio::test]
async fn dry_run_and_upsert_options() {
    let app = app();
    let record = |customer: &str| json!({"计划ID": "P1", "开始时间": "2025-03-01", "所属客户": customer});

    let (_, report) = send(
        &app,
        import_request(
            Some(IMPORT_KEY),
            json!({"records": [record("Acme")], "dryRun": true}),
        ),
    )
    .await;
    assert_eq!(report["dryRun"], json!(true));
    assert_eq!(report["inserted"], json!(1));
    let (_, page) = send(&app, get("/api/records")).await;
    assert_eq!(page["total"], json!(0));

    send(
        &app,
        import_request(Some(IMPORT_KEY), json!({"records": [record("Acme")]})),
    )
    .await;
    let (_, report) = send(
        &app,
        import_request(
            Some(IMPORT_KEY),
            json!({"records": [record("Beta")], "duplicatePolicy": "upsert"}),
        ),
    )
    .await;
    assert_eq!(report["updated"], json!(1));
    assert_eq!(report["policy"], json!("upsert"));

    let (status, stored) = send(&app, get("/api/records/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["customer"], json!("Beta"));
    assert_eq!(stored["startTime"], json!("2025-03-01T00:00:00+08:00"));
}

#[tokio::test]
async fn point_lookup_errors() {
    let app = app();

    let (status, error) = send(&app, get("/api/records/99")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], json!("NOT_FOUND"));

    let (status, error) = send(&app, get("/api/records/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], json!("BAD_REQUEST"));
}

#[tokio::test]
async fn listing_parameters_are_validated() {
    let app = app();

    let (status, error) = send(&app, get("/api/records?page=two")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], json!("INVALID_PARAMETER"));

    let (status, error) = send(&app, get("/api/records?start=yesterday")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().unwrap().contains("start"));

    let (status, page) = send(&app, get("/api/records?pageSize=5000")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pageSize"], json!(1000));
}

#[tokio::test]
async fn stats_groups_by_month_and_customer() {
    let app = app();
    send(
        &app,
        import_request(
            Some(IMPORT_KEY),
            json!({"records": [
                {"计划ID": "P1", "开始时间": "2025-03-01 09:30:00", "所属客户": "Acme"},
                {"计划ID": "P2", "开始时间": "2025-03-20 10:00:00", "所属客户": "Acme"},
            ]}),
        ),
    )
    .await;

    let (status, stats) = send(&app, get("/api/stats?groupBy=month&category=customer")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["groupBy"], json!("month"));
    assert_eq!(stats["category"], json!("customer"));
    assert_eq!(stats["labels"], json!(["2025-03"]));
    assert_eq!(stats["series"], json!([{"label": "Acme", "data": [2]}]));

    let (status, error) = send(&app, get("/api/stats?groupBy=year")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], json!("INVALID_PARAMETER"));
}

#[tokio::test]
async fn clear_requires_the_admin_key() {
    let app = app();
    send(
        &app,
        import_request(
            Some(IMPORT_KEY),
            json!({"records": [
                {"计划ID": "P1", "开始时间": "2025-03-01"},
                {"计划ID": "P2", "开始时间": "2025-03-02"},
            ]}),
        ),
    )
    .await;

    let (status, error) = send(&app, clear_request(IMPORT_KEY)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["code"], json!("UNAUTHORIZED"));

    let (status, body) = send(&app, clear_request(ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "removed": 2}));

    let (_, page) = send(&app, get("/api/records")).await;
    assert_eq!(page["total"], json!(0));
}

async fn seed_two(app: &Router) {
    send(
        app,
        import_request(
            Some(IMPORT_KEY),
            json!({"records": [
                {"计划ID": "P1", "开始时间": "2025-03-01 09:30:00", "所属客户": "Acme"},
                {"计划ID": "P2", "开始时间": "2025-03-02 10:00:00", "所属客户": "Beta"},
            ]}),
        ),
    )
    .await;
}

#[tokio::test]
async fn update_record_normalizes_zoneless_start_time() {
    let app = app();
    seed_two(&app).await;
    let (_, before) = send(&app, get("/api/records/1")).await;

    let (status, body) = send(
        &app,
        record_request(
            Method::PUT,
            "1",
            Some(IMPORT_KEY),
            Some(json!({"planId": "P1", "startTime": "2025/4/2 下午9:15", "customer": "Gamma"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["record"]["id"], json!(1));
    assert_eq!(body["record"]["startTime"], json!("2025-04-02T21:15:00+08:00"));
    assert_eq!(body["record"]["customer"], json!("Gamma"));
    assert_eq!(body["record"]["createdAt"], before["createdAt"]);

    let (_, stored) = send(&app, get("/api/records/1")).await;
    assert_eq!(stored, body["record"]);
}

#[tokio::test]
async fn update_record_errors() {
    let app = app();
    seed_two(&app).await;
    let body = json!({"planId": "P1", "startTime": "2025-04-02"});

    let (status, error) = send(&app, record_request(Method::PUT, "1", None, Some(body.clone()))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["code"], json!("UNAUTHORIZED"));

    let (status, error) = send(
        &app,
        record_request(Method::PUT, "9", Some(IMPORT_KEY), Some(body.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], json!("NOT_FOUND"));

    let (status, error) = send(
        &app,
        record_request(
            Method::PUT,
            "1",
            Some(IMPORT_KEY),
            Some(json!({"planId": "P1", "startTime": "someday"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], json!("RECORD_REJECTED"));

    let (status, error) = send(
        &app,
        record_request(
            Method::PUT,
            "1",
            Some(IMPORT_KEY),
            Some(json!({"planId": "P2", "startTime": "2025-04-02"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], json!("CONFLICT"));

    let (status, _) = send(
        &app,
        record_request(Method::PUT, "1", Some(IMPORT_KEY), Some(json!([1, 2]))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_record_then_lookup_is_not_found() {
    let app = app();
    seed_two(&app).await;

    let (status, _) = send(&app, record_request(Method::DELETE, "1", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, record_request(Method::DELETE, "1", Some(IMPORT_KEY), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let (status, error) = send(&app, get("/api/records/1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], json!("NOT_FOUND"));

    let (status, _) = send(&app, record_request(Method::DELETE, "1", Some(IMPORT_KEY), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let by_plan = Request::builder()
        .method(Method::DELETE)
        .uri("/api/records?planId=P2")
        .header("x-api-key", IMPORT_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, by_plan).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "removed": 1}));

    let (_, page) = send(&app, get("/api/records")).await;
    assert_eq!(page["total"], json!(0));
}
