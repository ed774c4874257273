mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use skydash::app::AppContext;
use skydash::config::{ApiConfig, AppConfig, ChartConfig};
use skydash::http::create_router;
use skydash::metrics::AppMetrics;
use tower::ServiceExt;

use common::{A, B, Reply, ScriptedTransport};

const MEASUREMENTS: &str = r#"[
    {"value": 10, "datetimeLocal": "2024-01-01T00:10:00", "unit": "µg/m³", "provider": "OpenAQ"},
    {"value": 20, "datetimeLocal": "2024-01-01T00:40:00", "unit": "µg/m³"},
    {"value": 5,  "datetimeUtc": "2024-01-01T01:05:00Z"},
    {"value": 8,  "datetimeUtc": "2024-01-05T09:00:00Z", "unit": "ppb"}
]"#;

fn router(transport: &Arc<ScriptedTransport>) -> Router {
    let config = AppConfig {
        api: ApiConfig {
            primary: A.into(),
            secondary: Some(B.into()),
            ..ApiConfig::default()
        },
        charts: ChartConfig {
            preview_points: 2,
            ..ChartConfig::default()
        },
        ..AppConfig::default()
    };
    let ctx = AppContext::with_transport(config, AppMetrics::new().unwrap(), transport.clone())
        .unwrap();
    create_router(ctx)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

async fn get_json(router: &Router, uri: &str) -> Value {
    let (status, body) = get(router, uri).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn series_query_parameters_are_parsed() {
    let transport = ScriptedTransport::new();
    transport.route(A, Reply::json(MEASUREMENTS));
    let router = router(&transport);

    let daily = get_json(&router, "/api/v1/locations/7/pm25/series?granularity=daily").await;
    assert_eq!(daily["granularity"], "daily");
    assert_eq!(daily["points"].as_array().unwrap().len(), 2);
    assert_eq!(daily["available_from"], "2024-01-01");
    assert_eq!(daily["available_to"], "2024-01-05");
    assert_eq!(daily["source"], "openaq");

    let ranged = get_json(
        &router,
        "/api/v1/locations/7/pm25/series?granularity=daily&from=2024-01-02&to=2024-01-31",
    )
    .await;
    let labels: Vec<&str> = ranged["points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["Jan 5"]);

    let before = transport.calls().len();
    let (status, _) = get(&router, "/api/v1/locations/7/pm25/series?granularity=monthly").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = get(&router, "/api/v1/locations/7/pm25/series?from=2024-13-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).contains("2024-13-01"));
    assert_eq!(transport.calls().len(), before);
}

#[tokio::test]
async fn preview_keeps_the_tail_and_flags_truncation() {
    let transport = ScriptedTransport::new();
    transport.route(A, Reply::json(MEASUREMENTS));
    let router = router(&transport);

    let full = get_json(&router, "/api/v1/locations/7/pm25/series").await;
    assert_eq!(full["points"].as_array().unwrap().len(), 3);
    assert_eq!(full["truncated"], false);

    let tail = get_json(&router, "/api/v1/locations/7/pm25/series?preview=true").await;
    let values: Vec<f64> = tail["points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["value"].as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![5.0, 8.0]);
    assert_eq!(tail["truncated"], true);
}

#[tokio::test]
async fn unit_prefers_records_inside_the_range() {
    let transport = ScriptedTransport::new();
    transport.route(A, Reply::json(MEASUREMENTS));
    let router = router(&transport);

    let all = get_json(&router, "/api/v1/locations/7/pm25/series").await;
    assert_eq!(all["unit"], "µg/m³");

    let late = get_json(&router, "/api/v1/locations/7/pm25/series?from=2024-01-05").await;
    assert_eq!(late["unit"], "ppb");

    // Nothing in range carries a unit, so the whole collection is used.
    let empty = get_json(&router, "/api/v1/locations/7/pm25/series?from=2024-02-01").await;
    assert_eq!(empty["unit"], "µg/m³");
    assert!(empty["points"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn upstream_failures_map_to_http_statuses() {
    let transport = ScriptedTransport::new();
    transport.route(
        &format!("{A}/locations/9"),
        Reply::Respond(404, r#"{"detail": "Location not found"}"#.into()),
    );
    transport.route(&format!("{A}/locations/8"), Reply::status(500));
    transport.route(
        &format!("{A}/locations/6"),
        Reply::json(r#"{"error": "Parameter lookup failed"}"#),
    );
    transport.route(&format!("{A}/locations/5"), Reply::status(503));
    transport.route(&format!("{B}/locations/5"), Reply::status(504));
    let router = router(&transport);

    let (status, body) = get(&router, "/api/v1/locations/9/parameters").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"Location not found");

    let (status, _) = get(&router, "/api/v1/locations/8/parameters").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, body) = get(&router, "/api/v1/locations/6/parameters").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, b"Parameter lookup failed");

    let (status, body) = get(&router, "/api/v1/locations/5/parameters").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(String::from_utf8_lossy(&body).starts_with("All API hosts failed"));
}

#[tokio::test]
async fn healthz_reports_the_sticky_endpoint() {
    let transport = ScriptedTransport::new();
    transport.route(A, Reply::status(503));
    transport.route(B, Reply::json(r#"["pm25"]"#));
    let router = router(&transport);

    let before = get_json(&router, "/healthz").await;
    assert_eq!(before["active_endpoint"], A);
    assert_eq!(before["endpoints"], json!([A, B]));

    get_json(&router, "/api/v1/locations/7/parameters").await;

    let after = get_json(&router, "/healthz").await;
    assert_eq!(after["active_endpoint"], B);
}

#[tokio::test]
async fn locations_report_their_sensor_source() {
    let transport = ScriptedTransport::new();
    transport.route(
        A,
        Reply::json(
            r#"{"tempo-4": {"latitude": 40.0, "longitude": -100.0},
                "31": {"latitude": 43.7, "longitude": -79.4, "files": ["openmeteo_31.csv"]}}"#,
        ),
    );
    let router = router(&transport);

    let locations = get_json(&router, "/api/v1/locations").await;
    assert_eq!(locations["tempo-4"]["source"], "tempo");
    assert_eq!(locations["31"]["source"], "openmeteo");
    assert_eq!(locations["31"]["latitude"], 43.7);
}

#[tokio::test]
async fn quiz_submission_is_posted_through_failover() {
    let transport = ScriptedTransport::new();
    transport.route(A, Reply::status(502));
    transport.route(
        B,
        Reply::json(r#"{"sms": {"status": "skipped", "reason": "SMS is off"}, "insights": null}"#),
    );
    let router = router(&transport);

    let submission = json!({
        "healthSensitivities": ["asthma"],
        "activityType": "commute",
        "audience": "self",
        "interests": ["outdoor_exercise"],
        "region": "Toronto",
        "locationName": "Toronto",
        "latitude": 43.7,
        "longitude": -79.4
    });
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/quiz/responses")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(submission.to_string()))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["sms"]["status"], "skipped");

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert_eq!(call.method, Method::POST);
        assert_eq!(call.url.rsplit_once(".test").unwrap().1, "/quiz/responses");
        let sent: Value = serde_json::from_slice(call.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, submission);
    }

    let incomplete = json!({
        "healthSensitivities": [],
        "activityType": "commute",
        "audience": "self",
        "interests": ["outdoor_exercise"],
        "region": "Toronto",
        "locationName": "Toronto",
        "latitude": 43.7,
        "longitude": -79.4
    });
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/quiz/responses")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(incomplete.to_string()))
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(transport.calls().len(), 2);
}
