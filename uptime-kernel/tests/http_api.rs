//! HTTP surface tests. Requests go straight to the router through
//! `tower::ServiceExt::oneshot`, no socket involved.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uptime_devkit::{Scripted, TestHarness};
use uptime_kernel::http::{build_router, AppState};
use uptime_kernel::RollupJob;

fn app(h: &TestHarness) -> Router {
    build_router(AppState {
        aggregator: h.aggregator.clone(),
        rollups: h.rollups.clone(),
        health: h.health.clone(),
    })
}

async fn send(app: Router, method: Method, uri: &str) -> Response<Body> {
    let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri).await
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn harness_with_history() -> TestHarness {
    let h = TestHarness::new(&[("web", "10.0.0.1"), ("db", "10.0.0.2")]);
    h.transport.set("10.0.0.1", Scripted::Up(1.0));
    h.tick_at("2024-01-01T00:00:00Z").await;
    h.transport.set("10.0.0.1", Scripted::Down);
    h.tick_at("2024-01-01T00:04:00Z").await;
    h
}

#[tokio::test]
async fn liveness_and_system_health() {
    let h = harness_with_history().await;

    let response = get(app(&h), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");

    let response = get(app(&h), "/system/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ticks_completed"], 2);
    assert_eq!(json["hosts_tracked"], 2);
    assert_eq!(json["last_tick"]["at"], "2024-01-01T00:04:00Z");
}

#[tokio::test]
async fn host_listing_joins_directory_and_live_state() {
    let h = harness_with_history().await;

    let json = body_json(get(app(&h), "/hosts").await).await;
    let hosts = json.as_array().unwrap();
    assert_eq!(hosts.len(), 2);
    let web = hosts.iter().find(|v| v["host_id"] == "web").unwrap();
    assert_eq!(web["is_online"], false);
    assert_eq!(web["name"], "WEB");
    assert_eq!(web["last_transition_at"], "2024-01-01T00:04:00Z");

    let response = get(app(&h), "/hosts/db").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["address"], "10.0.0.2");

    let response = get(app(&h), "/hosts/ghost").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn uptime_range_query() {
    let h = harness_with_history().await;

    let response = get(app(&h), "/hosts/web/uptime?from=2024-01-01T00:00:00Z&to=2024-01-01T00:10:00Z").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["host_id"], "web");
    assert_eq!(json["uptime_ms"], 240_000);
    assert_eq!(json["downtime_ms"], 360_000);
    assert_eq!(json["percentage"], 40.0);
}

#[tokio::test]
async fn uptime_rejects_bad_windows_and_unknown_hosts() {
    let h = harness_with_history().await;

    for uri in [
        "/hosts/web/uptime",
        "/hosts/web/uptime?from=last-week",
        "/hosts/web/uptime?from=2024-01-01T00:10:00Z&to=2024-01-01T00:10:00Z",
    ] {
        let response = get(app(&h), uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body_json(response).await["code"], "INVALID_RANGE");
    }

    let response = get(app(&h), "/hosts/ghost/uptime?from=2024-01-01T00:00:00Z&to=2024-01-01T00:10:00Z").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn top_downtime_defaults_and_bounds() {
    let h = harness_with_history().await;

    let response = get(app(&h), "/analytics/top-downtime").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["days"], 7);
    assert_eq!(json["items"].as_array().unwrap().len(), 2);

    let json = body_json(get(app(&h), "/analytics/top-downtime?days=1&limit=1").await).await;
    assert_eq!(json["items"].as_array().unwrap().len(), 1);

    for uri in ["/analytics/top-downtime?days=0", "/analytics/top-downtime?days=91", "/analytics/top-downtime?limit=101"] {
        let response = get(app(&h), uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body_json(response).await["code"], "INVALID_RANGE");
    }

    let response = get(app(&h), "/analytics/top-downtime?days=seven").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn recent_samples_newest_first() {
    let h = harness_with_history().await;
    let json = body_json(get(app(&h), "/hosts/web/samples?limit=1").await).await;
    let samples = json.as_array().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0]["at"], "2024-01-01T00:04:00Z");
    assert_eq!(samples[0]["alive"], false);
}

#[tokio::test]
async fn manual_rollup_trigger() {
    let h = harness_with_history().await;

    let response = send(app(&h), Method::POST, "/rollups/2024-01-01").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["day"], "2024-01-01");
    assert_eq!(json["written"], 2);
    assert_eq!(h.memory().all_rollups().len(), 2);

    let response = send(app(&h), Method::POST, "/rollups/01-01-2024").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(app(&h), Method::POST, "/rollups/2999-01-01").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "DAY_NOT_OVER");
}

#[tokio::test]
async fn manual_rollup_can_be_disabled() {
    let h = harness_with_history().await;
    let router = build_router(AppState {
        aggregator: h.aggregator.clone(),
        rollups: Arc::new(RollupJob::new(h.aggregator.clone(), false, h.health.clone())),
        health: h.health.clone(),
    });

    let response = send(router, Method::POST, "/rollups/2024-01-01").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "ROLLUP_DISABLED");
    assert!(h.memory().all_rollups().is_empty());
}

#[tokio::test]
async fn failed_rollup_rows_surface_as_internal_error() {
    let h = harness_with_history().await;
    h.store.fail_rollups_for("db", true);

    let response = send(app(&h), Method::POST, "/rollups/2024-01-01").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");

    // the healthy host's row is still written
    let rows = h.memory().all_rollups();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].host_id.as_str(), "web");
}
