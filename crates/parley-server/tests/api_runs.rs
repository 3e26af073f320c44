//! Run lifecycle API tests over the full router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use parley_engine::{EngineSettings, SessionEngine};
use parley_provider::{ProviderClient, ScriptedProvider};
use parley_server::{app, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_app(name: &str, max_concurrent_runs: u32) -> (Router, Arc<ScriptedProvider>) {
    let uri = format!("file:{name}?mode=memory&cache=shared");
    let pool = parley_db::create_pool(
        &uri,
        parley_db::DbRuntimeSettings {
            busy_timeout_ms: 5_000,
            pool_max_size: 1,
        },
    )
    .expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    parley_db::run_migrations(&conn).expect("failed to run migrations");
    conn.execute(
        "INSERT INTO agents (agent_id, owner_id, display_name, system_prompt, greeting, max_concurrent_runs)
         VALUES ('support', 'acme', 'Support Bot', 'You are a support agent.', 'Welcome!', ?1)",
        [max_concurrent_runs],
    )
    .expect("failed to seed agent");

    let provider = Arc::new(ScriptedProvider::new());
    let engine = Arc::new(SessionEngine::new(
        pool.clone(),
        Arc::clone(&provider) as Arc<dyn ProviderClient>,
        EngineSettings::default(),
    ));
    (app(AppState { pool, engine }), provider)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn start_turn_and_end_a_web_run() {
    let (app, _provider) = test_app("api_web_flow", 5);

    let (status, run) = post_json(
        &app,
        "/api/runs",
        json!({ "agent_id": "support", "channel": "WEB" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(run["status"], "IN_PROGRESS");
    assert!(run["run_number"].as_str().unwrap().starts_with("WEB-"));
    let run_id = run["run_id"].as_str().unwrap().to_string();

    let (status, reply) = post_json(
        &app,
        &format!("/api/runs/{run_id}/turns"),
        json!({ "utterance": "hello" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!reply["text"].as_str().unwrap().is_empty());
    assert!(reply.get("ended").is_none());

    let (status, entries) = get_json(&app, &format!("/api/runs/{run_id}/transcript")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entries.as_array().unwrap().len(), 2);
    assert_eq!(entries[0]["speaker"], "CALLER");
    assert_eq!(entries[1]["speaker"], "AGENT");

    let (status, ended) = post_json(&app, &format!("/api/runs/{run_id}/end"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["run"]["status"], "COMPLETED");
    assert_eq!(ended["run"]["disposition"], "caller_hangup");
    assert!(ended["run"]["duration_seconds"].as_i64().unwrap() >= 0);
    assert_eq!(ended["transcript"].as_array().unwrap().len(), 2);

    // A second end with a different disposition changes nothing.
    let (status, again) = post_json(
        &app,
        &format!("/api/runs/{run_id}/end"),
        json!({ "disposition": "provider_error" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["run"]["disposition"], "caller_hangup");
}

#[tokio::test]
async fn bad_inputs_get_client_errors() {
    let (app, _provider) = test_app("api_bad_inputs", 5);

    let (status, _) = post_json(
        &app,
        "/api/runs",
        json!({ "agent_id": "support", "channel": "FAX" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        &app,
        "/api/runs",
        json!({ "agent_id": "support", "channel": "PHONE" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        &app,
        "/api/runs",
        json!({ "agent_id": "ghost", "channel": "WEB" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, "/api/runs/no-such-run").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ceiling_overflow_returns_429_with_retry_after() {
    let (app, _provider) = test_app("api_ceiling", 1);

    let (status, _) = post_json(
        &app,
        "/api/runs",
        json!({ "agent_id": "support", "channel": "WEB" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/runs")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "agent_id": "support", "channel": "WEB" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // No phantom row for the rejected request.
    let (_, runs) = get_json(&app, "/api/runs").await;
    assert_eq!(runs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn terminal_run_rejects_further_turns() {
    let (app, _provider) = test_app("api_terminal_turn", 5);

    let (_, run) = post_json(
        &app,
        "/api/runs",
        json!({ "agent_id": "support", "channel": "WEB" }),
    )
    .await;
    let run_id = run["run_id"].as_str().unwrap().to_string();
    post_json(&app, &format!("/api/runs/{run_id}/end"), json!({})).await;

    let (status, _) = post_json(
        &app,
        &format!("/api/runs/{run_id}/turns"),
        json!({ "utterance": "anyone there?" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn fix_endpoint_forces_a_run_terminal() {
    let (app, _provider) = test_app("api_fix", 1);

    let (_, run) = post_json(
        &app,
        "/api/runs",
        json!({ "agent_id": "support", "channel": "WEB" }),
    )
    .await;
    let run_id = run["run_id"].as_str().unwrap().to_string();

    let (status, fixed) = post_json(&app, &format!("/api/runs/{run_id}/fix"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fixed["recovered"], true);
    assert_eq!(fixed["run"]["status"], "FAILED");
    assert_eq!(fixed["run"]["disposition"], "stuck_recovered");

    // The forced recovery freed the owner's only slot.
    let (status, _) = post_json(
        &app,
        "/api/runs",
        json!({ "agent_id": "support", "channel": "WEB" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Fixing an already-terminal run is a no-op.
    let (status, fixed) = post_json(&app, &format!("/api/runs/{run_id}/fix"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fixed["recovered"], false);
}

#[tokio::test]
async fn list_runs_filters_by_status() {
    let (app, _provider) = test_app("api_list", 5);

    for _ in 0..2 {
        post_json(
            &app,
            "/api/runs",
            json!({ "agent_id": "support", "channel": "WEB" }),
        )
        .await;
    }
    let (_, runs) = get_json(&app, "/api/runs?status=IN_PROGRESS").await;
    assert_eq!(runs.as_array().unwrap().len(), 2);

    let (_, runs) = get_json(&app, "/api/runs?status=COMPLETED").await;
    assert_eq!(runs.as_array().unwrap().len(), 0);

    let (status, _) = get_json(&app, "/api/runs?status=BOGUS").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
