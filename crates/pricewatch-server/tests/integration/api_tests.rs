use axum::http::StatusCode;
use serde_json::json;

use pricewatch_core::engine::EngineId;
use pricewatch_core::registry::EngineRegistry;
use pricewatch_core::testutil::MockExecutor;

use crate::integration::common::{setup_test_app, setup_test_app_with};

#[tokio::test]
async fn health_reports_memory_storage() {
    let app = setup_test_app();

    let (status, json) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["storage"], "memory");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = setup_test_app();

    let (status, json) = app.get("/api-docs/openapi.json").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/v1/products"].is_object());
    assert!(json["paths"]["/v1/engines/{id}/active"].is_object());
}

#[tokio::test]
async fn register_and_list_engines() {
    let app = setup_test_app();
    let first = app.register_engine("engine-a", 8001, false).await;
    let second = app.register_engine("engine-b", 8002, true).await;

    let (status, json) = app.get("/v1/engines").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["engines"][0]["id"], first);
    assert_eq!(json["engines"][0]["active"], false);
    assert_eq!(json["engines"][1]["id"], second);
    assert_eq!(json["engines"][1]["host"], "127.0.0.1");
    assert_eq!(json["engines"][1]["task_count"], 0);
}

#[tokio::test]
async fn register_engine_rejects_bad_input() {
    let app = setup_test_app();
    app.register_engine("engine-a", 8001, false).await;

    let (status, json) = app
        .post_json(
            "/v1/engines",
            json!({"name": "engine-a", "host": "127.0.0.1", "port": 8002}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");

    let (status, _) = app
        .post_json(
            "/v1/engines",
            json!({"name": "engine-b", "host": "scraper.local", "port": 8002}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post_json(
            "/v1/engines",
            json!({"name": "", "host": "10.0.0.1", "port": 8002}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn track_product_without_engines_is_no_capacity() {
    let app = setup_test_app();
    app.register_engine("engine-a", 8001, false).await;

    let (status, json) = app
        .post_json(
            "/v1/products",
            json!({"url": "https://shop.example/p/1", "email": "owner@example.com"}),
        )
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "failed");
    assert_eq!(json["failure_reason"], "no_capacity");
    assert!(json["engine"].is_null());

    let (_, engines) = app.get("/v1/engines").await;
    assert_eq!(engines["engines"][0]["task_count"], 0);
}

#[tokio::test]
async fn track_product_assigns_least_loaded_engine() {
    let app = setup_test_app();
    let a = app.register_engine("engine-a", 8001, true).await;
    let b = app.register_engine("engine-b", 8002, true).await;

    let (status, first) = app
        .post_json("/v1/products", json!({"url": "https://shop.example/p/1"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "running");
    assert_eq!(first["engine"]["id"], a);
    assert_eq!(first["attempts"], 1);

    let (_, second) = app
        .post_json("/v1/products", json!({"url": "https://shop.example/p/2"}))
        .await;
    assert_eq!(second["engine"]["id"], b);

    assert_eq!(app.executor.started_on(), vec![EngineId(a), EngineId(b)]);
}

#[tokio::test]
async fn track_product_validates_url() {
    let app = setup_test_app();

    let (status, json) = app
        .post_json("/v1/products", json!({"url": "file:///etc/passwd"}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");

    let (status, json) = app
        .post_json(
            "/v1/products",
            json!({"url": "https://shop.example/p/1", "max_attempts": 0}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn track_product_retries_exhausted_is_bad_gateway() {
    let app = setup_test_app_with(MockExecutor::with_unreachable(&[EngineId(1)]));
    app.register_engine("engine-a", 8001, true).await;

    let (status, json) = app
        .post_json(
            "/v1/products",
            json!({"url": "https://shop.example/p/1", "max_attempts": 2}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["failure_reason"], "retries_exhausted");
    assert_eq!(json["attempts"], 2);
    assert_eq!(app.executor.started_on().len(), 2);
}

#[tokio::test]
async fn completion_report_releases_engine() {
    let app = setup_test_app();
    let engine = app.register_engine("engine-a", 8001, true).await;

    let (_, tracked) = app
        .post_json("/v1/products", json!({"url": "https://shop.example/p/1"}))
        .await;
    let job_id = tracked["job_id"].as_str().unwrap().to_string();

    let (status, json) = app
        .post_json(
            &format!("/v1/jobs/{job_id}/completion"),
            json!({"outcome": "succeeded"}),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["queued"], true);

    let job = app.wait_for_status(&job_id, "succeeded").await;
    assert_eq!(job["engine_id"], engine);
    assert!(job["completed_at"].is_string());

    let loaded = app
        .dispatcher
        .registry()
        .get(EngineId(engine))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.task_count, 0);
}

#[tokio::test]
async fn unreachable_report_reassigns_job() {
    let app = setup_test_app();
    let a = app.register_engine("engine-a", 8001, true).await;
    let b = app.register_engine("engine-b", 8002, true).await;

    let (_, tracked) = app
        .post_json("/v1/products", json!({"url": "https://shop.example/p/1"}))
        .await;
    assert_eq!(tracked["engine"]["id"], a);
    let job_id = tracked["job_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .put_json(&format!("/v1/engines/{a}/active"), json!({"active": false}))
        .await;
    assert_eq!(status, StatusCode::OK);

    app.post_json(
        &format!("/v1/jobs/{job_id}/completion"),
        json!({"outcome": "failed_unreachable", "message": "connection reset"}),
    )
    .await;

    for _ in 0..100 {
        let (_, job) = app.get(&format!("/v1/jobs/{job_id}")).await;
        if job["engine_id"] == b {
            assert_eq!(job["status"], "running");
            assert_eq!(job["attempts"], 2);
            let (_, engines) = app.get("/v1/engines").await;
            assert_eq!(engines["engines"][0]["task_count"], 0);
            assert_eq!(engines["engines"][1]["task_count"], 1);
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("job was never reassigned to engine {b}");
}

#[tokio::test]
async fn completion_for_unknown_job_is_404() {
    let app = setup_test_app();

    let (status, json) = app
        .post_json(
            "/v1/jobs/00000000-0000-0000-0000-000000000000/completion",
            json!({"outcome": "succeeded"}),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn get_nonexistent_job_returns_404() {
    let app = setup_test_app();

    let (status, json) = app
        .get("/v1/jobs/00000000-0000-0000-0000-000000000000")
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn cancel_running_job_then_conflict() {
    let app = setup_test_app();
    let engine = app.register_engine("engine-a", 8001, true).await;

    let (_, tracked) = app
        .post_json("/v1/products", json!({"url": "https://shop.example/p/1"}))
        .await;
    let job_id = tracked["job_id"].as_str().unwrap().to_string();

    let (status, json) = app.delete(&format!("/v1/jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "cancelled");
    assert_eq!(app.executor.aborted.lock().unwrap().len(), 1);

    let (_, engines) = app.get("/v1/engines").await;
    assert_eq!(engines["engines"][0]["id"], engine);
    assert_eq!(engines["engines"][0]["task_count"], 0);

    let (status, json) = app.delete(&format!("/v1/jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "conflict");
}

#[tokio::test]
async fn list_jobs_with_status_filter() {
    let app = setup_test_app();
    app.register_engine("engine-a", 8001, true).await;

    app.post_json("/v1/products", json!({"url": "https://shop.example/p/1"}))
        .await;
    app.put_json("/v1/engines/1/active", json!({"active": false}))
        .await;
    app.post_json("/v1/products", json!({"url": "https://shop.example/p/2"}))
        .await;

    let (status, all) = app.get("/v1/jobs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["total"], 2);

    let (_, failed) = app.get("/v1/jobs?status=failed").await;
    assert_eq!(failed["total"], 1);
    assert_eq!(failed["jobs"][0]["failure_reason"], "no_capacity");

    let (status, json) = app.get("/v1/jobs?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn set_active_on_unknown_engine_is_404() {
    let app = setup_test_app();

    let (status, _) = app
        .put_json("/v1/engines/99/active", json!({"active": true}))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
