use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use pricewatch_core::config::DispatchConfig;
use pricewatch_core::testutil::{MemoryDispatcher, MockExecutor, memory_dispatcher};
use pricewatch_server::routes;
use pricewatch_server::state::AppState;

/// Router over in-memory storage with a running completion consumer.
pub struct TestApp {
    pub router: Router,
    pub dispatcher: MemoryDispatcher,
    pub executor: MockExecutor,
    pub shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn setup_test_app() -> TestApp {
    setup_test_app_with(MockExecutor::accepting())
}

pub fn setup_test_app_with(executor: MockExecutor) -> TestApp {
    let dispatcher = memory_dispatcher(executor.clone(), DispatchConfig::default());
    let (completions, reports) = mpsc::channel(16);
    let shutdown = CancellationToken::new();

    {
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run_completions(reports, shutdown).await });
    }

    let state = Arc::new(AppState {
        control: Arc::new(dispatcher.clone()),
        completions,
        db: None,
    });

    TestApp {
        router: routes::router(state),
        dispatcher,
        executor,
        shutdown,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(Request::delete(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.send(json_request("POST", uri, body)).await
    }

    pub async fn put_json(
        &self,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.send(json_request("PUT", uri, body)).await
    }

    /// Register an engine through the API and return its id.
    pub async fn register_engine(&self, name: &str, port: u16, active: bool) -> i64 {
        let (status, json) = self
            .post_json(
                "/v1/engines",
                serde_json::json!({
                    "name": name,
                    "host": "127.0.0.1",
                    "port": port,
                    "active": active,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        json["id"].as_i64().unwrap()
    }

    /// Poll a job until its status matches, for effects applied by the
    /// completion consumer.
    pub async fn wait_for_status(&self, job_id: &str, expected: &str) -> serde_json::Value {
        for _ in 0..100 {
            let (_, job) = self.get(&format!("/v1/jobs/{job_id}")).await;
            if job["status"] == expected {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} never reached status {expected}");
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
