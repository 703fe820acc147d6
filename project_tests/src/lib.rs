//! Test support shared by the integration tests under `tests/`.
//!
//! - [`ScriptedSource`]: a `DataSource` replaying a fixed list of steps, each
//!   with its own delay, so overlapping refreshes can be ordered precisely.
//! - [`CountingSource`]: always succeeds (or always fails) and counts calls.
//! - [`MockUpstream`]: a local axum server shaped like the Dune results
//!   endpoint that replays scripted HTTP responses and records requests.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use lib_common::core::{Buffer, RefreshPipeline};
use lib_common::retrieve::{DataSource, FetchError, RetryPolicy, UpstreamFetcher};

/// Builds a pipeline over a fresh buffer.
pub fn pipeline_over(source: Arc<dyn DataSource>, policy: RetryPolicy) -> RefreshPipeline {
    RefreshPipeline::new(UpstreamFetcher::new(source, policy), Arc::new(Buffer::new()))
}

/// A retry policy that never waits, for tests running on the real clock.
pub fn no_wait(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        delay: Duration::ZERO,
    }
}

/// One scripted attempt.
#[derive(Debug, Clone)]
pub enum Step {
    /// Succeed with `payload` after `delay`.
    Ok { delay: Duration, payload: Value },
    /// Fail after `delay`.
    Fail { delay: Duration },
}

impl Step {
    pub fn ok(payload: Value) -> Self {
        Step::Ok { delay: Duration::ZERO, payload }
    }

    pub fn ok_after(millis: u64, payload: Value) -> Self {
        Step::Ok { delay: Duration::from_millis(millis), payload }
    }

    pub fn fail() -> Self {
        Step::Fail { delay: Duration::ZERO }
    }
}

/// Replays steps in call order. The step is taken when the attempt starts,
/// so concurrent attempts get steps in the order they were polled first.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataSource for ScriptedSource {
    fn fetch_once(&self) -> BoxFuture<'_, Result<Value, FetchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().map(|mut steps| steps.pop_front()).ok().flatten();

        Box::pin(async move {
            match step {
                Some(Step::Ok { delay, payload }) => {
                    tokio::time::sleep(delay).await;
                    Ok(payload)
                }
                Some(Step::Fail { delay }) => {
                    tokio::time::sleep(delay).await;
                    Err(FetchError::Status { status: 503, body: None })
                }
                None => Err(FetchError::Network("script exhausted".to_string())),
            }
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Succeeds with `{"tick": n}` on every call, or fails on every call.
#[derive(Debug)]
pub struct CountingSource {
    healthy: bool,
    calls: AtomicU32,
}

impl CountingSource {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self { healthy: true, calls: AtomicU32::new(0) })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self { healthy: false, calls: AtomicU32::new(0) })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataSource for CountingSource {
    fn fetch_once(&self) -> BoxFuture<'_, Result<Value, FetchError>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let healthy = self.healthy;
        Box::pin(async move {
            if healthy {
                Ok(json!({ "tick": n }))
            } else {
                Err(FetchError::Network("connection refused".to_string()))
            }
        })
    }
}

/// A request seen by [`MockUpstream`].
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub query_id: String,
    pub params: HashMap<String, String>,
    pub api_key: Option<String>,
}

/// Scripted HTTP response: status and raw body.
pub type MockResponse = (StatusCode, String);

#[derive(Clone, Default)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

/// Local stand-in for `GET /api/v1/query/{id}/results`.
///
/// Responses are served in order; the last one repeats once the script runs out.
pub struct MockUpstream {
    pub base_url: String,
    state: MockState,
}

impl MockUpstream {
    pub async fn spawn(responses: Vec<MockResponse>) -> Self {
        let state = MockState {
            responses: Arc::new(Mutex::new(responses.into_iter().collect())),
            seen: Arc::default(),
        };

        let app = Router::new()
            .route("/api/v1/query/{query_id}/results", get(mock_results))
            .with_state(state.clone());

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.state.seen.lock().expect("seen lock").clone()
    }
}

async fn mock_results(
    State(state): State<MockState>,
    Path(query_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.seen.lock().expect("seen lock").push(SeenRequest {
        query_id,
        params,
        api_key: headers
            .get("x-dune-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    let (status, body) = {
        let mut responses = state.responses.lock().expect("responses lock");
        if responses.len() > 1 {
            responses.pop_front().unwrap_or((StatusCode::OK, "{}".to_string()))
        } else {
            responses
                .front()
                .cloned()
                .unwrap_or((StatusCode::OK, "{}".to_string()))
        }
    };

    (status, [(header::CONTENT_TYPE, "application/json")], body)
}
