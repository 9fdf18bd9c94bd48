use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::sse;
use crate::errors::ProducerError;
use crate::hub::{BroadcastHub, ChangeMonitor};
use crate::producers::cached::ALL_KEYS;
use crate::producers::{
    AgentLister, Bead, BeadCounts, BeadLister, CachedProducers, PaneCapture, ProgressProvider, RunLister,
};

/// Default number of runs returned by `GET /api/runs`.
const DEFAULT_RUN_LIMIT: usize = 50;

/// Default and maximum pane lines for `POST /api/agents/{name}/capture`.
const DEFAULT_CAPTURE_LINES: usize = 200;
const MAX_CAPTURE_LINES: usize = 2000;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub hub: BroadcastHub,
    pub monitor: ChangeMonitor,
    pub producers: CachedProducers,
    pub capture: Arc<dyn PaneCapture>,
    /// Frames buffered per SSE client.
    pub client_buffer: usize,
}

pub type SharedState = Arc<AppState>;

// ── Request / response types ──────────────────────────────────────────

#[derive(Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct InvalidateQuery {
    /// One cache key; all keys when absent.
    pub key: Option<String>,
}

#[derive(Deserialize)]
pub struct CaptureQuery {
    pub lines: Option<usize>,
}

#[derive(Serialize)]
pub struct BeadsResponse {
    pub beads: Vec<Bead>,
    pub counts: BeadCounts,
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    pub invalidated: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResponse {
    pub agent: String,
    pub output: String,
    /// Stream clients the `agent_output` event reached.
    pub delivered: usize,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// An external producer (tmux, bd, a state file) failed.
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<ProducerError> for ApiError {
    fn from(err: ProducerError) -> Self {
        warn!(event = "api_producer_failed", error = %err);
        ApiError::Upstream(err.to_string())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/events", get(sse::events_handler))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{name}/capture", post(capture_agent))
        .route("/api/beads", get(list_beads))
        .route("/api/runs", get(list_runs))
        .route("/api/progress", get(get_progress))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/invalidate", post(invalidate_cache))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_agents(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.producers.list_agents().await?))
}

async fn list_beads(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let beads = state.producers.list_beads().await?;
    let counts = BeadCounts::from_beads(&beads);
    Ok(Json(BeadsResponse { beads, counts }))
}

async fn list_runs(
    State(state): State<SharedState>,
    Query(query): Query<RunsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut runs = state.producers.list_runs().await?;
    runs.truncate(query.limit.unwrap_or(DEFAULT_RUN_LIMIT));
    Ok(Json(runs))
}

async fn get_progress(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.producers.task_progress().await?))
}

async fn cache_stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.producers.stats())
}

async fn invalidate_cache(
    State(state): State<SharedState>,
    Query(query): Query<InvalidateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let invalidated = match query.key {
        Some(key) => {
            if !ALL_KEYS.contains(&key.as_str()) {
                return Err(ApiError::BadRequest(format!(
                    "Unknown cache key '{}'. Valid keys: {}",
                    key,
                    ALL_KEYS.join(", ")
                )));
            }
            state.producers.invalidate(&key);
            vec![key]
        }
        None => {
            state.producers.invalidate_all();
            ALL_KEYS.iter().map(|k| k.to_string()).collect()
        }
    };
    Ok(Json(InvalidateResponse { invalidated }))
}

/// tmux session names as the agent runner creates them.
fn is_valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Capture an agent's pane and push it to every stream client as
/// `agent_output`, or `agent_error` when the capture fails.
async fn capture_agent(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<CaptureQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_agent_name(&name) {
        return Err(ApiError::BadRequest(format!("Invalid agent name '{}'", name)));
    }
    let lines = query
        .lines
        .unwrap_or(DEFAULT_CAPTURE_LINES)
        .clamp(1, MAX_CAPTURE_LINES);

    match state.capture.capture(&name, lines).await {
        Ok(output) => {
            let delivered = state.monitor.broadcast_agent_output(&name, &output);
            Ok(Json(CaptureResponse {
                agent: name,
                output,
                delivered,
            }))
        }
        Err(e) => {
            state.monitor.broadcast_agent_error(&name, &e.to_string());
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ChannelSink;
    use crate::hub::monitor::MonitorConfig;
    use crate::producers::testing::{Fixtures, run};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FakeCapture;

    #[async_trait]
    impl PaneCapture for FakeCapture {
        async fn capture(&self, agent: &str, lines: usize) -> Result<String, ProducerError> {
            if agent == "agent-gone" {
                return Err(ProducerError::CommandFailed {
                    cmd: "tmux capture-pane".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "can't find session: agent-gone".to_string(),
                });
            }
            Ok(format!("{} lines from {}", lines, agent))
        }
    }

    fn test_state(fx: &Fixtures) -> SharedState {
        let hub = BroadcastHub::default();
        let producers = CachedProducers::new(fx.producers(), 100, Duration::from_secs(2));
        let monitor = ChangeMonitor::new(hub.clone(), producers.clone(), MonitorConfig::default());
        Arc::new(AppState {
            hub,
            monitor,
            producers,
            capture: Arc::new(FakeCapture),
            client_buffer: 16,
        })
    }

    fn test_app(state: SharedState) -> Router {
        api_router().with_state(state)
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let fx = Fixtures::new();
        let response = test_app(test_state(&fx)).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_list_agents() {
        let fx = Fixtures::new();
        let response = test_app(test_state(&fx)).oneshot(get("/api/agents")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json[0]["name"], "agent-1");
        assert_eq!(json[0]["runningTimeLabel"], "5m");
    }

    #[tokio::test]
    async fn test_list_beads_includes_counts() {
        let fx = Fixtures::new();
        let response = test_app(test_state(&fx)).oneshot(get("/api/beads")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["beads"].as_array().unwrap().len(), 2);
        assert!(json["counts"].is_object());
    }

    #[tokio::test]
    async fn test_list_runs_respects_limit() {
        let fx = Fixtures::new();
        fx.runs.set(vec![
            run("b-3", "2026-01-03T10:00:00Z", Some(0)),
            run("b-2", "2026-01-02T10:00:00Z", Some(1)),
            run("b-1", "2026-01-01T10:00:00Z", Some(0)),
        ]);
        let response = test_app(test_state(&fx))
            .oneshot(get("/api/runs?limit=2"))
            .await
            .unwrap();
        let json = body_json(response.into_body()).await;
        let runs = json.as_array().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0]["bead"], "b-3");
    }

    #[tokio::test]
    async fn test_progress() {
        let fx = Fixtures::new();
        let response = test_app(test_state(&fx)).oneshot(get("/api/progress")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert!(json.get("prdProgress").is_some());
    }

    #[tokio::test]
    async fn test_producer_failure_is_bad_gateway() {
        let fx = Fixtures::new();
        fx.beads.fail("bd: no database");
        let response = test_app(test_state(&fx)).oneshot(get("/api/beads")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response.into_body()).await;
        assert!(json["error"].as_str().unwrap().contains("no database"));
    }

    #[tokio::test]
    async fn test_cache_stats_and_invalidate() {
        let fx = Fixtures::new();
        let state = test_state(&fx);
        let app = test_app(state.clone());

        app.clone().oneshot(get("/api/agents")).await.unwrap();
        app.clone().oneshot(get("/api/agents")).await.unwrap();
        assert_eq!(fx.agents.calls(), 1);

        let response = app.clone().oneshot(get("/api/cache/stats")).await.unwrap();
        let json = body_json(response.into_body()).await;
        assert_eq!(json["size"], 1);
        assert_eq!(json["hits"], 1);
        assert_eq!(json["misses"], 1);
        assert_eq!(json["hitRate"], 0.5);

        let response = app
            .clone()
            .oneshot(post("/api/cache/invalidate?key=agents"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["invalidated"], serde_json::json!(["agents"]));

        app.clone().oneshot(get("/api/agents")).await.unwrap();
        assert_eq!(fx.agents.calls(), 2);

        let response = app.oneshot(post("/api/cache/invalidate")).await.unwrap();
        let json = body_json(response.into_body()).await;
        assert_eq!(json["invalidated"].as_array().unwrap().len(), ALL_KEYS.len());
        assert_eq!(state.producers.stats().size, 0);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_key_rejected() {
        let fx = Fixtures::new();
        let response = test_app(test_state(&fx))
            .oneshot(post("/api/cache/invalidate?key=everything"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_capture_broadcasts_agent_output() {
        let fx = Fixtures::new();
        let state = test_state(&fx);
        let (sink, mut rx) = ChannelSink::new(8);
        state.hub.add_client(Arc::new(sink));

        let response = test_app(state.clone())
            .oneshot(post("/api/agents/agent-1/capture?lines=10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["output"], "10 lines from agent-1");
        assert_eq!(json["delivered"], 1);

        let frame = rx.recv().await.unwrap();
        assert!(frame.starts_with("event: agent_output\n"));
        assert!(frame.contains("10 lines from agent-1"));
        state.hub.shutdown();
    }

    #[tokio::test]
    async fn test_capture_failure_broadcasts_agent_error() {
        let fx = Fixtures::new();
        let state = test_state(&fx);
        let (sink, mut rx) = ChannelSink::new(8);
        state.hub.add_client(Arc::new(sink));

        let response = test_app(state.clone())
            .oneshot(post("/api/agents/agent-gone/capture"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let frame = rx.recv().await.unwrap();
        assert!(frame.starts_with("event: agent_error\n"));
        assert!(frame.contains("can't find session"));
        state.hub.shutdown();
    }

    #[tokio::test]
    async fn test_capture_rejects_bad_agent_name() {
        let fx = Fixtures::new();
        let response = test_app(test_state(&fx))
            .oneshot(post("/api/agents/a%3Bb/capture"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_agent_name_validation() {
        assert!(is_valid_agent_name("agent-bd-42"));
        assert!(is_valid_agent_name("agent_1.dev"));
        assert!(!is_valid_agent_name(""));
        assert!(!is_valid_agent_name("a:b"));
        assert!(!is_valid_agent_name("a b"));
    }
}
