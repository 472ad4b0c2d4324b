//! Research streaming, cancel, and resume handlers.

use crate::routes::AppState;
use crate::sse::{sse_response, BoxedEventStream};
use axum::{
    extract::{Path, Query, State},
    response::sse::Sse,
    Json,
};
use research_core::RunOptions;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// Body of `POST /research/stream`.
#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub resume: Option<bool>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Query string of `GET /research/stream`.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub resume: Option<bool>,
}

type EventStream = Sse<BoxedEventStream>;

fn start_stream(
    app: &AppState,
    query: String,
    session_id: Option<String>,
    max_iterations: Option<u32>,
    resume: bool,
    user_id: Option<String>,
) -> EventStream {
    let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(%session_id, resume, "starting research stream");

    let stream = app.engine.run(
        query,
        session_id,
        RunOptions {
            resume,
            user_id,
            max_iterations,
        },
    );

    sse_response(stream)
}

/// `POST /research/stream` — run a research session, streaming events
/// as SSE until `[DONE]`.
pub async fn stream_research_post(
    State(app): State<AppState>,
    Json(request): Json<ResearchRequest>,
) -> EventStream {
    start_stream(
        &app,
        request.query,
        request.session_id,
        request.max_iterations,
        request.resume.unwrap_or(false),
        request.user_id,
    )
}

/// `GET /research/stream` — same contract via query parameters.
pub async fn stream_research_get(
    State(app): State<AppState>,
    Query(params): Query<StreamParams>,
) -> EventStream {
    start_stream(
        &app,
        params.query,
        params.session_id,
        params.max_iterations,
        params.resume.unwrap_or(false),
        None,
    )
}

/// `POST /research/cancel/:session_id` — raise the cancellation flag.
pub async fn cancel_research(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    app.engine.cancel_signal().request_cancel(&session_id);
    info!(%session_id, "research cancellation requested");
    Json(json!({"success": true, "message": "Research cancellation requested"}))
}

/// `POST /research/resume/:session_id` — resume a checkpointed session,
/// streaming from the saved phase.
pub async fn resume_research(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> EventStream {
    // The saved query keeps a fallback fresh run meaningful when the
    // checkpoint has vanished between listing and resuming.
    let query = match app.engine.checkpoint_store() {
        Some(store) => store
            .get_info(&session_id)
            .await
            .ok()
            .flatten()
            .map(|info| info.query)
            .unwrap_or_default(),
        None => String::new(),
    };

    start_stream(&app, query, Some(session_id), None, true, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialization() {
        let request: ResearchRequest = serde_json::from_str(
            r#"{"query": "中国新能源汽车2024市场", "max_iterations": 2, "resume": false}"#,
        )
        .unwrap();
        assert_eq!(request.query, "中国新能源汽车2024市场");
        assert_eq!(request.max_iterations, Some(2));
        assert_eq!(request.resume, Some(false));
        assert!(request.session_id.is_none());
    }

    #[test]
    fn test_request_minimal_body() {
        let request: ResearchRequest = serde_json::from_str(r#"{"query": "q"}"#).unwrap();
        assert!(request.session_id.is_none());
        assert!(request.max_iterations.is_none());
        assert!(request.resume.is_none());
    }
}
