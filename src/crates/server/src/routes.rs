//! API route definitions.

use crate::handlers;
use axum::{
    routing::{delete, get, post},
    Router,
};
use research_core::ResearchEngine;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ResearchEngine>,
}

/// Build the complete API router.
pub fn create_router(engine: Arc<ResearchEngine>) -> Router {
    let app_state = AppState { engine };

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/research/stream",
            post(handlers::stream_research_post).get(handlers::stream_research_get),
        )
        .route("/research/cancel/:session_id", post(handlers::cancel_research))
        .route("/research/resume/:session_id", post(handlers::resume_research))
        .route(
            "/research/checkpoint/:session_id",
            get(handlers::get_checkpoint).delete(handlers::delete_checkpoint),
        )
        .route("/research/checkpoints", get(handlers::list_checkpoints))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use llm::{ChatClient, ChatOptions};
    use research_core::sandbox::{CodeRunner, ExecutionOutcome};
    use research_core::{EngineConfig, MemoryCancelSignal};
    use tower::util::ServiceExt;

    struct NullChat;

    #[async_trait]
    impl ChatClient for NullChat {
        async fn chat(&self, _: &str, _: &str, _: &ChatOptions) -> llm::Result<String> {
            Ok("{}".to_string())
        }
    }

    struct NullSearch;

    #[async_trait]
    impl websearch::SearchClient for NullSearch {
        async fn search(
            &self,
            _: &str,
            _: usize,
        ) -> websearch::Result<Vec<websearch::SearchResult>> {
            Ok(Vec::new())
        }
    }

    struct NullRunner;

    #[async_trait]
    impl CodeRunner for NullRunner {
        async fn execute(&self, _: &str) -> ExecutionOutcome {
            ExecutionOutcome::failure("disabled")
        }
    }

    fn test_router() -> Router {
        let engine = ResearchEngine::new(
            Arc::new(NullChat),
            Arc::new(NullSearch),
            Arc::new(NullRunner),
            None,
            Arc::new(MemoryCancelSignal::new()),
            EngineConfig::default(),
        );
        create_router(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = test_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cancel_endpoint() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/research/cancel/some-session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_checkpoint_lookup_without_store() {
        // Checkpointing disabled: the endpoint still answers 200 with
        // success: false.
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/research/checkpoint/unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stream_endpoint_content_type() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/research/stream")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query": "q", "max_iterations": 0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("text/event-stream"));
    }
}
