//! HTTP streaming surface for the deepcurrent research engine.
//!
//! One streaming endpoint (`/research/stream`, POST or GET) converts the
//! engine's event stream into SSE frames terminated by `data: [DONE]`;
//! the companion endpoints cancel a running session, inspect and delete
//! checkpoints, and resume a checkpointed session from its saved phase.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod sse;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use routes::{create_router, AppState};
