//! deepcurrent server binary.

use anyhow::Context;
use checkpoint::SqliteCheckpointStore;
use llm::{LlmConfig, OpenAiCompatClient};
use research_core::{EngineConfig, MemoryCancelSignal, PythonSandbox, ResearchEngine};
use server::{create_router, ServerConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use websearch::{HttpSearchClient, SearchConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!(bind = %config.bind_addr, model = %config.llm_model, "starting deepcurrent server");

    let chat = OpenAiCompatClient::new(
        LlmConfig::new(&config.llm_api_key, &config.llm_base_url, &config.llm_model)
            .with_timeout(config.llm_timeout),
    )
    .context("building LLM client")?;

    let search = HttpSearchClient::new(SearchConfig::new(
        &config.search_api_key,
        &config.search_endpoint,
    ))
    .context("building search client")?;

    let checkpoints = SqliteCheckpointStore::connect(&config.database_url)
        .await
        .context("connecting checkpoint store")?;

    let engine = ResearchEngine::new(
        Arc::new(chat),
        Arc::new(search),
        Arc::new(PythonSandbox::new()),
        Some(Arc::new(checkpoints)),
        Arc::new(MemoryCancelSignal::new()),
        EngineConfig {
            max_iterations: config.max_iterations,
        },
    );

    let router = create_router(Arc::new(engine));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("listening on {}", config.bind_addr);

    axum::serve(listener, router).await.context("serving")?;
    Ok(())
}
