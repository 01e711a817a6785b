//! partsd - parts assistant daemon
//!
//! Loads the catalog, wires the completion and similarity backends into the
//! engine and serves the chat API.

use anyhow::{Context, Result};
use partsd::config::{Config, RetrievalBackend};
use partsd::llm::{HttpLlmBackend, LlmBackend};
use partsd::server::{self, AppState};
use partsd::similarity::{HttpSimilarityIndex, LexicalIndex, SimilarityIndex};
use partsd::truth_store::TruthStore;
use partsd::{logging, Engine};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    info!("partsd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load();

    let store = TruthStore::load(&config.data.parts_path, &config.data.models_path)
        .context("Failed to load parts catalog")?;
    let store = Arc::new(store);
    info!(
        "  Catalog: {} parts, {} models",
        store.part_count(),
        store.model_count()
    );

    if !config.llm.enabled {
        warn!("  LLM disabled: planner falls back to extraction, prose uses templates");
    }
    let llm: Arc<dyn LlmBackend> = Arc::new(
        HttpLlmBackend::new(config.llm.clone()).context("Failed to create LLM client")?,
    );
    info!("  LLM: {} at {}", config.llm.model, config.llm.endpoint);

    let index: Arc<dyn SimilarityIndex> = match config.retrieval.backend {
        RetrievalBackend::Http => {
            let timeout = Duration::from_secs(config.retrieval.timeout_secs);
            match HttpSimilarityIndex::new(&config.retrieval.endpoint, timeout) {
                Ok(index) => Arc::new(index),
                Err(e) => {
                    warn!("  Similarity service unusable ({}), using lexical index", e);
                    Arc::new(LexicalIndex::from_store(&store))
                }
            }
        }
        RetrievalBackend::Lexical => Arc::new(LexicalIndex::from_store(&store)),
    };
    info!("  Similarity index: {}", index.name());

    let engine = Arc::new(Engine::new(config, store, llm, index)?);
    let _pruner = engine.spawn_session_pruner();

    info!("partsd ready");
    server::run(AppState::new(engine)).await
}
