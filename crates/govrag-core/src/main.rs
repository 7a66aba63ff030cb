//! Binary entry point: loads config, opens the index adapters and session
//! store, wires the Chat Orchestrator, and serves the HTTP surface.

use std::sync::Arc;

use govrag_core::config::GovRagConfig;
use govrag_core::http::{self, AppState};
use govrag_core::index::{LanceVectorIndex, TantivyLexicalIndex};
use govrag_core::llm::external::ExternalProvider;
use govrag_core::llm::ApiProvider;
use govrag_core::orchestrator::ChatOrchestrator;
use govrag_core::session::{SessionStore, SessionStoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::var("GOVRAG_CONFIG") {
        Ok(path) => GovRagConfig::from_file(std::path::Path::new(&path)).map_err(anyhow::Error::msg)?,
        Err(_) => GovRagConfig::default(),
    };
    config.validate().map_err(anyhow::Error::msg)?;

    let lexical = Arc::new(TantivyLexicalIndex::open(&config.index.lexical_index_path)?);
    let vector = Arc::new(LanceVectorIndex::open(&config.index.vector_index_path, config.embedding.dimension).await?);

    let endpoint = config.llm.endpoint.clone();
    let api_key = std::env::var("GOVRAG_LLM_API_KEY").unwrap_or_default();
    let llm = Arc::new(ExternalProvider::new(
        ApiProvider::Custom { endpoint },
        api_key,
        config.llm.model.clone(),
    )?);

    let session_store = Arc::new(SessionStore::new(SessionStoreConfig {
        storage_path: config.index.data_dir.join("sessions"),
        recent_doc_ids_cap: config.session.recent_doc_ids_cap,
    })?);

    // The cross-encoder reranker and the embedder are external ONNX/model
    // collaborators; absent a configured model directory, the
    // orchestrator falls back to lexical-only retrieval and skips reranking.
    let reranker_engine = std::env::var("GOVRAG_RERANKER_MODEL_DIR")
        .ok()
        .and_then(|dir| govrag_core::reranking::CrossEncoderReranker::new(std::path::Path::new(&dir)).ok())
        .map(Arc::new);

    let orchestrator = Arc::new(ChatOrchestrator::new(
        lexical,
        vector,
        None,
        reranker_engine,
        llm,
        session_store.clone(),
        config.clone(),
    ));

    let app = http::router(AppState { orchestrator, sessions: session_store });
    let addr = format!("0.0.0.0:{}", config.server.port);
    tracing::info!("govrag-core listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
