//! Composition root for the research API server
//!
//! Wires the local model runner, the in-memory retriever and the model
//! registry into the HTTP surface. Configuration comes from
//! `kgforge.yaml` (when present) and `KGFORGE_HTTP_` environment
//! variables.

use kgforge_adapter_in_memory::InMemoryRetriever;
use kgforge_connector_ollama::{OllamaConfig, OllamaConnector};
use kgforge_core::registry::{ModelRegistry, StaticModelResolver};
use kgforge_http::{serve, AppState, HttpConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = Path::new("kgforge.yaml");
    let http_config = HttpConfig::load(config_path.exists().then_some(config_path))?;

    let gateway = Arc::new(OllamaConnector::new(OllamaConfig::default())?);
    let retriever = Arc::new(InMemoryRetriever::new());
    let model_registry = Arc::new(ModelRegistry::new(Box::new(StaticModelResolver::default())));

    info!(bind_address = %http_config.bind_address, "starting research api");

    let state = AppState::new(gateway, retriever, model_registry, http_config);
    serve(state).await?;

    Ok(())
}
