//! HTTP research surface for KgForge
//!
//! Exposes the deep research polling API (start / status / result / cancel
//! / export) and the streaming SSE variant over one axum router. Each
//! research session runs as a background task owning its state behind a
//! synchronized handle; the registry evicts terminal sessions after a
//! retention window.

use axum::{
    routing::{get, post},
    Router,
};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use kgforge_core::errors::ConfigError;
use kgforge_core::registry::ModelRegistry;
use kgforge_core::research::ResearchDeps;
use kgforge_core::traits::{LlmGateway, Retriever};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub mod handlers;
pub mod models;
pub mod sessions;

use sessions::SessionRegistry;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Server bind address
    pub bind_address: SocketAddr,
    /// Enable permissive CORS
    pub enable_cors: bool,
    /// Retention for terminal sessions before eviction
    #[serde(with = "duration_secs")]
    pub session_retention: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".parse().expect("static address"),
            enable_cors: true,
            session_retention: Duration::from_secs(3600),
        }
    }
}

impl HttpConfig {
    /// Load from an optional YAML file and `KGFORGE_HTTP_` env vars
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment =
            Figment::from(figment::providers::Serialized::defaults(HttpConfig::default()));
        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Yaml::file(path));
            } else {
                return Err(ConfigError::File(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
        }
        figment = figment.merge(Env::prefixed("KGFORGE_HTTP_"));
        figment
            .extract()
            .map_err(|e| ConfigError::File(format!("failed to parse configuration: {}", e)))
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn LlmGateway>,
    pub retriever: Arc<dyn Retriever>,
    pub model_registry: Arc<ModelRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub config: HttpConfig,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        retriever: Arc<dyn Retriever>,
        model_registry: Arc<ModelRegistry>,
        config: HttpConfig,
    ) -> Self {
        Self {
            gateway,
            retriever,
            model_registry,
            sessions: Arc::new(SessionRegistry::new()),
            config,
        }
    }

    /// Collaborator bundle for the research graph
    pub fn research_deps(&self) -> ResearchDeps {
        ResearchDeps {
            gateway: Arc::clone(&self.gateway),
            retriever: Arc::clone(&self.retriever),
            model_registry: Arc::clone(&self.model_registry),
        }
    }
}

/// Build the router with all research routes
pub fn build_router(state: AppState) -> Router {
    let enable_cors = state.config.enable_cors;

    let mut router = Router::new()
        .route("/health", get(handlers::health::health_check))
        // Streaming research variant
        .route("/api/v1/research", post(handlers::stream::stream_research))
        // Deep research (polling)
        .route(
            "/api/v1/research/deep",
            post(handlers::research::start_deep_research),
        )
        .route(
            "/api/v1/research/deep/:id/status",
            get(handlers::research::get_research_status),
        )
        .route(
            "/api/v1/research/deep/:id",
            get(handlers::research::get_research_result),
        )
        .route(
            "/api/v1/research/deep/:id/cancel",
            post(handlers::research::cancel_research),
        )
        .route(
            "/api/v1/research/deep/:id/export",
            get(handlers::research::export_research),
        )
        .with_state(state);

    if enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Serve the research API until the process terminates
pub async fn serve(state: AppState) -> Result<(), std::io::Error> {
    let bind_address = state.config.bind_address;
    let router = build_router(state);

    info!(%bind_address, "research_api_listening");
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    axum::serve(listener, router).await
}
