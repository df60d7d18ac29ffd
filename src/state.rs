//! Application state composition root
//!
//! Every component is built once here and handed to handlers by dependency
//! injection through axum `State`. Background tasks (sweeper, hub pumps)
//! share one cancellation token owned by the state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthService;
use crate::config::Config;
use crate::embedder::{Embedder, HttpEmbedder};
use crate::error::Result;
use crate::monitor::Monitors;
use crate::registry::Registry;
use crate::search::SearchEngine;
use crate::storage::Storage;
use crate::sweeper::Sweeper;
use crate::ws::Hubs;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Storage,
    pub registry: Registry,
    pub auth: AuthService,
    pub search: SearchEngine,
    pub hubs: Hubs,
    pub monitors: Monitors,
    /// Outbound client for connection forwarding
    pub http_client: reqwest::Client,
    /// Cancels every background task on shutdown
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build all components from configuration
    pub async fn build(config: Config) -> Result<Self> {
        let storage = Storage::connect(&config).await;

        let embedder: Option<Arc<dyn Embedder>> = match &config.embedder {
            Some(embedder_config) => match HttpEmbedder::new(embedder_config.clone()) {
                Ok(embedder) => {
                    tracing::info!(
                        endpoint = %embedder_config.endpoint,
                        dimension = embedder_config.dimension,
                        "Embedder configured"
                    );
                    Some(Arc::new(embedder))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Embedder unavailable, search will use token overlap");
                    None
                }
            },
            None => None,
        };

        let registry = Registry::new(storage.clone(), embedder.clone(), config.registry.clone());
        let auth = AuthService::new(&config, storage.clone())?;
        let search = SearchEngine::new(registry.clone(), embedder, config.search.clone());
        let monitors = Monitors::with_storage(storage.clone());
        let hubs = Hubs::new(&config.websocket, &monitors);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.service.timeout_secs))
            .build()
            .map_err(|e| crate::error::Error::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            storage,
            registry,
            auth,
            search,
            hubs,
            monitors,
            http_client,
            shutdown: CancellationToken::new(),
        })
    }

    /// In-memory state for tests: no Redis, no embedder
    pub async fn for_tests(mut config: Config) -> Result<Self> {
        config.redis = None;
        config.embedder = None;
        Self::build(config).await
    }

    /// Start the sweeper and the hub background tasks
    pub fn spawn_background(&self) {
        self.hubs.spawn_background(
            self.registry.clone(),
            self.monitors.clone(),
            self.shutdown.clone(),
        );
        Sweeper::new(
            self.registry.clone(),
            self.storage.clone(),
            self.hubs.clone(),
            self.monitors.clone(),
        )
        .spawn(self.shutdown.clone());
    }

    /// Cancel background tasks and drain hub queues
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.hubs.shutdown().await;
    }
}
