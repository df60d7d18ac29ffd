//! # arcp
//!
//! Agent Registry & Control Protocol: a control-plane service for
//! registering, authenticating, discovering, monitoring, and routing
//! connections to autonomous agents.
//!
//! The core subsystems:
//!
//! - **Registry** — agent lifecycle (temp-token → registered → alive/dead →
//!   unregistered), metadata, metrics, and embedding ownership
//! - **Auth core** — JWT-style tokens (admin/agent/temp/scrape), session
//!   PINs, fingerprint binding, attempt ledger, rate limits
//! - **Search** — cosine ranking over embeddings with a token-overlap
//!   fallback and optional reputation weighting
//! - **WS hubs** — public/agent/dashboard broadcasters with bounded
//!   fan-out and slow-consumer handling
//! - **Sweeper** — periodic liveness transitions, aggregated metrics, and
//!   alert evaluation
//!
//! ## Example
//!
//! ```rust,no_run
//! use arcp::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::build(config.clone()).await?;
//!     state.spawn_background();
//!
//!     let app = arcp::http::router(state.clone());
//!     Server::new(config).serve(app, state).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod embedder;
pub mod error;
pub mod http;
pub mod monitor;
pub mod observability;
pub mod pagination;
pub mod registry;
pub mod search;
pub mod server;
pub mod state;
pub mod storage;
pub mod sweeper;
pub mod ws;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::{AuthService, Claims, Role};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::monitor::{Alert, AlertSeverity, LogLevel};
    pub use crate::observability::init_tracing;
    pub use crate::registry::{
        AgentRecord, AgentStatus, Registry, RegistrationRequest, RegistryEvent,
    };
    pub use crate::search::{SearchEngine, SearchRequest};
    pub use crate::server::Server;
    pub use crate::state::AppState;
    pub use crate::storage::{Storage, StorageMode};
    pub use crate::sweeper::Sweeper;
    pub use crate::ws::Hubs;
}
