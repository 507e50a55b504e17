//! TeachMe Server - Web backend for a conversational English-practice
//! application.
//!
//! This crate provides:
//! - Account management and teacher/student friendship relations
//! - Conversation lifecycle (create, initialize, chat, end)
//! - An in-memory chat session registry with an idle sweep
//! - LLM-backed reply generation through a prompt-templating layer
//! - Asynchronous post-processing (feedback, challenges, summaries)
//!
//! ## Architecture
//!
//! ```text
//! Client → Routes → SessionRegistry → ChatSession → ReplyGenerator (LLM)
//!                         ↓                 ↓
//!                   idle sweeper      PostProcessor → document store
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod audio;
pub mod postprocess;
pub mod prompts;
pub mod provider;
pub mod routes;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use provider::{ChatTurn, OpenAiProvider, ProviderError, ReplyGenerator};
pub use routes::{build_state, AppState};
pub use session::{ChatSession, Reply, SessionRegistry};
pub use store::Database;

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use teachme_common::config::Config;
use tower_http::cors::{Any, CorsLayer};

/// Build the backend router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::build_all_routes(state).layer(cors)
}

/// Start the backend server.
///
/// Opens the document database, wires the LLM provider, spawns the idle
/// sweeper, and serves the router until the process exits.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let db = Database::open(&config.database.resolved_path())?;
    let generator: Arc<dyn ReplyGenerator> = Arc::new(OpenAiProvider::from_config(&config.llm)?);

    let state = build_state(config, db, generator);

    // The single long-lived background task scanning for idle sessions.
    tokio::spawn(session::run_idle_sweeper(
        state.registry.clone(),
        Duration::from_secs(config.chatbot.sweep_interval_secs),
    ));

    let router = build_router(state);

    tracing::info!("Starting TeachMe Server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
