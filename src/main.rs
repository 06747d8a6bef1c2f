//! Lingo · Exercise & Grading Backend
//!
//! - Axum HTTP + WebSocket API (exercise play runs over `/ws`)
//! - Optional pronunciation scoring via an external Gradio service
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   SPEECH_BASE_URL     : enables pronunciation scoring if present
//!   SPEECH_API_NAME     : default "run_eval"
//!   SPEECH_TIMEOUT_SECS : default 60
//!   LINGO_CONFIG_PATH   : path to TOML config (speech tags, defaults, seed chapters)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod schema;
mod grading;
mod builder;
mod speech;
mod speech_client;
mod session;
mod store;
mod error;
mod auth;
mod seeds;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: store (seeded), speech client, config.
  let state = Arc::new(AppState::new().await);

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "lingo_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!(target: "lingo_backend", "Shutdown signal received");
    })
    .await?;
  Ok(())
}
