use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState, SharedState};
use super::db::{BoardDb, DbHandle};
use super::ordering::IndexPolicy;
use super::ws::{self, Notification};

/// Configuration for the board server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub index_policy: IndexPolicy,
    /// Capacity of the notification bus; slower sockets skip what they miss.
    pub ws_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            db_path: PathBuf::from(".taskboard/board.db"),
            dev_mode: false,
            index_policy: IndexPolicy::default(),
            ws_buffer: 256,
        }
    }
}

impl ServerConfig {
    /// Dev mode listens on every interface so a containerised UI can reach it.
    pub fn bind_addr(&self) -> String {
        let host = if self.dev_mode { "0.0.0.0" } else { self.host.as_str() };
        format!("{}:{}", host, self.port)
    }
}

/// Open the database and wire up the shared state.
pub fn build_state(config: &ServerConfig) -> Result<SharedState> {
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = BoardDb::new(&config.db_path)
        .context("Failed to initialize board database")?
        .with_index_policy(config.index_policy);
    let (notifier, _rx) = broadcast::channel::<Notification>(config.ws_buffer.max(1));

    Ok(Arc::new(AppState {
        db: DbHandle::new(db),
        notifier,
    }))
}

/// Build the full application router with the REST API and WebSocket.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the board server and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config)?;

    let mut app = build_router(state);
    if config.dev_mode {
        warn!("dev mode: CORS is permissive and the server listens on all interfaces");
        app = app.layer(CorsLayer::permissive());
    }

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        %local_addr,
        db_path = %config.db_path.display(),
        index_policy = %config.index_policy,
        "task board listening"
    );
    println!("Task board running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C; shutting down");
    }
    info!("shutting down");
}
