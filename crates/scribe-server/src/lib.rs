//! Scribe evaluation server.
//!
//! # Architecture
//!
//! - **Supervisor**: one worker process per notebook evaluation, with
//!   timeouts, stop requests and crash detection
//! - **Worker**: spawning and reading the `scribe-worker` binary
//! - **Protocol**: HTTP request/response envelopes
//! - **Routes**: axum handlers over the supervisor
//!
//! Callers start an evaluation and then poll for its events until
//! `notebook-eval-completed` arrives.

pub mod error;
pub mod protocol;
pub mod routes;
pub mod supervisor;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

pub use error::{ServerError, ServerResult};
pub use protocol::{Command, EvalRequest, StatusResponse, StopRequest};
pub use routes::{AppState, create_router};
pub use supervisor::{SessionState, Supervisor, SupervisorConfig, TERMINATED_MESSAGE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    pub supervisor: SupervisorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// Run the server until Ctrl+C.
pub async fn serve(config: ServerConfig) -> ServerResult<()> {
    let supervisor = Supervisor::new(config.supervisor.clone());
    let state = Arc::new(AppState {
        supervisor: supervisor.clone(),
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| ServerError::InvalidRequest(format!(
            "Invalid address: {}:{}",
            config.host, config.port
        )))?;

    tracing::info!("Starting Scribe server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await?;

    supervisor.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}
