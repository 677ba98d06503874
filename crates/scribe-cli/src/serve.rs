//! Serve command implementation for Scribe CLI.
//!
//! Starts the evaluation server.

use std::path::PathBuf;
use std::time::Duration;

use scribe_server::{ServerConfig, SupervisorConfig};

use crate::colors;

/// Options of `scribe serve`.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub project_dir: Option<PathBuf>,
    pub worker: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}

/// Start the evaluation server.
pub async fn execute(options: ServeOptions) -> anyhow::Result<()> {
    let defaults = SupervisorConfig::default();
    let supervisor = SupervisorConfig {
        worker_path: options.worker,
        timeout: options.timeout_ms.map(Duration::from_millis),
        project_dir: options.project_dir.unwrap_or(defaults.project_dir.clone()),
        ..defaults
    };
    let config = ServerConfig {
        host: options.host,
        port: options.port,
        supervisor,
    };

    println!("\n{}Scribe Server{}", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    println!(
        "{}  ◆ Project:{} {}",
        colors::CYAN,
        colors::RESET,
        config.supervisor.project_dir.display()
    );
    println!(
        "{}  ◆ Server:{} http://{}:{}",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port
    );
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    scribe_server::serve(config).await?;

    Ok(())
}
