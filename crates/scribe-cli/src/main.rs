//! Scribe CLI - notebook evaluation engine.

mod colors;
mod run;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scribe")]
#[command(about = "Evaluate script notebooks in isolated workers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a notebook headlessly
    Run {
        /// Path to the notebook (.json file)
        notebook: String,

        /// Evaluate up to and including this cell
        #[arg(long)]
        cell: Option<String>,

        /// Evaluate only the cell given with --cell
        #[arg(long, requires = "cell")]
        single_cell: bool,

        /// Directory project modules are loaded from (default: notebook directory)
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// Abort evaluation after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Maximum display events per evaluation
        #[arg(long)]
        max_outputs: Option<usize>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Start the evaluation server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Project directory for modules (default: $SCRIBE_PROJECT_DIR or the data directory)
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// Path to the scribe-worker binary
        #[arg(long)]
        worker: Option<PathBuf>,

        /// Kill evaluations running longer than this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            notebook,
            cell,
            single_cell,
            project_dir,
            timeout_ms,
            max_outputs,
            json,
        } => {
            let options = run::RunOptions {
                cell,
                single_cell,
                project_dir,
                deadline_ms: timeout_ms,
                max_outputs,
                json,
            };
            // Evaluation is synchronous; keep it off the async workers.
            tokio::task::spawn_blocking(move || run::execute(&notebook, options)).await??;
        }

        Commands::Serve {
            host,
            port,
            project_dir,
            worker,
            timeout_ms,
        } => {
            serve::execute(serve::ServeOptions {
                host,
                port,
                project_dir,
                worker,
                timeout_ms,
            })
            .await?;
        }
    }

    Ok(())
}
