//! tsgen-ai - term sheet generation service
//!
//! `serve` exposes the HTTP API; `review` runs one session from extraction
//! through an interactive review loop on the terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tsgen_ai::extraction::model_client::OpenAiClient;
use tsgen_ai::extraction::ExtractionEngine;
use tsgen_ai::outputs::OutputWriter;
use tsgen_ai::render::MarkdownRenderer;
use tsgen_ai::schema::term_sheet::TERM_SHEET_KIND;
use tsgen_ai::schema::SchemaRegistry;
use tsgen_ai::session::{CostRates, SessionManager};
use tsgen_ai::sources::DirectorySourceBuilder;
use tsgen_ai::AppState;
use tsgen_common::config::{load_config, resolve_config_path, write_toml_config, TomlConfig};
use tsgen_common::events::EventBus;

#[derive(Debug, Parser)]
#[command(name = "tsgen-ai", version, about = "AI-assisted term sheet generation")]
struct Cli {
    /// Configuration file (overrides TSGEN_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Source document directory
    #[arg(long, global = true, env = "TSGEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory receiving finalized artifacts
    #[arg(long, global = true, env = "TSGEN_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Extract and review one document on the terminal
    Review {
        #[arg(long, default_value = TERM_SHEET_KIND)]
        document_type: String,
    },
    /// Write a default configuration file
    InitConfig {
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(config: &TomlConfig) {
    let fallback = format!("{},hyper=warn,reqwest=warn", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn build_manager(config: &TomlConfig, sources: Arc<DirectorySourceBuilder>) -> Result<SessionManager> {
    let api_key = tsgen_ai::config::resolve_api_key(config)?;
    let client = OpenAiClient::new(&config.model, api_key).context("building model client")?;
    let engine = ExtractionEngine::new(Arc::new(client), sources);
    let registry = SchemaRegistry::with_builtin().context("loading built-in schemas")?;

    let event_bus = EventBus::new(256);
    info!("Event bus initialized (capacity {})", event_bus.capacity());

    Ok(SessionManager::new(
        Arc::new(registry),
        Arc::new(engine),
        Arc::new(MarkdownRenderer),
        event_bus,
    )
    .with_output(OutputWriter::new(&config.output_dir))
    .with_cost_rates(CostRates {
        input_per_million: config.model.input_cost_per_million,
        output_per_million: config.model.output_cost_per_million,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::InitConfig { path, force }) = &cli.command {
        let path = path
            .clone()
            .or_else(|| resolve_config_path(cli.config.as_deref()))
            .or_else(tsgen_common::config::default_config_path)
            .context("no configuration path available; pass one explicitly")?;
        if path.exists() && !force {
            anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
        }
        write_toml_config(&TomlConfig::default(), &path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    config.validate()?;

    init_tracing(&config);
    info!("Starting tsgen-ai {}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {}", config.data_dir.display());
    info!("Output directory: {}", config.output_dir.display());
    info!("Model: {} at {}", config.model.model, config.model.base_url);

    let sources = Arc::new(DirectorySourceBuilder::new(&config.data_dir, config.sources.clone()));
    let manager = Arc::new(build_manager(&config, sources.clone())?);

    match cli.command {
        Some(Command::Review { document_type }) => {
            let session_id = manager.start(&document_type).await?;
            let printer = tsgen_ai::cli::spawn_progress_printer(&manager, session_id);
            let summary = manager.run(session_id).await?;
            let _ = printer.await;

            if !summary.missing_required.is_empty() {
                println!("missing required fields: {}", summary.missing_required.join(", "));
            }
            let finalized =
                tsgen_ai::cli::review_loop(manager, session_id, tokio::io::stdin(), tokio::io::stdout())
                    .await?;
            if finalized {
                println!("Artifacts: {}", config.output_dir.join(session_id.to_string()).display());
            }
        }
        Some(Command::Serve { host, port }) => {
            serve(&config, manager, sources, host, port).await?;
        }
        None | Some(Command::InitConfig { .. }) => serve(&config, manager, sources, None, None).await?,
    }

    Ok(())
}

async fn serve(
    config: &TomlConfig,
    manager: Arc<SessionManager>,
    sources: Arc<DirectorySourceBuilder>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let app = tsgen_ai::build_router(AppState::new(manager, sources));

    let address = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    info!("Listening on http://{}", address);
    info!("Health check: http://{}/health", address);

    axum::serve(listener, app).await?;
    Ok(())
}
