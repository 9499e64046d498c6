use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use schat::config::{FileConfig, read_config};
use schat::{ClientConfig, RelayServer, ServerConfig, ServerMetrics, SessionRegistry, client};

#[derive(Parser)]
#[command(name = "schat")]
#[command(about = "Multi-user chat and file relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./schat.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in the foreground
    #[command(alias = "s")]
    Server(ServerArgs),

    /// Join a relay as <username>
    #[command(alias = "c")]
    Client(ClientArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Port to listen on (0 = auto-select; overrides the config file)
    port: Option<u16>,

    /// Host to bind to (overrides the config file)
    #[arg(short = 'b', long)]
    host: Option<String>,
}

#[derive(Parser)]
struct ClientArgs {
    /// Display name to claim
    username: String,

    /// Server port
    port: u16,

    /// Server host
    #[arg(default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = read_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Server(args) => run_server(args, file_config, cli.debug).await,
        Commands::Client(args) => run_client(args, file_config, cli.debug).await,
    }
}

async fn run_server(args: ServerArgs, file_config: FileConfig, debug: bool) -> Result<()> {
    let default_directive = if debug {
        "schat=debug,info"
    } else {
        "schat=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut config = ServerConfig::from_file(&file_config.server);
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    info!(
        idle_timeout = ?config.idle_timeout,
        write_timeout = ?config.write_timeout,
        lock_timeout = ?config.lock_timeout,
        chunk_size = config.chunk_size,
        "Starting schat relay"
    );

    let metrics = Arc::new(ServerMetrics::new());
    let server = RelayServer::bind(config, Arc::new(SessionRegistry::new()), metrics.clone()).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Received shutdown signal, cleaning up...");
        shutdown.cancel();
    });

    server.run(cancel).await?;

    match serde_json::to_string(&metrics.snapshot()) {
        Ok(json) => info!(metrics = %json, "Shutdown complete"),
        Err(e) => warn!("Failed to serialize metrics: {}", e),
    }
    Ok(())
}

async fn run_client(args: ClientArgs, file_config: FileConfig, debug: bool) -> Result<()> {
    // Logs go to stderr so they stay out of the chat transcript.
    let default_directive = if debug { "schat=debug,warn" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = ClientConfig::from_file(&file_config.client);
    let addr = format!("{}:{}", args.host, args.port);
    client::run_client(config, args.username, &addr).await
}
