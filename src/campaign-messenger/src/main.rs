//! Campaign Messenger: topic-based WhatsApp/SMS campaign execution.
//!
//! Main entry point: loads configuration, wires the store, send provider,
//! and engine, then either serves the HTTP API or executes one run.

use campaign_api::ApiServer;
use campaign_channels::{LogProvider, SendProvider, TwilioProvider};
use campaign_core::clock::system_clock;
use campaign_core::config::{AppConfig, ProviderKind, StoreBackend};
use campaign_orchestration::{CampaignEngine, CancelToken};
use campaign_store::{DocumentStore, InMemoryStore, RedisStore, Repository};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-messenger")]
#[command(about = "Topic-based messaging campaign engine")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        env = "CAMPAIGN_MESSENGER_CONFIG",
        default_value = "config/campaign-messenger.toml"
    )]
    config: PathBuf,

    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_MESSENGER__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_MESSENGER__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "CAMPAIGN_MESSENGER__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Redis URL (overrides config)
    #[arg(long, env = "CAMPAIGN_MESSENGER__STORE__REDIS_URL")]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Execute one campaign run and print its summary
    Run {
        #[arg(long)]
        campaign_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "campaign_messenger=info,campaign_orchestration=info,tower_http=info".into()
                }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Messenger starting up");

    let mut config = AppConfig::load_from(Some(cli.config.as_path())).unwrap_or_else(|e| {
        warn!(error = %e, path = %cli.config.display(), "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(url) = cli.redis_url {
        config.store.redis_url = url;
    }

    info!(
        node_id = %config.node_id,
        store = ?config.store.backend,
        provider = ?config.provider.kind,
        http_port = config.api.http_port,
        "Configuration loaded"
    );

    let store = build_store(&config).await?;
    let provider = build_provider(&config)?;
    let repo = Repository::new(store);
    let engine = CampaignEngine::from_config(&config, repo, provider, system_clock())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, engine).await,
        Command::Run { campaign_id } => run_once(&engine, &campaign_id).await,
    }
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&config.store.redis_url, config.store.key_prefix.clone()).await?,
        ),
    };
    Ok(store)
}

fn build_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn SendProvider>> {
    let provider: Arc<dyn SendProvider> = match config.provider.kind {
        ProviderKind::Log => Arc::new(LogProvider),
        ProviderKind::Twilio => Arc::new(TwilioProvider::from_config(&config.provider)?),
    };
    Ok(provider)
}

async fn serve(config: AppConfig, engine: CampaignEngine) -> anyhow::Result<()> {
    let api_server = ApiServer::new(config, engine);

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Campaign Messenger is ready to serve traffic");

    // Blocks until shutdown
    api_server.start_http().await
}

async fn run_once(engine: &CampaignEngine, campaign_id: &str) -> anyhow::Result<()> {
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current recipient");
            on_signal.cancel();
        }
    });

    let summary = engine.run_campaign_with_cancel(campaign_id, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
