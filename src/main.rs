use bedrock_relay::config::config_search_paths;
use bedrock_relay::{
    build_router, AppState, BedrockInvoker, GatewayConfig, HttpImageFetcher, Registry,
    SharedLogger, Upstream,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "bedrock-relay",
    about = "OpenAI-compatible chat completions for Claude, Llama 3 and Nova on AWS Bedrock",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// AWS region (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// AWS shared-config profile (overrides config)
    #[arg(long)]
    profile: Option<String>,

    /// Usage ledger file (JSONL)
    #[arg(long, default_value = "bedrock-relay-usage.jsonl")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bedrock_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.region.is_some() {
        config.aws.region = cli.region.clone();
    }
    if cli.profile.is_some() {
        config.aws.profile = cli.profile.clone();
    }

    let logger = SharedLogger::new(&cli.log_file)?;
    let registry = Registry::with_aliases(&config.models);
    let invoker = BedrockInvoker::from_config(&config.aws).await;
    let images = HttpImageFetcher::new(&config.images)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        region = config.aws.region.as_deref().unwrap_or("(default chain)"),
        profile = config.aws.profile.as_deref().unwrap_or("(default)"),
        models = registry.len(),
        aliases = config.models.len(),
        ledger = %cli.log_file.display(),
        "Starting bedrock-relay"
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        upstream: Upstream {
            registry,
            invoker: Arc::new(invoker),
            images: Arc::new(images),
            logger,
        },
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!(
        "  OPENAI_BASE_URL=http://localhost:{}/v1 to point an OpenAI client here",
        config.port
    );

    axum::serve(listener, app).await?;

    Ok(())
}
