//! Start a bedrock-relay server programmatically.
//!
//! Usage:
//!   AWS_PROFILE=dev cargo run --example serve

use bedrock_relay::{
    build_router, AppState, BedrockInvoker, GatewayConfig, HttpImageFetcher, Registry,
    SharedLogger, Upstream,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::find_and_load(None)?;
    let registry = Registry::with_aliases(&config.models);

    println!("Region: {}", config.aws.region.as_deref().unwrap_or("(default chain)"));
    println!("Models: {}", registry.len());

    let upstream = Upstream {
        registry,
        invoker: Arc::new(BedrockInvoker::from_config(&config.aws).await),
        images: Arc::new(HttpImageFetcher::new(&config.images)?),
        logger: SharedLogger::in_memory(),
    };

    let port = config.port;
    let state = Arc::new(AppState { config, upstream });

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("Listening on http://{}", addr);
    println!();
    println!("  curl http://localhost:{}/v1/chat/completions \\", port);
    println!("    -d '{{\"model\":\"amazon.nova-lite\",\"messages\":[{{\"role\":\"user\",\"content\":\"Hi\"}}]}}'");

    axum::serve(listener, app).await?;
    Ok(())
}
