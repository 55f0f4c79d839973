use anyhow::Context;
use clap::Parser;
use scribble_server::ServerConfig;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "scribble_server=info,scribble_core=info,tower_http=info".into()
            }),
        )
        .init();

    let config = ServerConfig::parse();
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    scribble_server::serve(listener, &config)
        .await
        .context("server stopped unexpectedly")
}
