use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use line_broadcast::{cli::Cli, server::Server};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.server_config();
    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("could not start server on port {}", config.port))?;

    if let Err(err) = server.run().await {
        warn!("server exited with error: {err:?}");
        return Err(err.into());
    }

    Ok(())
}
