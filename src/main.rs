use std::path::PathBuf;

use rmcp::{ServiceExt, transport::stdio};

use cascade::config::Config;
use cascade::server::CascadeServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    load_dotenv();

    tracing::info!("cascade starting");

    let config = Config::load()?;
    let server = CascadeServer::from_config(config).await?;

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {e:?}"))?;

    service.waiting().await?;

    tracing::info!("cascade shutting down");
    Ok(())
}

/// MCP clients launch the server from arbitrary directories, so `.env` is
/// looked up next to the binary and at the project root before the CWD.
fn load_dotenv() {
    let beside_binary: Vec<PathBuf> = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .map(|dir| vec![dir.join(".env"), dir.join("../../.env")])
        .unwrap_or_default();

    match beside_binary.iter().find(|p| p.exists()) {
        Some(path) => {
            if let Err(e) = dotenvy::from_path(path) {
                tracing::warn!(path = %path.display(), "ignoring unreadable .env: {e}");
            }
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
}
