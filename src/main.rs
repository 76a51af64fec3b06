use rmcp::{ServiceExt, transport::stdio};

use imgen::config::Config;
use imgen::server::ImgenServer;

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

    // MCP clients may start us from any CWD: prefer a .env next to the binary.
    match std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
    {
        Some(path) if path.exists() => {
            dotenvy::from_path(&path).ok();
        }
        _ => {
            dotenvy::dotenv().ok();
        }
    }

    tracing::info!("imgen starting");

    let config = Config::load()?;
    let server = ImgenServer::new(&config);

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {e:?}"))?;

    service.waiting().await?;

    tracing::info!("imgen shutting down");
    Ok(())
}
