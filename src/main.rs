use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spock_art_critic::config::Config;
use spock_art_critic::{critic_from_config, server};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("spock_art_critic=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    if config.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set, every critique will fail until it is");
    }
    info!(
        model = %config.model,
        max_tokens = config.max_tokens,
        url_mode = ?config.url_mode,
        "configuration loaded"
    );

    let app = server::router(critic_from_config(&config));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("could not bind {}", config.bind))?;
    info!("listening on http://{}", config.bind);

    axum::serve(listener, app).await?;
    Ok(())
}
