use std::env;

use anyhow::Result;
use promptly_api::{build_app, ApiConfig};
use promptly_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("promptly_api");

    let config = ApiConfig::from_env();
    let bind = env::var("PROMPTLY_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let storage = config.database_url.as_deref().unwrap_or("memory").to_string();
    let completion = config.completion.endpoint.is_some();

    let app = build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, storage = %storage, completion, "promptly api started");

    axum::serve(listener, app).await?;
    Ok(())
}
