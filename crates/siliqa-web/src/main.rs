//! siliqa server entry point.

use std::sync::Arc;

use siliqa_config::Settings;
use siliqa_retrieval::RagEngine;
use siliqa_web::{build_router, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();
    let bind = format!("{}:{}", settings.host, settings.port);

    let engine = RagEngine::new(settings)?;
    let state = Arc::new(AppState::new(engine));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "siliqa server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
