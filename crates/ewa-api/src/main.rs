//! EWA API Server
//!
//! REST API server for web page entity and keyword extraction.
//!
//! Author: hephaex@gmail.com

use ewa_api::{create_router, state::AppState};
use ewa_core::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration first so the log level can come from it
    let config_path = std::env::var_os("EWA_CONFIG").map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("ewa={},tower_http=info", config.logging.level).into()
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.logging.include_location)
        .with_line_number(config.logging.include_location);
    if config.logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::from_config(config)?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("EWA API Server starting on http://{}", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
