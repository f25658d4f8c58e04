use std::sync::Arc;

use anyhow::Context;
use autogestion::config::Config;
use autogestion::routes::{create_router, AppState};
use autogestion::store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().context("invalid configuration")?;

    let store = PgStore::connect(&config.database_url, config.max_connections).await?;
    if config.run_migrations {
        store.migrate().await?;
        log::info!("Database migrations applied");
    }

    let app = create_router(AppState::new(Arc::new(store), &config));

    log::info!("Starting Autogestion HTTP Server on http://{}", config.bind);
    axum::Server::bind(&config.bind)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Could not listen for shutdown signal: {}", err);
    }
}
