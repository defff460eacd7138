mod config;

use std::net::SocketAddr;

use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use tasktalk_api::AppStateInner;
use tasktalk_db::Database;
use tasktalk_sync::{AuthConfig, Backend, ObjectStorage};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasktalk=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    let storage = ObjectStorage::new(config.storage_dir.clone(), config.public_url.clone()).await?;
    let auth_config = AuthConfig::new(
        config.jwt_secret.clone(),
        chrono::Duration::days(config.token_ttl_days),
    );
    let state = AppStateInner::new(Backend::new(db, storage, auth_config));

    let app = tasktalk_api::router(state)
        .nest_service("/files", ServeDir::new(&config.storage_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("TaskTalk server listening on {}", addr);
    info!("Serving stored objects at {}", config.public_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("TaskTalk server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
