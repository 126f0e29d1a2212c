use anyhow::Context;
use poputka_api::{app, worker::RetentionSweeper, AppState};
use poputka_core::{RideRepository, SessionStore};
use poputka_store::app_config::Config;
use poputka_store::{DbClient, InMemorySessionStore, RedisSessionStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poputka_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Poputka API on port {}", config.server.port);

    let db = DbClient::connect(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let repo: Arc<dyn RideRepository> = Arc::new(db.ride_repository());

    let sessions: Arc<dyn SessionStore> = match &config.redis {
        Some(redis) => Arc::new(
            RedisSessionStore::new(&redis.url, redis.session_ttl_seconds)
                .context("Invalid Redis URL")?,
        ),
        None => {
            tracing::warn!("No Redis configured, sessions are kept in process memory");
            Arc::new(InMemorySessionStore::new())
        }
    };

    let sweeper = RetentionSweeper::new(repo.clone(), config.retention.clone());
    tokio::spawn(sweeper.run());

    let state = AppState::new(
        repo,
        sessions,
        config.matching.corridor.clone(),
        config.listing.clone(),
    );
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
