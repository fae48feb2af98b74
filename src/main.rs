//! matchupd - batter/pitcher matchup reconciliation service

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matchup_backend::{
    api::create_router,
    cache::PlayIndexCache,
    engine::MatchupEngine,
    feeds::{PitchFeedClient, PlayIndexClient},
    models::Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    info!(port = config.port, "Starting matchup backend");

    let pitch_feed = Arc::new(PitchFeedClient::new(config.pitch_feed_base.clone())?);
    let play_index_feed = Arc::new(PlayIndexClient::new(config.play_index_base.clone())?);
    let cache = Arc::new(PlayIndexCache::new(
        play_index_feed,
        config.max_concurrent_fetches,
    ));
    let engine = Arc::new(MatchupEngine::new(
        pitch_feed,
        cache,
        Duration::from_secs(config.request_budget_secs),
    ));

    let app = create_router(engine)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matchup_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
