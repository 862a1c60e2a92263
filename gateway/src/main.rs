//! Carbon Gateway
//!
//! REST front end for the advice engine: placement advice, advice plus
//! GitHub Actions dispatch, the region catalogue and saved favorites.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use carbon_core::{audit_sink_from_config, AuditConfig, DispatchTarget, RegionResolver, RequestContext, SystemClock};
use carbon_engine::{AdviceEngine, EngineConfig};
use dispatch_targets::{GitHubActionsConfig, TargetRouter};
use region_map::StaticRegionMap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watttime_provider::{WattTimeConfig, WattTimeSignals};

mod error;
mod favorites;
mod routes;

use favorites::FavoritesStore;

/// Delay before the background WattTime login
const TOKEN_WARMUP_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AdviceEngine>,
    pub regions: Arc<dyn RegionResolver>,
    pub dispatch: Arc<dyn DispatchTarget>,
    pub favorites: Arc<FavoritesStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "carbon_gateway=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let audit = audit_sink_from_config(&AuditConfig::from_env());

    let watttime = WattTimeConfig::from_env();
    tracing::info!("   WattTime forecasts from {}", watttime.base_url);
    let signals = Arc::new(WattTimeSignals::from_config(watttime, audit.clone())?);

    let regions: Arc<dyn RegionResolver> = Arc::new(StaticRegionMap::new());
    let engine = AdviceEngine::new(
        regions.clone(),
        signals.clone(),
        audit,
        Arc::new(SystemClock),
        EngineConfig::default(),
    );

    let github = GitHubActionsConfig::from_env();
    let dispatch = TargetRouter::github_actions(&github)?;
    tracing::info!(
        "   Dispatch targets: {} ({}/{})",
        dispatch.clouds().join(", "),
        github.owner,
        github.repo
    );

    let favorites_path =
        std::env::var("CARBON_FAVORITES_PATH").unwrap_or_else(|_| "favorites.json".to_string());
    tracing::info!("   Favorites stored at {}", favorites_path);

    let state = AppState {
        engine: Arc::new(engine),
        regions,
        dispatch: Arc::new(dispatch),
        favorites: Arc::new(FavoritesStore::new(favorites_path)),
    };

    tokio::spawn(async move {
        tokio::time::sleep(TOKEN_WARMUP_DELAY).await;
        match signals.ensure_token(&RequestContext::detached()).await {
            Ok(_) => tracing::info!("WattTime token warmed up"),
            Err(e) => tracing::warn!("WattTime token warm-up failed: {}", e),
        }
    });

    let app = routes::app(state);

    let port = std::env::var("CARBON_GATEWAY_PORT")
        .or_else(|_| std::env::var("PORT"))
        .unwrap_or_else(|_| "18700".to_string());
    let addr = format!("0.0.0.0:{}", port);

    tracing::info!("Carbon Gateway starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
