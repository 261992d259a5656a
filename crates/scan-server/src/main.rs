use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use market_calendar::TradingCalendar;
use market_data::build_provider;
use scan_store::ScanDb;
use serde::Serialize;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use wheel_core::HealthStatus;
use wheel_scanner::ScanOrchestrator;

mod config;
mod error;
mod owner;
mod price_routes;
mod scan_routes;
mod scheduler;
mod watchlist_routes;

use config::ServerConfig;
use error::ApiResponse;
use scheduler::AfterCloseScheduler;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ScanOrchestrator>,
    /// Wall clock for handlers; fixed in tests
    pub clock: fn() -> DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ScanOrchestrator>) -> Self {
        Self {
            orchestrator,
            clock: Utc::now,
        }
    }
}

#[derive(Serialize)]
struct DatabaseHealth {
    healthy: bool,
    detail: Option<String>,
}

#[derive(Serialize)]
struct HealthReport {
    provider: HealthStatus,
    database: DatabaseHealth,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<HealthReport>>) {
    let provider = state.orchestrator.provider().health_check().await;
    let database = match state.orchestrator.db().ping().await {
        Ok(()) => DatabaseHealth {
            healthy: true,
            detail: None,
        },
        Err(e) => DatabaseHealth {
            healthy: false,
            detail: Some(e.to_string()),
        },
    };

    let healthy = provider.healthy && database.healthy;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ApiResponse {
        success: healthy,
        data: Some(HealthReport { provider, database }),
        error: (!healthy).then(|| "degraded".to_string()),
    };
    (status, Json(body))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(watchlist_routes::watchlist_routes())
        .merge(scan_routes::scan_routes())
        .merge(price_routes::price_routes())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting wheel scan server...");

    // 2. Configuration
    let config = ServerConfig::from_env()?;
    tracing::info!("Configuration loaded:");
    tracing::info!("  Provider: {:?}", config.provider);
    tracing::info!(
        "  Rate limit: {}/min, {} requests/day",
        config.rate_limit_per_minute,
        config.daily_request_budget
    );
    tracing::info!("  Scan concurrency: {}", config.scan_concurrency);
    tracing::info!("  Watchlist max: {}", config.watchlist_max);
    tracing::info!(
        "  Scheduled scan: {} ({} min after close)",
        config.scheduled_scan_enabled,
        config.scheduled_scan_delay_minutes
    );

    // 3. Store, provider, orchestrator
    let calendar = TradingCalendar::nyse();
    let db = ScanDb::new(&config.database_url).await?;
    tracing::info!("Database ready at {}", config.database_url);

    let provider = build_provider(&config.provider_settings(), calendar.clone())?;
    let health = provider.health_check().await;
    if health.healthy {
        tracing::info!("Startup check: {} provider healthy", health.provider);
    } else {
        tracing::warn!(
            "Startup check: {} provider unhealthy ({}); scans will fail until it recovers",
            health.provider,
            health.detail.as_deref().unwrap_or("no detail")
        );
    }

    let orchestrator = Arc::new(ScanOrchestrator::new(
        provider,
        db,
        config.scanner_config(calendar.clone()),
    ));

    // 4. After-close scheduler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = if config.scheduled_scan_enabled {
        let scheduler = AfterCloseScheduler::new(orchestrator.clone(), calendar, config.scheduled_scan_delay());
        Some(tokio::spawn(scheduler.run(shutdown_rx)))
    } else {
        tracing::info!("Scheduled scans disabled");
        None
    };

    // 5. HTTP server with graceful shutdown (SIGINT + SIGTERM)
    let app = build_router(AppState::new(orchestrator))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port)).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    shutdown_tx.send(true).ok();
    if let Some(handle) = scheduler_handle {
        handle.await.ok();
    }
    tracing::info!("Scan server stopped");
    Ok(())
}
