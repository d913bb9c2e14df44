use governance_service::{
    build_router,
    config::GovernanceConfig,
    services::{
        bootstrap::{seed_admin, seed_default_roles},
        metrics::init_metrics,
        provisioning::load_rules,
        Clock, Database, GovernanceStore, RedisService, SystemClock,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = GovernanceConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics().map_err(|e| AppError::InternalError(e.into()))?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting governance service"
    );

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized successfully");

    let redis = RedisService::new(&config.redis)
        .await
        .map_err(AppError::InternalError)?;

    let rules = match &config.provisioning.rules_path {
        Some(path) => load_rules(path).map_err(AppError::ConfigError)?,
        None => Vec::new(),
    };
    tracing::info!(rules = rules.len(), "Provisioning rules loaded");

    let store: Arc<dyn GovernanceStore> = Arc::new(db);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = AppState::new(config.clone(), store, clock, Arc::new(redis), rules);

    let seeded = seed_default_roles(&state.store, &state.clock, &state.audit).await?;
    if seeded > 0 {
        tracing::info!(seeded, "Built-in roles seeded");
    }
    seed_admin(&state.store, &state.clock, &state.audit, &config.bootstrap).await?;

    spawn_expiry_sweep(state.clone(), config.governance.expiry_sweep_seconds);

    let app = build_router(state);
    let addr: SocketAddr = config
        .common
        .bind_address()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Periodically expire stale change requests and pending approvals.
fn spawn_expiry_sweep(state: AppState, every_seconds: u64) {
    if every_seconds == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(every_seconds));
        loop {
            ticker.tick().await;
            if let Err(e) = state.governance.expire_stale_requests().await {
                tracing::error!(error = %e, "Change request expiry sweep failed");
            }
            if let Err(e) = state.provisioning.expire_stale_approvals().await {
                tracing::error!(error = %e, "Pending approval expiry sweep failed");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
