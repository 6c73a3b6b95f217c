//! Safewatch - Camera Safety Monitor
//!
//! Main entry point.

use safewatch::{
    camera_registry::CameraRegistry,
    camera_session::CameraSessionManager,
    camera_status_tracker::CameraStatusTracker,
    detection_orchestrator::DetectionOrchestrator,
    detection_worker::HttpDetectionWorker,
    models::Modality,
    onvif::OnvifDiscovery,
    realtime_hub::RealtimeHub,
    record_store::{FileArchive, MemoryRecordStore, MySqlRecordStore, RecordStore},
    risk_engine::RiskEngine,
    state::{AppConfig, AppState},
    web_api,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safewatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Safewatch v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        database = config.database_url.is_some(),
        sdd_worker_url = %config.sdd_worker_url,
        fmd_worker_url = %config.fmd_worker_url,
        archive_dir = ?config.archive_dir,
        "Configuration loaded"
    );

    let store: Arc<dyn RecordStore> = match &config.database_url {
        Some(url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await?;
            let store = MySqlRecordStore::new(pool);
            store.ensure_schema().await?;
            tracing::info!("Database connected");
            Arc::new(store)
        }
        None => {
            tracing::warn!(
                capacity = config.memory_store_capacity,
                "DATABASE_URL not set, records are kept in memory"
            );
            Arc::new(MemoryRecordStore::with_capacity(config.memory_store_capacity))
        }
    };
    let archive = config.archive_dir.clone().map(FileArchive::new);

    let realtime = Arc::new(RealtimeHub::new());
    let camera_status = Arc::new(CameraStatusTracker::new());

    let registry = Arc::new(CameraRegistry::new(store.clone()));
    registry.load().await?;

    let risk = Arc::new(RiskEngine::new(store, archive, realtime.clone()));

    let discovery = Arc::new(OnvifDiscovery::new(
        Duration::from_millis(config.discovery_timeout_ms),
        Duration::from_millis(config.snapshot_timeout_ms),
    ));
    let sessions = Arc::new(CameraSessionManager::new(
        registry.clone(),
        discovery,
        risk.clone(),
        realtime.clone(),
        camera_status.clone(),
        config.session_config(),
    ));

    let worker_timeout = Duration::from_millis(config.worker_timeout_ms);
    let sdd_worker = Arc::new(HttpDetectionWorker::new(
        config.sdd_worker_url.clone(),
        Modality::SocialDistance,
        worker_timeout,
    )?);
    let fmd_worker = Arc::new(HttpDetectionWorker::new(
        config.fmd_worker_url.clone(),
        Modality::FaceMask,
        worker_timeout,
    )?);
    let orchestrator = Arc::new(DetectionOrchestrator::new(
        sdd_worker,
        fmd_worker,
        sessions.clone(),
        risk.clone(),
        realtime.clone(),
        config.orchestrator_config(),
    )?);

    let state = AppState {
        config: config.clone(),
        registry,
        sessions: sessions.clone(),
        orchestrator: orchestrator.clone(),
        risk: risk.clone(),
        realtime,
        camera_status,
    };

    let found = sessions.discover().await;
    tracing::info!(cameras = found.len(), "Initial discovery finished");

    let detection_state = orchestrator.initialize().await;
    tracing::info!(state = ?detection_state, "Detection orchestrator initialized");
    orchestrator.start().await;

    risk.clone().spawn_flush(config.risk_config().mean_flush_interval);

    // Periodic refresh: drop dead devices, pick up new ones
    let refresh_sessions = sessions.clone();
    let refresh_period = Duration::from_secs(config.discovery_interval_sec);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            let cameras = refresh_sessions.refresh().await;
            tracing::debug!(cameras = cameras.len(), "Camera refresh finished");
        }
    });

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    orchestrator.stop().await;
    sessions.stop().await;
    Ok(())
}
