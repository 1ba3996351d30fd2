// src/main.rs

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{FixedOffset, NaiveTime};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod broadcast;
mod config;
mod db;
mod engine;
mod error;
mod models;
mod routes;
mod scheduler;
mod store;

use broadcast::ChangeBroadcaster;
use config::{AppConfig, StoreBackend};
use engine::{
    CleaningService, HousekeepingService, LogNotifier, Notifier, OccupancyReconciler,
    WebhookNotifier, NIGHTLY_JOB, OCCUPANCY_JOB,
};
use scheduler::JobScheduler;
use store::{config_or_default, MemoryStore, PgStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<OccupancyReconciler>,
    pub cleaning: Arc<CleaningService>,
    pub housekeeping: Arc<HousekeepingService>,
    pub scheduler: Arc<JobScheduler>,
    pub offset: FixedOffset,
}

/// (Re)registers the nightly run; a previous timer for the job is replaced.
pub fn schedule_nightly(state: &AppState, at: NaiveTime) {
    let housekeeping = Arc::clone(&state.housekeeping);
    state.scheduler.daily_at(NIGHTLY_JOB, at, state.offset, move |fired_at| {
        let housekeeping = Arc::clone(&housekeeping);
        async move { housekeeping.scheduled_run(fired_at).await }
    });
}

fn schedule_reconciler(state: &AppState, period: std::time::Duration) {
    let reconciler = Arc::clone(&state.reconciler);
    state.scheduler.every(OCCUPANCY_JOB, period, move |now| {
        let reconciler = Arc::clone(&reconciler);
        async move { reconciler.scheduled_tick(now).await }
    });
}

async fn open_store(backend: &StoreBackend) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match backend {
        StoreBackend::Postgres { url, max_connections } => {
            let pool = db::connect(url, *max_connections).await?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            info!("STORE_BACKEND=memory, state is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from .env if present
    dotenvy::dotenv().ok();
    let settings = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let store = open_store(&settings.store).await?;
    let housekeeping_config = {
        let mut tx = store.begin().await?;
        let config = config_or_default(tx.as_mut()).await?;
        tx.commit().await?;
        config
    };

    let broadcaster = Arc::new(ChangeBroadcaster::new(settings.broadcast_capacity));
    let notifier: Arc<dyn Notifier> = match &settings.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.as_str())?),
        None => Arc::new(LogNotifier),
    };

    let state = AppState {
        reconciler: Arc::new(OccupancyReconciler::new(Arc::clone(&store), Arc::clone(&broadcaster))),
        cleaning: Arc::new(CleaningService::new(Arc::clone(&store))),
        housekeeping: Arc::new(HousekeepingService::new(
            Arc::clone(&store),
            notifier,
            settings.hotel_offset,
        )),
        scheduler: Arc::new(JobScheduler::new()),
        offset: settings.hotel_offset,
    };
    schedule_reconciler(&state, settings.reconcile_interval);
    schedule_nightly(&state, housekeeping_config.nightly_run_time);

    // Very permissive CORS for local dev (tighten for prod)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let scheduler = Arc::clone(&state.scheduler);
    let api = Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/v1/occupancy/reconcile", post(routes::occupancy::reconcile))
        .route(
            "/api/v1/cleaning-records",
            post(routes::cleaning_records::create_cleaning_record),
        )
        .route("/api/v1/housekeeping/reports", post(routes::housekeeping::create_report))
        .route("/api/v1/housekeeping/reports/:date", get(routes::housekeeping::get_report))
        .route(
            "/api/v1/housekeeping/nightly-runs",
            post(routes::housekeeping::create_nightly_run),
        )
        .route(
            "/api/v1/housekeeping/config",
            get(routes::housekeeping::get_config).patch(routes::housekeeping::patch_config),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, offset = %settings.hotel_offset, "API listening");

    axum::serve(listener, api.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    scheduler.shutdown();
    broadcaster.close();
    info!("shut down");
    Ok(())
}
