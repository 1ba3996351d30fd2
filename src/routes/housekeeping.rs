// src/routes/housekeeping.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use super::{engine_error, ApiError};
use crate::engine::housekeeping::NightlyOutcome;
use crate::engine::{local_date, NIGHTLY_JOB};
use crate::error::EngineError;
use crate::models::{DailyCleaningReport, HousekeepingConfig, HousekeepingConfigPatch};
use crate::AppState;

#[derive(Deserialize, Default)]
pub struct RunDateBody {
    /// Hotel calendar day; today at the hotel when omitted.
    pub date: Option<NaiveDate>,
}

fn run_date(state: &AppState, body: Option<Json<RunDateBody>>) -> NaiveDate {
    body.and_then(|Json(b)| b.date)
        .unwrap_or_else(|| local_date(Utc::now(), state.housekeeping.offset()))
}

pub async fn create_report(
    State(state): State<AppState>,
    body: Option<Json<RunDateBody>>,
) -> Result<(StatusCode, Json<DailyCleaningReport>), ApiError> {
    let date = run_date(&state, body);
    let report = state
        .scheduler
        .run_exclusive(NIGHTLY_JOB, state.housekeeping.generate_report(date))
        .await
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<DailyCleaningReport>, ApiError> {
    let report = state.housekeeping.report(date).await.map_err(engine_error)?;
    Ok(Json(report))
}

pub async fn create_nightly_run(
    State(state): State<AppState>,
    body: Option<Json<RunDateBody>>,
) -> Result<Json<NightlyOutcome>, ApiError> {
    let date = run_date(&state, body);
    let outcome = state
        .scheduler
        .run_exclusive(NIGHTLY_JOB, state.housekeeping.run_nightly(date))
        .await
        .map_err(engine_error)?;
    Ok(Json(outcome))
}

pub async fn get_config(State(state): State<AppState>) -> Result<Json<HousekeepingConfig>, ApiError> {
    let config = state.housekeeping.config().await.map_err(engine_error)?;
    Ok(Json(config))
}

pub async fn patch_config(
    State(state): State<AppState>,
    Json(body): Json<HousekeepingConfigPatch>,
) -> Result<Json<HousekeepingConfig>, ApiError> {
    let reschedule = body.nightly_run_time.is_some();
    // Save and reschedule under the job lock so concurrent patches install
    // timers in the order their configs were saved.
    let config = state
        .scheduler
        .run_exclusive(NIGHTLY_JOB, async {
            let config = state.housekeeping.update_config(body).await?;
            if reschedule {
                crate::schedule_nightly(&state, config.nightly_run_time);
            }
            Ok::<_, EngineError>(config)
        })
        .await
        .map_err(engine_error)?;
    Ok(Json(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{FixedOffset, NaiveTime};

    use crate::broadcast::ChangeBroadcaster;
    use crate::engine::{CleaningService, HousekeepingService, LogNotifier, OccupancyReconciler};
    use crate::scheduler::JobScheduler;
    use crate::store::{MemoryStore, Store};

    fn app_state() -> AppState {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let offset = FixedOffset::east_opt(0).unwrap();
        AppState {
            reconciler: Arc::new(OccupancyReconciler::new(
                Arc::clone(&store),
                Arc::new(ChangeBroadcaster::default()),
            )),
            cleaning: Arc::new(CleaningService::new(Arc::clone(&store))),
            housekeeping: Arc::new(HousekeepingService::new(store, Arc::new(LogNotifier), offset)),
            scheduler: Arc::new(JobScheduler::new()),
            offset,
        }
    }

    fn run_time_patch(h: u32, m: u32) -> HousekeepingConfigPatch {
        HousekeepingConfigPatch {
            nightly_run_time: NaiveTime::from_hms_opt(h, m, 0),
            ..HousekeepingConfigPatch::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_time_patches_apply_in_order_behind_a_running_nightly_job() {
        let state = app_state();

        let running = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .scheduler
                    .run_exclusive(NIGHTLY_JOB, tokio::time::sleep(Duration::from_secs(10)))
                    .await
            })
        };
        tokio::task::yield_now().await;

        let first = tokio::spawn(patch_config(State(state.clone()), Json(run_time_patch(1, 0))));
        tokio::task::yield_now().await;
        let second = tokio::spawn(patch_config(State(state.clone()), Json(run_time_patch(2, 30))));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let untouched = state.housekeeping.config().await.unwrap();
        assert_eq!(untouched.nightly_run_time, HousekeepingConfig::default().nightly_run_time);
        assert!(state.scheduler.scheduled_jobs().is_empty());

        running.await.unwrap();
        let Json(a) = first.await.unwrap().unwrap();
        let Json(b) = second.await.unwrap().unwrap();
        assert_eq!(a.nightly_run_time, NaiveTime::from_hms_opt(1, 0, 0).unwrap());
        assert_eq!(b.nightly_run_time, NaiveTime::from_hms_opt(2, 30, 0).unwrap());

        let saved = state.housekeeping.config().await.unwrap();
        assert_eq!(saved.nightly_run_time, b.nightly_run_time);
        assert_eq!(state.scheduler.scheduled_jobs(), vec![NIGHTLY_JOB.to_string()]);
        state.scheduler.shutdown();
    }
}
