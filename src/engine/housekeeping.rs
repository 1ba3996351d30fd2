// src/engine/housekeeping.rs
//
// Each nightly phase runs in its own transaction; a failed phase is recorded
// and the rest still run.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::notify::{Notifier, RotationNotice};
use super::{day_bounds, days_until, local_date};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    CleaningRecord, CleaningTarget, ConfigSnapshot, DailyCleaningReport, HousekeepingConfig,
    HousekeepingConfigPatch, NewDailyCleaningReport, ReportSummary, Room,
};
use crate::store::{config_or_default, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NightlyPhase {
    ReportGeneration,
    CommonAreaReset,
    RoomEvaluation,
    DisinfectionNotices,
    RotationNotifications,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed { affected: usize },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseResult {
    pub phase: NightlyPhase,
    #[serde(flatten)]
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisinfectionNotice {
    pub common_area_id: i64,
    pub name: String,
    pub due_at: DateTime<Utc>,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NightlyOutcome {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub report: Option<DailyCleaningReport>,
    pub phases: Vec<PhaseResult>,
    pub rotation_notices: Vec<RotationNotice>,
    pub disinfection_notices: Vec<DisinfectionNotice>,
}

impl NightlyOutcome {
    /// The run counts as successful only if the report was written and no phase failed.
    pub fn succeeded(&self) -> bool {
        self.report.is_some() && self.failed_phases().is_empty()
    }

    pub fn failed_phases(&self) -> Vec<NightlyPhase> {
        self.phases
            .iter()
            .filter(|p| matches!(p.status, PhaseStatus::Failed { .. }))
            .map(|p| p.phase)
            .collect()
    }

    pub fn status_of(&self, phase: NightlyPhase) -> Option<&PhaseStatus> {
        self.phases.iter().find(|p| p.phase == phase).map(|p| &p.status)
    }
}

pub fn summarize(room_records: &[CleaningRecord], common_area_records: &[CleaningRecord]) -> ReportSummary {
    let distinct = |records: &[CleaningRecord]| {
        records.iter().map(|r| r.target).collect::<HashSet<CleaningTarget>>().len()
    };
    let all = || room_records.iter().chain(common_area_records);
    let count = |n: usize| i32::try_from(n).unwrap_or(i32::MAX);
    ReportSummary {
        total_rooms_cleaned: count(distinct(room_records)),
        total_common_areas_cleaned: count(distinct(common_area_records)),
        lost_items_found: count(all().filter(|r| r.lost_items_found).count()),
        animal_traces_found: count(all().filter(|r| r.animal_traces_found).count()),
    }
}

/// Nightly evaluation of one room. Returns the updated room and, when the
/// rotation is close but not yet due, the notice to send.
pub fn evaluate_room(
    room: &Room,
    date: NaiveDate,
    offset: FixedOffset,
    config: &HousekeepingConfig,
    occupied_today: &HashSet<i64>,
) -> (Room, Option<RotationNotice>) {
    let mut updated = room.clone();
    updated.requires_cleaning_today = true;
    updated.requires_disinfection_today = occupied_today.contains(&room.room_id);

    let mut notice = None;
    if let Some(due_at) = room.next_mattress_rotation_date {
        let days = days_until(date, due_at, offset);
        updated.days_remaining_rotation = Some(i32::try_from(days).unwrap_or(i32::MIN));
        if days <= 0 {
            updated.requires_mattress_rotation = true;
        } else if config.notifications_enabled && days <= i64::from(config.rotation_notice_days) {
            notice = Some(RotationNotice {
                room_id: room.room_id,
                room_number: room.number.clone(),
                due_at,
                days_remaining: days,
            });
        }
    }
    (updated, notice)
}

pub fn validate_config(config: &HousekeepingConfig) -> EngineResult<()> {
    let positive = [
        ("mattress_rotation_frequency_days", config.mattress_rotation_frequency_days),
        ("common_area_disinfection_frequency_days", config.common_area_disinfection_frequency_days),
    ];
    let non_negative = [
        ("rotation_notice_days", config.rotation_notice_days),
        ("disinfection_notice_days", config.disinfection_notice_days),
    ];
    if let Some((field, _)) = positive.iter().find(|(_, v)| *v <= 0) {
        return Err(EngineError::Validation(format!("{field} must be greater than zero")));
    }
    if let Some((field, _)) = non_negative.iter().find(|(_, v)| *v < 0) {
        return Err(EngineError::Validation(format!("{field} must not be negative")));
    }
    if config.mattress_rotation_procedure.trim().is_empty() {
        return Err(EngineError::Validation("mattress_rotation_procedure must not be blank".into()));
    }
    Ok(())
}

fn apply_patch(config: &mut HousekeepingConfig, patch: HousekeepingConfigPatch) {
    let HousekeepingConfigPatch {
        nightly_run_time,
        mattress_rotation_frequency_days,
        rotation_notice_days,
        common_area_disinfection_frequency_days,
        disinfection_notice_days,
        notifications_enabled,
        room_checklist,
        bathroom_checklist,
        common_area_checklist,
        mattress_rotation_procedure,
    } = patch;
    if let Some(v) = nightly_run_time { config.nightly_run_time = v; }
    if let Some(v) = mattress_rotation_frequency_days { config.mattress_rotation_frequency_days = v; }
    if let Some(v) = rotation_notice_days { config.rotation_notice_days = v; }
    if let Some(v) = common_area_disinfection_frequency_days { config.common_area_disinfection_frequency_days = v; }
    if let Some(v) = disinfection_notice_days { config.disinfection_notice_days = v; }
    if let Some(v) = notifications_enabled { config.notifications_enabled = v; }
    if let Some(v) = room_checklist { config.room_checklist = v; }
    if let Some(v) = bathroom_checklist { config.bathroom_checklist = v; }
    if let Some(v) = common_area_checklist { config.common_area_checklist = v; }
    if let Some(v) = mattress_rotation_procedure { config.mattress_rotation_procedure = v; }
}

fn failed(phase: NightlyPhase, date: NaiveDate, e: &EngineError) -> PhaseResult {
    error!(job = super::NIGHTLY_JOB, %date, ?phase, error = %e, "nightly phase failed");
    PhaseResult { phase, status: PhaseStatus::Failed { error: e.to_string() } }
}

fn completed(phase: NightlyPhase, affected: usize) -> PhaseResult {
    PhaseResult { phase, status: PhaseStatus::Completed { affected } }
}

fn skipped(phase: NightlyPhase, reason: &str) -> PhaseResult {
    PhaseResult { phase, status: PhaseStatus::Skipped { reason: reason.to_string() } }
}

pub struct HousekeepingService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    offset: FixedOffset,
}

impl HousekeepingService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, offset: FixedOffset) -> Self {
        Self { store, notifier, offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub async fn config(&self) -> EngineResult<HousekeepingConfig> {
        let mut tx = self.store.begin().await?;
        let config = config_or_default(tx.as_mut()).await?;
        tx.commit().await?;
        Ok(config)
    }

    pub async fn update_config(&self, patch: HousekeepingConfigPatch) -> EngineResult<HousekeepingConfig> {
        let mut tx = self.store.begin().await?;
        let mut config = config_or_default(tx.as_mut()).await?;
        apply_patch(&mut config, patch);
        validate_config(&config)?;
        config.updated_at = Utc::now();
        tx.save_config(&config).await?;
        tx.commit().await?;
        info!(nightly_run_time = %config.nightly_run_time, "housekeeping configuration updated");
        Ok(config)
    }

    pub async fn report(&self, date: NaiveDate) -> EngineResult<DailyCleaningReport> {
        let mut tx = self.store.begin().await?;
        let report = tx.find_report(date).await?;
        report.ok_or_else(|| EngineError::NotFound(format!("daily report for {date}")))
    }

    pub async fn generate_report(&self, date: NaiveDate) -> EngineResult<DailyCleaningReport> {
        let mut tx = self.store.begin().await?;
        if tx.find_report(date).await?.is_some() {
            return Err(EngineError::Conflict(format!("daily report for {date} already exists")));
        }
        let config = config_or_default(tx.as_mut()).await?;
        let (from, to) = day_bounds(date, self.offset);
        let (room_records, common_area_records): (Vec<_>, Vec<_>) = tx
            .list_cleaning_records(from, to)
            .await?
            .into_iter()
            .partition(|r| matches!(r.target, CleaningTarget::Room(_)));

        let report = NewDailyCleaningReport {
            date,
            summary: summarize(&room_records, &common_area_records),
            room_records,
            common_area_records,
            config_snapshot: ConfigSnapshot::from(&config),
            created_at: Utc::now(),
        };
        let stored = tx.insert_report(&report).await?;
        tx.commit().await?;
        info!(%date, report_id = stored.report_id, summary = ?stored.summary, "daily cleaning report stored");
        Ok(stored)
    }

    /// `Conflict` up front if the date already has a report; after that,
    /// failures are reported per phase.
    pub async fn run_nightly(&self, date: NaiveDate) -> EngineResult<NightlyOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("nightly", %run_id, %date);
        async move {
            let config = {
                let mut tx = self.store.begin().await?;
                if tx.find_report(date).await?.is_some() {
                    warn!("daily report already exists, nightly run aborted");
                    return Err(EngineError::Conflict(format!(
                        "daily report for {date} already exists"
                    )));
                }
                let config = config_or_default(tx.as_mut()).await?;
                tx.commit().await?;
                config
            };

            let mut outcome = NightlyOutcome {
                run_id,
                date,
                report: None,
                phases: Vec::with_capacity(5),
                rotation_notices: Vec::new(),
                disinfection_notices: Vec::new(),
            };

            let phase = NightlyPhase::ReportGeneration;
            outcome.phases.push(match self.generate_report(date).await {
                Ok(report) => {
                    let records = report.room_records.len() + report.common_area_records.len();
                    outcome.report = Some(report);
                    completed(phase, records)
                }
                Err(e) => failed(phase, date, &e),
            });

            let phase = NightlyPhase::CommonAreaReset;
            outcome.phases.push(match self.reset_common_areas().await {
                Ok(n) => completed(phase, n),
                Err(e) => failed(phase, date, &e),
            });

            let phase = NightlyPhase::RoomEvaluation;
            let rooms_evaluated = match self.evaluate_rooms(date, &config).await {
                Ok((n, notices)) => {
                    outcome.rotation_notices = notices;
                    outcome.phases.push(completed(phase, n));
                    true
                }
                Err(e) => {
                    outcome.phases.push(failed(phase, date, &e));
                    false
                }
            };

            let phase = NightlyPhase::DisinfectionNotices;
            outcome.phases.push(match self.disinfection_notices(date, &config).await {
                Ok(notices) => {
                    let n = notices.len();
                    outcome.disinfection_notices = notices;
                    completed(phase, n)
                }
                Err(e) => failed(phase, date, &e),
            });

            let phase = NightlyPhase::RotationNotifications;
            outcome.phases.push(if !config.notifications_enabled {
                skipped(phase, "notifications disabled")
            } else if !rooms_evaluated {
                skipped(phase, "room evaluation failed")
            } else if outcome.rotation_notices.is_empty() {
                completed(phase, 0)
            } else {
                match self.notifier.notify_upcoming_rotations(&outcome.rotation_notices).await {
                    Ok(()) => completed(phase, outcome.rotation_notices.len()),
                    Err(e) => failed(phase, date, &e),
                }
            });

            if outcome.succeeded() {
                info!(rotation_notices = outcome.rotation_notices.len(), "nightly run finished");
            } else {
                warn!(failed = ?outcome.failed_phases(), "nightly run finished with failures");
            }
            Ok::<_, EngineError>(outcome)
        }
        .instrument(span)
        .await
    }

    pub async fn scheduled_run(&self, fired_at: DateTime<Utc>) {
        let date = local_date(fired_at, self.offset);
        if let Err(e) = self.run_nightly(date).await {
            error!(job = super::NIGHTLY_JOB, %date, error = %e, "nightly run did not start");
        }
    }

    async fn reset_common_areas(&self) -> EngineResult<usize> {
        let mut tx = self.store.begin().await?;
        let n = tx.mark_common_areas_for_cleaning().await?;
        tx.commit().await?;
        Ok(usize::try_from(n).unwrap_or(usize::MAX))
    }

    async fn evaluate_rooms(
        &self,
        date: NaiveDate,
        config: &HousekeepingConfig,
    ) -> EngineResult<(usize, Vec<RotationNotice>)> {
        let (from, to) = day_bounds(date, self.offset);
        let mut tx = self.store.begin().await?;
        tx.mark_rooms_for_cleaning().await?;
        let occupied_today: HashSet<i64> = tx
            .list_reservations_overlapping(from, to)
            .await?
            .into_iter()
            .map(|r| r.room_id)
            .collect();

        let rooms = tx.list_rooms().await?;
        let mut notices = Vec::new();
        for room in &rooms {
            let (updated, notice) = evaluate_room(room, date, self.offset, config, &occupied_today);
            if updated != *room {
                tx.update_room_housekeeping(&updated).await?;
            }
            notices.extend(notice);
        }
        tx.commit().await?;
        Ok((rooms.len(), notices))
    }

    async fn disinfection_notices(
        &self,
        date: NaiveDate,
        config: &HousekeepingConfig,
    ) -> EngineResult<Vec<DisinfectionNotice>> {
        let mut tx = self.store.begin().await?;
        let areas = tx.list_common_areas().await?;
        tx.commit().await?;

        let notices: Vec<DisinfectionNotice> = areas
            .into_iter()
            .filter_map(|area| {
                let due_at = area.next_disinfection_date?;
                let days = days_until(date, due_at, self.offset);
                (days <= i64::from(config.disinfection_notice_days)).then(|| DisinfectionNotice {
                    common_area_id: area.common_area_id,
                    name: area.name,
                    due_at,
                    days_remaining: days,
                })
            })
            .collect();
        if !notices.is_empty() {
            let ids: Vec<i64> = notices.iter().map(|n| n.common_area_id).collect();
            info!(common_area_ids = ?ids, "common areas due for disinfection");
        }
        Ok(notices)
    }
}
