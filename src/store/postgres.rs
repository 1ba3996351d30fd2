// src/store/postgres.rs

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{query, query_as, FromRow, Pool, Postgres, Transaction};

use super::{Store, StoreResult, StoreTx};
use crate::error::StoreError;
use crate::models::{
    CleaningRecord, CleaningTarget, CleaningType, CommonArea, ConfigSnapshot, DailyCleaningReport,
    HousekeepingConfig, NewCleaningRecord, NewDailyCleaningReport, OccupancyState, ReportSummary,
    Reservation, ReservationState, Room,
};

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
struct CleaningRecordRow {
    cleaning_record_id: i64,
    room_id: Option<i64>,
    common_area_id: Option<i64>,
    staff_id: i64,
    timestamp: DateTime<Utc>,
    areas_covered: Vec<String>,
    bathroom_areas_covered: Vec<String>,
    types_performed: Vec<CleaningType>,
    lost_items_found: bool,
    animal_traces_found: bool,
    notes: Option<String>,
    mattress_rotation_procedure: Option<String>,
    deleted: bool,
}

impl TryFrom<CleaningRecordRow> for CleaningRecord {
    type Error = StoreError;

    fn try_from(r: CleaningRecordRow) -> Result<Self, Self::Error> {
        let target = match (r.room_id, r.common_area_id) {
            (Some(id), None) => CleaningTarget::Room(id),
            (None, Some(id)) => CleaningTarget::CommonArea(id),
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "cleaning record {} has no single target",
                    r.cleaning_record_id
                )))
            }
        };
        Ok(CleaningRecord {
            cleaning_record_id: r.cleaning_record_id,
            target,
            staff_id: r.staff_id,
            timestamp: r.timestamp,
            areas_covered: r.areas_covered,
            bathroom_areas_covered: r.bathroom_areas_covered,
            types_performed: r.types_performed.into_iter().collect(),
            lost_items_found: r.lost_items_found,
            animal_traces_found: r.animal_traces_found,
            notes: r.notes,
            mattress_rotation_procedure: r.mattress_rotation_procedure,
            deleted: r.deleted,
        })
    }
}

#[derive(FromRow)]
struct ReportRow {
    report_id: i64,
    report_date: NaiveDate,
    room_records: Json<Vec<CleaningRecord>>,
    common_area_records: Json<Vec<CleaningRecord>>,
    summary: Json<ReportSummary>,
    config_snapshot: Json<ConfigSnapshot>,
    created_at: DateTime<Utc>,
}

impl From<ReportRow> for DailyCleaningReport {
    fn from(r: ReportRow) -> Self {
        DailyCleaningReport {
            report_id: r.report_id,
            date: r.report_date,
            room_records: r.room_records.0,
            common_area_records: r.common_area_records.0,
            summary: r.summary.0,
            config_snapshot: r.config_snapshot.0,
            created_at: r.created_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transaction
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl StoreTx for PgTx {
    async fn list_rooms(&mut self) -> StoreResult<Vec<Room>> {
        let rows = query_as::<_, Room>(
            r#"SELECT * FROM public.rooms WHERE NOT deleted ORDER BY room_id"#
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn get_room(&mut self, room_id: i64) -> StoreResult<Option<Room>> {
        let row = query_as::<_, Room>(
            r#"SELECT * FROM public.rooms WHERE room_id = $1 AND NOT deleted"#
        )
        .bind(room_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn set_occupancy(&mut self, room_ids: &[i64], state: OccupancyState) -> StoreResult<u64> {
        if room_ids.is_empty() {
            return Ok(0);
        }
        let res = query(
            r#"UPDATE public.rooms SET occupancy_state = $2
               WHERE room_id = ANY($1) AND NOT deleted"#
        )
        .bind(room_ids)
        .bind(state)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected())
    }

    async fn update_room_housekeeping(&mut self, room: &Room) -> StoreResult<()> {
        query(
            r#"
            UPDATE public.rooms SET
              requires_cleaning_today     = $2,
              requires_disinfection_today = $3,
              requires_mattress_rotation  = $4,
              last_cleaning_date          = $5,
              last_cleaning_type          = $6,
              last_mattress_rotation_date = $7,
              next_mattress_rotation_date = $8,
              days_remaining_rotation     = $9
            WHERE room_id = $1 AND NOT deleted
            "#
        )
        .bind(room.room_id)
        .bind(room.requires_cleaning_today)
        .bind(room.requires_disinfection_today)
        .bind(room.requires_mattress_rotation)
        .bind(room.last_cleaning_date)
        .bind(room.last_cleaning_type)
        .bind(room.last_mattress_rotation_date)
        .bind(room.next_mattress_rotation_date)
        .bind(room.days_remaining_rotation)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_rooms_for_cleaning(&mut self) -> StoreResult<u64> {
        let res = query(r#"UPDATE public.rooms SET requires_cleaning_today = TRUE WHERE NOT deleted"#)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn list_common_areas(&mut self) -> StoreResult<Vec<CommonArea>> {
        let rows = query_as::<_, CommonArea>(
            r#"SELECT * FROM public.common_areas WHERE NOT deleted ORDER BY common_area_id"#
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn get_common_area(&mut self, common_area_id: i64) -> StoreResult<Option<CommonArea>> {
        let row = query_as::<_, CommonArea>(
            r#"SELECT * FROM public.common_areas WHERE common_area_id = $1 AND NOT deleted"#
        )
        .bind(common_area_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_common_area_housekeeping(&mut self, area: &CommonArea) -> StoreResult<()> {
        query(
            r#"
            UPDATE public.common_areas SET
              requires_cleaning_today = $2,
              last_cleaning_date      = $3,
              last_cleaning_type      = $4,
              next_disinfection_date  = $5
            WHERE common_area_id = $1 AND NOT deleted
            "#
        )
        .bind(area.common_area_id)
        .bind(area.requires_cleaning_today)
        .bind(area.last_cleaning_date)
        .bind(area.last_cleaning_type)
        .bind(area.next_disinfection_date)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_common_areas_for_cleaning(&mut self) -> StoreResult<u64> {
        let res = query(
            r#"UPDATE public.common_areas SET requires_cleaning_today = TRUE WHERE NOT deleted"#
        )
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected())
    }

    async fn list_reservations_in_states(
        &mut self,
        states: &[ReservationState],
    ) -> StoreResult<Vec<Reservation>> {
        let rows = query_as::<_, Reservation>(
            r#"SELECT * FROM public.reservations
               WHERE NOT deleted AND state = ANY($1)
               ORDER BY reservation_id"#
        )
        .bind(states)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn list_reservations_overlapping(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Reservation>> {
        let rows = query_as::<_, Reservation>(
            r#"SELECT * FROM public.reservations
               WHERE NOT deleted AND state <> $3
                 AND start_time < $2 AND end_time > $1
               ORDER BY reservation_id"#
        )
        .bind(from)
        .bind(to)
        .bind(ReservationState::Canceled)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn set_reservation_state(
        &mut self,
        reservation_ids: &[i64],
        state: ReservationState,
    ) -> StoreResult<u64> {
        if reservation_ids.is_empty() {
            return Ok(0);
        }
        let res = query(
            r#"UPDATE public.reservations SET state = $2
               WHERE reservation_id = ANY($1) AND NOT deleted"#
        )
        .bind(reservation_ids)
        .bind(state)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected())
    }

    async fn insert_cleaning_record(
        &mut self,
        record: &NewCleaningRecord,
    ) -> StoreResult<CleaningRecord> {
        let types: BTreeSet<CleaningType> = record.types_performed.iter().copied().collect();
        let types: Vec<CleaningType> = types.into_iter().collect();
        let row = query_as::<_, CleaningRecordRow>(
            r#"
            INSERT INTO public.cleaning_records
              (room_id, common_area_id, staff_id, "timestamp", areas_covered,
               bathroom_areas_covered, types_performed, lost_items_found,
               animal_traces_found, notes, mattress_rotation_procedure)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            RETURNING *
            "#
        )
        .bind(record.room_id)
        .bind(record.common_area_id)
        .bind(record.staff_id)
        .bind(record.timestamp)
        .bind(&record.areas_covered)
        .bind(&record.bathroom_areas_covered)
        .bind(&types)
        .bind(record.lost_items_found)
        .bind(record.animal_traces_found)
        .bind(&record.notes)
        .bind(&record.mattress_rotation_procedure)
        .fetch_one(&mut *self.tx)
        .await?;
        CleaningRecord::try_from(row)
    }

    async fn list_cleaning_records(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<CleaningRecord>> {
        let rows = query_as::<_, CleaningRecordRow>(
            r#"SELECT * FROM public.cleaning_records
               WHERE NOT deleted AND "timestamp" >= $1 AND "timestamp" < $2
               ORDER BY "timestamp", cleaning_record_id"#
        )
        .bind(from)
        .bind(to)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(CleaningRecord::try_from).collect()
    }

    async fn find_report(&mut self, date: NaiveDate) -> StoreResult<Option<DailyCleaningReport>> {
        let row = query_as::<_, ReportRow>(
            r#"SELECT report_id, report_date, room_records, common_area_records,
                      summary, config_snapshot, created_at
               FROM public.daily_cleaning_reports
               WHERE report_date = $1 AND NOT deleted"#
        )
        .bind(date)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(DailyCleaningReport::from))
    }

    async fn insert_report(
        &mut self,
        report: &NewDailyCleaningReport,
    ) -> StoreResult<DailyCleaningReport> {
        let row = query_as::<_, ReportRow>(
            r#"
            INSERT INTO public.daily_cleaning_reports
              (report_date, room_records, common_area_records, summary, config_snapshot, created_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING report_id, report_date, room_records, common_area_records,
                      summary, config_snapshot, created_at
            "#
        )
        .bind(report.date)
        .bind(Json(&report.room_records))
        .bind(Json(&report.common_area_records))
        .bind(Json(&report.summary))
        .bind(Json(&report.config_snapshot))
        .bind(report.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Duplicate(format!("daily report for {}", report.date))
            }
            other => StoreError::Database(other),
        })?;
        Ok(row.into())
    }

    async fn load_config(&mut self) -> StoreResult<Option<HousekeepingConfig>> {
        let row = query_as::<_, HousekeepingConfig>(
            r#"SELECT nightly_run_time, mattress_rotation_frequency_days, rotation_notice_days,
                      common_area_disinfection_frequency_days, disinfection_notice_days,
                      notifications_enabled, room_checklist, bathroom_checklist,
                      common_area_checklist, mattress_rotation_procedure, updated_at
               FROM public.housekeeping_config
               WHERE config_id = 1 AND NOT deleted"#
        )
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn save_config(&mut self, c: &HousekeepingConfig) -> StoreResult<()> {
        query(
            r#"
            INSERT INTO public.housekeeping_config
              (config_id, nightly_run_time, mattress_rotation_frequency_days, rotation_notice_days,
               common_area_disinfection_frequency_days, disinfection_notice_days,
               notifications_enabled, room_checklist, bathroom_checklist,
               common_area_checklist, mattress_rotation_procedure, updated_at, deleted)
            VALUES (1,$1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,FALSE)
            ON CONFLICT (config_id) DO UPDATE SET
              nightly_run_time                        = EXCLUDED.nightly_run_time,
              mattress_rotation_frequency_days        = EXCLUDED.mattress_rotation_frequency_days,
              rotation_notice_days                    = EXCLUDED.rotation_notice_days,
              common_area_disinfection_frequency_days = EXCLUDED.common_area_disinfection_frequency_days,
              disinfection_notice_days                = EXCLUDED.disinfection_notice_days,
              notifications_enabled                   = EXCLUDED.notifications_enabled,
              room_checklist                          = EXCLUDED.room_checklist,
              bathroom_checklist                      = EXCLUDED.bathroom_checklist,
              common_area_checklist                   = EXCLUDED.common_area_checklist,
              mattress_rotation_procedure             = EXCLUDED.mattress_rotation_procedure,
              updated_at                              = EXCLUDED.updated_at,
              deleted                                 = FALSE
            "#
        )
        .bind(c.nightly_run_time)
        .bind(c.mattress_rotation_frequency_days)
        .bind(c.rotation_notice_days)
        .bind(c.common_area_disinfection_frequency_days)
        .bind(c.disinfection_notice_days)
        .bind(c.notifications_enabled)
        .bind(&c.room_checklist)
        .bind(&c.bathroom_checklist)
        .bind(&c.common_area_checklist)
        .bind(&c.mattress_rotation_procedure)
        .bind(c.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
