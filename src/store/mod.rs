// src/store/mod.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::models::{
    CleaningRecord, CommonArea, DailyCleaningReport, HousekeepingConfig, NewCleaningRecord,
    NewDailyCleaningReport, OccupancyState, Reservation, ReservationState, Room,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// One open transaction. Listing methods skip soft-deleted rows.
#[async_trait]
pub trait StoreTx: Send {
    // rooms
    async fn list_rooms(&mut self) -> StoreResult<Vec<Room>>;
    async fn get_room(&mut self, room_id: i64) -> StoreResult<Option<Room>>;
    async fn set_occupancy(&mut self, room_ids: &[i64], state: OccupancyState) -> StoreResult<u64>;
    /// Writes the housekeeping columns of `room` (everything except occupancy).
    async fn update_room_housekeeping(&mut self, room: &Room) -> StoreResult<()>;
    async fn mark_rooms_for_cleaning(&mut self) -> StoreResult<u64>;

    // common areas
    async fn list_common_areas(&mut self) -> StoreResult<Vec<CommonArea>>;
    async fn get_common_area(&mut self, common_area_id: i64) -> StoreResult<Option<CommonArea>>;
    async fn update_common_area_housekeeping(&mut self, area: &CommonArea) -> StoreResult<()>;
    async fn mark_common_areas_for_cleaning(&mut self) -> StoreResult<u64>;

    // reservations
    async fn list_reservations_in_states(
        &mut self,
        states: &[ReservationState],
    ) -> StoreResult<Vec<Reservation>>;
    /// Non-deleted, non-canceled reservations intersecting `[from, to)`.
    async fn list_reservations_overlapping(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Reservation>>;
    async fn set_reservation_state(
        &mut self,
        reservation_ids: &[i64],
        state: ReservationState,
    ) -> StoreResult<u64>;

    // cleaning records
    async fn insert_cleaning_record(
        &mut self,
        record: &NewCleaningRecord,
    ) -> StoreResult<CleaningRecord>;
    /// Records with `from <= timestamp < to`, oldest first.
    async fn list_cleaning_records(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<CleaningRecord>>;

    // daily reports
    async fn find_report(&mut self, date: NaiveDate) -> StoreResult<Option<DailyCleaningReport>>;
    /// Fails with [`StoreError::Duplicate`] if a report for the date exists.
    async fn insert_report(
        &mut self,
        report: &NewDailyCleaningReport,
    ) -> StoreResult<DailyCleaningReport>;

    // configuration
    async fn load_config(&mut self) -> StoreResult<Option<HousekeepingConfig>>;
    async fn save_config(&mut self, config: &HousekeepingConfig) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

pub async fn config_or_default(tx: &mut dyn StoreTx) -> StoreResult<HousekeepingConfig> {
    if let Some(config) = tx.load_config().await? {
        return Ok(config);
    }
    let config = HousekeepingConfig {
        updated_at: Utc::now(),
        ..HousekeepingConfig::default()
    };
    tx.save_config(&config).await?;
    tracing::info!("housekeeping config absent, created defaults");
    Ok(config)
}
