// src/store/memory.rs
//
// A transaction holds the table lock for its lifetime and edits a private
// copy; commit swaps the copy in.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreResult, StoreTx};
use crate::error::StoreError;
use crate::models::{
    CleaningRecord, CleaningTarget, CommonArea, DailyCleaningReport, HousekeepingConfig,
    NewCleaningRecord, NewDailyCleaningReport, OccupancyState, Reservation, ReservationState, Room,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    rooms: BTreeMap<i64, Room>,
    common_areas: BTreeMap<i64, CommonArea>,
    reservations: BTreeMap<i64, Reservation>,
    cleaning_records: BTreeMap<i64, CleaningRecord>,
    reports: BTreeMap<i64, DailyCleaningReport>,
    config: Option<HousekeepingConfig>,
    next_id: i64,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    failing: Arc<StdMutex<HashSet<&'static str>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            failing: Arc::clone(&self.failing),
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    failing: Arc<StdMutex<HashSet<&'static str>>>,
}

impl MemoryTx {
    fn check(&self, op: &'static str) -> StoreResult<()> {
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.contains(op) {
            return Err(StoreError::Unavailable(format!("injected failure in {op}")));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn list_rooms(&mut self) -> StoreResult<Vec<Room>> {
        self.check("list_rooms")?;
        Ok(self.working.rooms.values().filter(|r| !r.deleted).cloned().collect())
    }

    async fn get_room(&mut self, room_id: i64) -> StoreResult<Option<Room>> {
        self.check("get_room")?;
        Ok(self.working.rooms.get(&room_id).filter(|r| !r.deleted).cloned())
    }

    async fn set_occupancy(&mut self, room_ids: &[i64], state: OccupancyState) -> StoreResult<u64> {
        self.check("set_occupancy")?;
        let mut updated = 0;
        for id in room_ids {
            if let Some(room) = self.working.rooms.get_mut(id).filter(|r| !r.deleted) {
                room.occupancy_state = state;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update_room_housekeeping(&mut self, room: &Room) -> StoreResult<()> {
        self.check("update_room_housekeeping")?;
        let stored = self
            .working
            .rooms
            .get_mut(&room.room_id)
            .filter(|r| !r.deleted)
            .ok_or_else(|| StoreError::Unavailable(format!("room {} vanished", room.room_id)))?;
        *stored = Room {
            occupancy_state: stored.occupancy_state,
            ..room.clone()
        };
        Ok(())
    }

    async fn mark_rooms_for_cleaning(&mut self) -> StoreResult<u64> {
        self.check("mark_rooms_for_cleaning")?;
        let mut updated = 0;
        for room in self.working.rooms.values_mut().filter(|r| !r.deleted) {
            room.requires_cleaning_today = true;
            updated += 1;
        }
        Ok(updated)
    }

    async fn list_common_areas(&mut self) -> StoreResult<Vec<CommonArea>> {
        self.check("list_common_areas")?;
        Ok(self.working.common_areas.values().filter(|a| !a.deleted).cloned().collect())
    }

    async fn get_common_area(&mut self, common_area_id: i64) -> StoreResult<Option<CommonArea>> {
        self.check("get_common_area")?;
        Ok(self.working.common_areas.get(&common_area_id).filter(|a| !a.deleted).cloned())
    }

    async fn update_common_area_housekeeping(&mut self, area: &CommonArea) -> StoreResult<()> {
        self.check("update_common_area_housekeeping")?;
        let stored = self
            .working
            .common_areas
            .get_mut(&area.common_area_id)
            .filter(|a| !a.deleted)
            .ok_or_else(|| {
                StoreError::Unavailable(format!("common area {} vanished", area.common_area_id))
            })?;
        *stored = area.clone();
        Ok(())
    }

    async fn mark_common_areas_for_cleaning(&mut self) -> StoreResult<u64> {
        self.check("mark_common_areas_for_cleaning")?;
        let mut updated = 0;
        for area in self.working.common_areas.values_mut().filter(|a| !a.deleted) {
            area.requires_cleaning_today = true;
            updated += 1;
        }
        Ok(updated)
    }

    async fn list_reservations_in_states(
        &mut self,
        states: &[ReservationState],
    ) -> StoreResult<Vec<Reservation>> {
        self.check("list_reservations_in_states")?;
        Ok(self
            .working
            .reservations
            .values()
            .filter(|r| !r.deleted && states.contains(&r.state))
            .cloned()
            .collect())
    }

    async fn list_reservations_overlapping(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Reservation>> {
        self.check("list_reservations_overlapping")?;
        Ok(self
            .working
            .reservations
            .values()
            .filter(|r| !r.deleted && r.state != ReservationState::Canceled && r.overlaps(from, to))
            .cloned()
            .collect())
    }

    async fn set_reservation_state(
        &mut self,
        reservation_ids: &[i64],
        state: ReservationState,
    ) -> StoreResult<u64> {
        self.check("set_reservation_state")?;
        let mut updated = 0;
        for id in reservation_ids {
            if let Some(r) = self.working.reservations.get_mut(id).filter(|r| !r.deleted) {
                r.state = state;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert_cleaning_record(
        &mut self,
        record: &NewCleaningRecord,
    ) -> StoreResult<CleaningRecord> {
        self.check("insert_cleaning_record")?;
        let target = match (record.room_id, record.common_area_id) {
            (Some(id), None) => CleaningTarget::Room(id),
            (None, Some(id)) => CleaningTarget::CommonArea(id),
            _ => return Err(StoreError::Corrupt("cleaning record needs exactly one target".into())),
        };
        let id = self.working.allocate_id();
        let stored = CleaningRecord {
            cleaning_record_id: id,
            target,
            staff_id: record.staff_id,
            timestamp: record.timestamp,
            areas_covered: record.areas_covered.clone(),
            bathroom_areas_covered: record.bathroom_areas_covered.clone(),
            types_performed: record.types_performed.iter().copied().collect(),
            lost_items_found: record.lost_items_found,
            animal_traces_found: record.animal_traces_found,
            notes: record.notes.clone(),
            mattress_rotation_procedure: record.mattress_rotation_procedure.clone(),
            deleted: false,
        };
        self.working.cleaning_records.insert(id, stored.clone());
        Ok(stored)
    }

    async fn list_cleaning_records(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<CleaningRecord>> {
        self.check("list_cleaning_records")?;
        let mut records: Vec<CleaningRecord> = self
            .working
            .cleaning_records
            .values()
            .filter(|r| !r.deleted && from <= r.timestamp && r.timestamp < to)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.timestamp, r.cleaning_record_id));
        Ok(records)
    }

    async fn find_report(&mut self, date: NaiveDate) -> StoreResult<Option<DailyCleaningReport>> {
        self.check("find_report")?;
        Ok(self.working.reports.values().find(|r| r.date == date).cloned())
    }

    async fn insert_report(
        &mut self,
        report: &NewDailyCleaningReport,
    ) -> StoreResult<DailyCleaningReport> {
        self.check("insert_report")?;
        if self.working.reports.values().any(|r| r.date == report.date) {
            return Err(StoreError::Duplicate(format!("daily report for {}", report.date)));
        }
        let id = self.working.allocate_id();
        let stored = DailyCleaningReport {
            report_id: id,
            date: report.date,
            room_records: report.room_records.clone(),
            common_area_records: report.common_area_records.clone(),
            summary: report.summary.clone(),
            config_snapshot: report.config_snapshot.clone(),
            created_at: report.created_at,
        };
        self.working.reports.insert(id, stored.clone());
        Ok(stored)
    }

    async fn load_config(&mut self) -> StoreResult<Option<HousekeepingConfig>> {
        self.check("load_config")?;
        Ok(self.working.config.clone())
    }

    async fn save_config(&mut self, config: &HousekeepingConfig) -> StoreResult<()> {
        self.check("save_config")?;
        self.working.config = Some(config.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.check("commit")?;
        let MemoryTx { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Make every call of the named `StoreTx` operation fail until cleared.
    pub fn fail_operation(&self, op: &'static str) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).insert(op);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub async fn seed_room(&self, room: Room) {
        self.tables.lock().await.rooms.insert(room.room_id, room);
    }

    pub async fn seed_common_area(&self, area: CommonArea) {
        self.tables.lock().await.common_areas.insert(area.common_area_id, area);
    }

    pub async fn seed_reservation(&self, reservation: Reservation) {
        self.tables.lock().await.reservations.insert(reservation.reservation_id, reservation);
    }

    pub async fn seed_config(&self, config: HousekeepingConfig) {
        self.tables.lock().await.config = Some(config);
    }

    /// Ids allocated by the store start above this so seeded ids never collide.
    pub async fn reserve_ids(&self, above: i64) {
        let mut tables = self.tables.lock().await;
        tables.next_id = tables.next_id.max(above);
    }

    pub async fn room(&self, room_id: i64) -> Option<Room> {
        self.tables.lock().await.rooms.get(&room_id).cloned()
    }

    pub async fn common_area(&self, common_area_id: i64) -> Option<CommonArea> {
        self.tables.lock().await.common_areas.get(&common_area_id).cloned()
    }

    pub async fn reservation(&self, reservation_id: i64) -> Option<Reservation> {
        self.tables.lock().await.reservations.get(&reservation_id).cloned()
    }

    pub async fn cleaning_record_count(&self) -> usize {
        self.tables.lock().await.cleaning_records.len()
    }

    pub async fn report_count(&self) -> usize {
        self.tables.lock().await.reports.len()
    }

    pub async fn config(&self) -> Option<HousekeepingConfig> {
        self.tables.lock().await.config.clone()
    }
}
