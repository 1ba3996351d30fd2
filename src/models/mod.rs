// src/models/mod.rs

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ───────────────────────────────────────
// Enumerations (stored as TEXT)
// ───────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccupancyState {
    Free,
    Reserved,
    Occupied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    Pending,
    Reserved,
    OccupiedEngineNa,
    Finalized,
    Canceled,
}

/// Declared in ascending order of significance so the derived `Ord` is the
/// priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleaningType {
    Limpieza,
    Desinfeccion,
    LimpiezaBanio,
    DesinfeccionBanio,
    RotacionColchones,
}

impl CleaningType {
    pub const ALL: [CleaningType; 5] = [
        CleaningType::Limpieza,
        CleaningType::Desinfeccion,
        CleaningType::LimpiezaBanio,
        CleaningType::DesinfeccionBanio,
        CleaningType::RotacionColchones,
    ];

    // 1 = least significant
    pub const fn priority(self) -> u8 {
        match self {
            CleaningType::Limpieza => 1,
            CleaningType::Desinfeccion => 2,
            CleaningType::LimpiezaBanio => 3,
            CleaningType::DesinfeccionBanio => 4,
            CleaningType::RotacionColchones => 5,
        }
    }

    pub const fn is_disinfection(self) -> bool {
        matches!(self, CleaningType::Desinfeccion | CleaningType::DesinfeccionBanio)
    }
}

// ───────────────────────────────────────
// Facilities
// ───────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Room {
    pub room_id: i64,
    pub number: String,
    pub occupancy_state: OccupancyState,
    pub requires_cleaning_today: bool,
    pub requires_disinfection_today: bool,
    pub requires_mattress_rotation: bool,
    pub last_cleaning_date: Option<DateTime<Utc>>,
    pub last_cleaning_type: Option<CleaningType>,
    pub last_mattress_rotation_date: Option<DateTime<Utc>>,
    pub next_mattress_rotation_date: Option<DateTime<Utc>>,
    pub days_remaining_rotation: Option<i32>,
    pub deleted: bool,
}

impl Room {
    pub fn new(room_id: i64, number: impl Into<String>) -> Self {
        Self {
            room_id,
            number: number.into(),
            occupancy_state: OccupancyState::Free,
            requires_cleaning_today: false,
            requires_disinfection_today: false,
            requires_mattress_rotation: false,
            last_cleaning_date: None,
            last_cleaning_type: None,
            last_mattress_rotation_date: None,
            next_mattress_rotation_date: None,
            days_remaining_rotation: None,
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommonArea {
    pub common_area_id: i64,
    pub name: String,
    pub requires_cleaning_today: bool,
    pub last_cleaning_date: Option<DateTime<Utc>>,
    pub last_cleaning_type: Option<CleaningType>,
    pub next_disinfection_date: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl CommonArea {
    pub fn new(common_area_id: i64, name: impl Into<String>) -> Self {
        Self {
            common_area_id,
            name: name.into(),
            requires_cleaning_today: false,
            last_cleaning_date: None,
            last_cleaning_type: None,
            next_disinfection_date: None,
            deleted: false,
        }
    }
}

// ───────────────────────────────────────
// Bookings (written by reservation flows)
// ───────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub reservation_id: i64,
    pub room_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub state: ReservationState,
    pub deleted: bool,
}

impl Reservation {
    /// `start_time <= now < end_time`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    /// `start_time` within `[from, to]`, both ends inclusive.
    pub fn starts_within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        from <= self.start_time && self.start_time <= to
    }

    /// Whether `[start_time, end_time)` intersects `[from, to)`.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start_time < to && from < self.end_time
    }
}

// ───────────────────────────────────────
// Housekeeping records
// ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningTarget {
    Room(i64),
    CommonArea(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningRecord {
    pub cleaning_record_id: i64,
    pub target: CleaningTarget,
    pub staff_id: i64,
    pub timestamp: DateTime<Utc>,
    pub areas_covered: Vec<String>,
    pub bathroom_areas_covered: Vec<String>,
    pub types_performed: BTreeSet<CleaningType>,
    pub lost_items_found: bool,
    pub animal_traces_found: bool,
    pub notes: Option<String>,
    pub mattress_rotation_procedure: Option<String>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCleaningRecord {
    pub room_id: Option<i64>,
    pub common_area_id: Option<i64>,
    pub staff_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)] pub areas_covered: Vec<String>,
    #[serde(default)] pub bathroom_areas_covered: Vec<String>,
    pub types_performed: Vec<CleaningType>,
    #[serde(default)] pub lost_items_found: bool,
    #[serde(default)] pub animal_traces_found: bool,
    pub notes: Option<String>,
    pub mattress_rotation_procedure: Option<String>,
}

// ───────────────────────────────────────
// Configuration & reports
// ───────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HousekeepingConfig {
    pub nightly_run_time: NaiveTime,
    pub mattress_rotation_frequency_days: i32,
    pub rotation_notice_days: i32,
    pub common_area_disinfection_frequency_days: i32,
    pub disinfection_notice_days: i32,
    pub notifications_enabled: bool,
    pub room_checklist: Vec<String>,
    pub bathroom_checklist: Vec<String>,
    pub common_area_checklist: Vec<String>,
    pub mattress_rotation_procedure: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            nightly_run_time: NaiveTime::from_hms_opt(23, 30, 0).unwrap_or(NaiveTime::MIN),
            mattress_rotation_frequency_days: 180,
            rotation_notice_days: 7,
            common_area_disinfection_frequency_days: 7,
            disinfection_notice_days: 1,
            notifications_enabled: true,
            room_checklist: strings(&["Cama", "Piso", "Muebles", "Ventanas", "Papelera"]),
            bathroom_checklist: strings(&["Inodoro", "Lavamanos", "Ducha", "Espejo", "Piso"]),
            common_area_checklist: strings(&["Piso", "Mobiliario", "Superficies de contacto", "Papeleras"]),
            mattress_rotation_procedure: "Retirar la ropa de cama, girar el colchón 180 grados \
                                          y voltearlo, revisar manchas y daños, rehacer la cama."
                .to_string(),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HousekeepingConfigPatch {
    pub nightly_run_time: Option<NaiveTime>,
    pub mattress_rotation_frequency_days: Option<i32>,
    pub rotation_notice_days: Option<i32>,
    pub common_area_disinfection_frequency_days: Option<i32>,
    pub disinfection_notice_days: Option<i32>,
    pub notifications_enabled: Option<bool>,
    pub room_checklist: Option<Vec<String>>,
    pub bathroom_checklist: Option<Vec<String>>,
    pub common_area_checklist: Option<Vec<String>>,
    pub mattress_rotation_procedure: Option<String>,
}

/// Checklists and procedures as they stood when a report was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub room_checklist: Vec<String>,
    pub bathroom_checklist: Vec<String>,
    pub common_area_checklist: Vec<String>,
    pub mattress_rotation_procedure: String,
}

impl From<&HousekeepingConfig> for ConfigSnapshot {
    fn from(c: &HousekeepingConfig) -> Self {
        Self {
            room_checklist: c.room_checklist.clone(),
            bathroom_checklist: c.bathroom_checklist.clone(),
            common_area_checklist: c.common_area_checklist.clone(),
            mattress_rotation_procedure: c.mattress_rotation_procedure.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_rooms_cleaned: i32,
    pub total_common_areas_cleaned: i32,
    pub lost_items_found: i32,
    pub animal_traces_found: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCleaningReport {
    pub report_id: i64,
    pub date: NaiveDate,
    pub room_records: Vec<CleaningRecord>,
    pub common_area_records: Vec<CleaningRecord>,
    pub summary: ReportSummary,
    pub config_snapshot: ConfigSnapshot,
    pub created_at: DateTime<Utc>,
}

/// A report ready to be persisted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewDailyCleaningReport {
    pub date: NaiveDate,
    pub room_records: Vec<CleaningRecord>,
    pub common_area_records: Vec<CleaningRecord>,
    pub summary: ReportSummary,
    pub config_snapshot: ConfigSnapshot,
    pub created_at: DateTime<Utc>,
}

// ───────────────────────────────────────
// Live-update payloads
// ───────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStateChange {
    pub room_id: i64,
    pub new_state: OccupancyState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationStateChange {
    pub reservation_id: i64,
    pub new_state: ReservationState,
}


// Enumerations are stored as TEXT, so their arrays are TEXT[].
impl sqlx::postgres::PgHasArrayType for ReservationState {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("_text")
    }
}

impl sqlx::postgres::PgHasArrayType for CleaningType {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("_text")
    }
}
