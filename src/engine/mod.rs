// src/engine/mod.rs

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

pub mod cleaning;
pub mod housekeeping;
pub mod notify;
pub mod occupancy;

pub use cleaning::CleaningService;
pub use housekeeping::HousekeepingService;
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use occupancy::OccupancyReconciler;

pub const OCCUPANCY_JOB: &str = "occupancy-reconciler";
pub const NIGHTLY_JOB: &str = "housekeeping-nightly";

pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// `[start, end)` of the hotel calendar day `date`, in UTC.
pub fn day_bounds(date: NaiveDate, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_midnight = date.and_time(NaiveTime::MIN);
    let start = Utc.from_utc_datetime(
        &(local_midnight - Duration::seconds(i64::from(offset.local_minus_utc()))),
    );
    (start, start + Duration::days(1))
}

/// Whole calendar days from `date` to the day `due` falls on (negative when past).
pub fn days_until(date: NaiveDate, due: DateTime<Utc>, offset: FixedOffset) -> i64 {
    local_date(due, offset).signed_duration_since(date).num_days()
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

    pub fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    pub fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub fn utc_offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }
}
