//! Local approximation of the platform's thumbnail upload limits: a per-day
//! and a per-hour counter, keyed by date strings in the display offset.
//!
//! Checking and recording are separate read-modify-write cycles on the same
//! file, so concurrent callers can both pass the check and exceed the limit.

use crate::clock;
use crate::constants::{
    DAILY_RETENTION_DAYS, DAILY_UPLOAD_LIMIT, DAY_KEY_FORMAT, HOURLY_RETENTION_HOURS,
    HOURLY_UPLOAD_LIMIT, HOUR_KEY_FORMAT,
};
use crate::storage::{self, StoreError};
use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLog {
    #[serde(default)]
    pub daily: BTreeMap<String, u32>,
    #[serde(default)]
    pub hourly: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub allowed: bool,
    pub daily_count: u32,
    pub hourly_count: u32,
}

fn day_key(at: &DateTime<FixedOffset>) -> String {
    at.format(DAY_KEY_FORMAT).to_string()
}

fn hour_key(at: &DateTime<FixedOffset>) -> String {
    at.format(HOUR_KEY_FORMAT).to_string()
}

impl QuotaLog {
    pub fn status_at(&self, now: &DateTime<FixedOffset>) -> QuotaStatus {
        let daily_count = self.daily.get(&day_key(now)).copied().unwrap_or(0);
        let hourly_count = self.hourly.get(&hour_key(now)).copied().unwrap_or(0);
        QuotaStatus {
            allowed: daily_count < DAILY_UPLOAD_LIMIT && hourly_count < HOURLY_UPLOAD_LIMIT,
            daily_count,
            hourly_count,
        }
    }

    pub fn increment_at(&mut self, now: &DateTime<FixedOffset>) {
        *self.daily.entry(day_key(now)).or_insert(0) += 1;
        *self.hourly.entry(hour_key(now)).or_insert(0) += 1;
    }

    /// Keep the last 7 days of daily counts and the last 24 hours of hourly
    /// counts. Keys compare lexicographically, which matches date order.
    pub fn prune_at(&mut self, now: &DateTime<FixedOffset>) {
        let cutoff_day = day_key(&(*now - Duration::days(DAILY_RETENTION_DAYS)));
        let cutoff_hour = hour_key(&(*now - Duration::hours(HOURLY_RETENTION_HOURS)));
        self.daily.retain(|key, _| key.as_str() >= cutoff_day.as_str());
        self.hourly.retain(|key, _| key.as_str() >= cutoff_hour.as_str());
    }
}

/// Reads and updates the quota log file.
#[derive(Debug, Clone)]
pub struct QuotaGate {
    path: PathBuf,
    offset: FixedOffset,
}

impl QuotaGate {
    pub fn new(path: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        QuotaGate {
            path: path.into(),
            offset,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored log; a missing file is an empty log.
    pub fn load(&self) -> Result<QuotaLog, StoreError> {
        Ok(storage::read_json(&self.path)?.unwrap_or_default())
    }

    /// Prune and write the log.
    pub fn save_at(&self, log: &mut QuotaLog, now: &DateTime<FixedOffset>) -> Result<(), StoreError> {
        log.prune_at(now);
        storage::write_json(&self.path, log)
    }

    pub fn can_upload(&self) -> Result<QuotaStatus, StoreError> {
        self.can_upload_at(&clock::now(self.offset))
    }

    pub fn can_upload_at(&self, now: &DateTime<FixedOffset>) -> Result<QuotaStatus, StoreError> {
        Ok(self.load()?.status_at(now))
    }

    pub fn record_upload(&self) -> Result<QuotaStatus, StoreError> {
        self.record_upload_at(&clock::now(self.offset))
    }

    /// Count one upload and return the counters afterwards.
    pub fn record_upload_at(&self, now: &DateTime<FixedOffset>) -> Result<QuotaStatus, StoreError> {
        let mut log = self.load()?;
        log.increment_at(now);
        self.save_at(&mut log, now)?;
        let status = log.status_at(now);
        log::info!(
            "Thumbnail upload recorded ({}/{} today, {}/{} this hour)",
            status.daily_count,
            DAILY_UPLOAD_LIMIT,
            status.hourly_count,
            HOURLY_UPLOAD_LIMIT
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jakarta() -> FixedOffset {
        clock::offset_from_hours(7).unwrap()
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        jakarta()
            .with_ymd_and_hms(2025, 7, day, hour, minute, 0)
            .unwrap()
    }

    fn gate(temp: &assert_fs::TempDir) -> QuotaGate {
        QuotaGate::new(temp.path().join("thumbnail_uploads.json"), jakarta())
    }

    #[test]
    fn empty_log_allows_uploads() {
        let temp = assert_fs::TempDir::new().unwrap();
        let status = gate(&temp).can_upload_at(&at(6, 10, 0)).unwrap();
        assert_eq!(
            status,
            QuotaStatus {
                allowed: true,
                daily_count: 0,
                hourly_count: 0
            }
        );
    }

    #[test]
    fn ten_uploads_in_one_hour_block_that_hour_only() {
        let temp = assert_fs::TempDir::new().unwrap();
        let gate = gate(&temp);
        for minute in 0..10 {
            assert!(gate.can_upload_at(&at(6, 10, minute)).unwrap().allowed);
            gate.record_upload_at(&at(6, 10, minute)).unwrap();
        }

        let blocked = gate.can_upload_at(&at(6, 10, 59)).unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.daily_count, 10);
        assert_eq!(blocked.hourly_count, 10);

        let next_hour = gate.can_upload_at(&at(6, 11, 0)).unwrap();
        assert!(next_hour.allowed);
        assert_eq!(next_hour.hourly_count, 0);
    }

    #[test]
    fn fifty_uploads_in_one_day_block_the_rest_of_the_day() {
        let temp = assert_fs::TempDir::new().unwrap();
        let gate = gate(&temp);
        for hour in 0..5 {
            for minute in 0..10 {
                gate.record_upload_at(&at(6, hour, minute)).unwrap();
            }
        }

        for hour in [5, 12, 23] {
            let status = gate.can_upload_at(&at(6, hour, 30)).unwrap();
            assert!(!status.allowed, "hour {hour} should be blocked");
            assert_eq!(status.daily_count, 50);
            assert_eq!(status.hourly_count, 0);
        }
        assert!(gate.can_upload_at(&at(7, 0, 0)).unwrap().allowed);
    }

    #[test]
    fn saving_prunes_entries_outside_retention() {
        let temp = assert_fs::TempDir::new().unwrap();
        let gate = gate(&temp);
        let mut log = QuotaLog::default();
        log.daily.insert("2025-06-20".into(), 3);
        log.daily.insert("2025-07-05".into(), 4);
        log.hourly.insert("2025-07-14-09".into(), 1);
        log.hourly.insert("2025-07-15-08".into(), 2);
        storage::write_json(gate.path(), &log).unwrap();

        gate.record_upload_at(&at(15, 10, 0)).unwrap();

        let stored = gate.load().unwrap();
        assert!(!stored.daily.contains_key("2025-06-20"));
        assert!(!stored.daily.contains_key("2025-07-05"));
        assert_eq!(stored.daily.get("2025-07-15"), Some(&1));
        assert!(!stored.hourly.contains_key("2025-07-14-09"));
        assert_eq!(stored.hourly.get("2025-07-15-08"), Some(&2));
        assert_eq!(stored.hourly.get("2025-07-15-10"), Some(&1));
    }

    #[test]
    fn keys_use_the_configured_offset() {
        let mut log = QuotaLog::default();
        let utc_evening = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2025, 7, 6, 20, 0, 0)
            .unwrap();
        log.increment_at(&utc_evening.with_timezone(&jakarta()));
        assert!(log.daily.contains_key("2025-07-07"));
        assert!(log.hourly.contains_key("2025-07-07-03"));
    }
}
