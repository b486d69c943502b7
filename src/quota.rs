//! Daily voice-turn allowance.
//!
//! The counter belongs to the local calendar day it was last written on and
//! reads as zero once that day has passed.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::KeyValueStore;

pub const QUOTA_KEY: &str = "voice_quota";
pub const DEFAULT_DAILY_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub count: u32,
    pub day: NaiveDate,
}

type Today = Box<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct QuotaTracker {
    store: Arc<dyn KeyValueStore>,
    limit: u32,
    state: QuotaState,
    today: Today,
}

impl QuotaTracker {
    /// Load quota state using the local calendar
    pub fn load(store: Arc<dyn KeyValueStore>, limit: u32) -> Result<Self> {
        Self::with_calendar(store, limit, || Local::now().date_naive())
    }

    /// Load quota state with an explicit source for "today"
    pub fn with_calendar(
        store: Arc<dyn KeyValueStore>,
        limit: u32,
        today: impl Fn() -> NaiveDate + Send + Sync + 'static,
    ) -> Result<Self> {
        let state = match store.get(QUOTA_KEY)? {
            Some(bytes) => match serde_json::from_slice::<QuotaState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Discarding unreadable quota record: {}", e);
                    QuotaState { count: 0, day: today() }
                }
            },
            None => QuotaState { count: 0, day: today() },
        };

        Ok(Self {
            store,
            limit,
            state,
            today: Box::new(today),
        })
    }

    fn roll_day(&mut self) {
        let today = (self.today)();
        if self.state.day != today {
            info!(
                "Quota day rolled from {} to {} (count {} reset)",
                self.state.day, today, self.state.count
            );
            self.state = QuotaState { count: 0, day: today };
        }
    }

    /// Whether another voice session may start today
    pub fn can_start(&mut self) -> bool {
        self.roll_day();
        self.state.count < self.limit
    }

    /// Count one committed turn and persist
    pub fn increment(&mut self) -> Result<()> {
        self.roll_day();
        self.state.count += 1;

        let bytes = serde_json::to_vec(&self.state)?;
        self.store
            .set(QUOTA_KEY, &bytes)
            .context("Failed to persist quota state")?;

        info!("Voice turns today: {}/{}", self.state.count, self.limit);
        Ok(())
    }

    pub fn remaining(&mut self) -> u32 {
        self.roll_day();
        self.limit.saturating_sub(self.state.count)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn state(&self) -> QuotaState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[test]
    fn test_fresh_tracker_allows_start() -> Result<()> {
        let mut quota = QuotaTracker::with_calendar(Arc::new(MemoryStore::new()), 5, || day(17))?;
        assert!(quota.can_start());
        assert_eq!(quota.remaining(), 5);
        Ok(())
    }

    #[test]
    fn test_stale_record_reads_as_zero() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let stale = QuotaState { count: 5, day: day(16) };
        store.set(QUOTA_KEY, &serde_json::to_vec(&stale)?)?;

        let mut quota = QuotaTracker::with_calendar(store, 5, || day(17))?;
        assert!(quota.can_start());
        assert_eq!(quota.state().count, 0);
        assert_eq!(quota.state().day, day(17));
        Ok(())
    }

    #[test]
    fn test_record_format() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mut quota = QuotaTracker::with_calendar(store.clone(), 5, || day(17))?;
        quota.increment()?;

        let raw = store.get(QUOTA_KEY)?.unwrap();
        assert_eq!(String::from_utf8(raw)?, r#"{"count":1,"day":"2026-10-17"}"#);
        Ok(())
    }
}
