//! Keeps a running timer alive across restarts.
//!
//! While the timer runs its state is mirrored into the `timer-state` slot. A snapshot older than
//! [STALE_AFTER_MS] is considered abandoned and is discarded instead of restored.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    model::RecordId,
    storage::SharedSlots,
    timer::TimerSession,
    utils::clock::Clock,
};

pub const TIMER_SLOT: &str = "timer-state";

/// One hour.
pub const STALE_AFTER_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub current_activity: String,
    #[serde(default)]
    pub activity_category: String,
    /// Start of the running segment.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    /// Milliseconds.
    pub elapsed_time: i64,
    #[serde(default)]
    pub current_record_id: Option<RecordId>,
    /// Epoch milliseconds of the write.
    pub timestamp: i64,
}

impl TimerSnapshot {
    /// `None` unless the session is running.
    pub fn of(session: &TimerSession, now: DateTime<Utc>) -> Option<Self> {
        if !session.is_running() {
            return None;
        }
        Some(Self {
            current_activity: session.activity().to_string(),
            activity_category: session.activity_category().to_string(),
            start_time: session.segment_start()?,
            elapsed_time: session.elapsed().num_milliseconds(),
            current_record_id: session.active_record_id().cloned(),
            timestamp: now.timestamp_millis(),
        })
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() - self.timestamp > STALE_AFTER_MS
    }

    pub fn into_session(self) -> TimerSession {
        TimerSession::resumed(
            self.current_activity,
            self.activity_category,
            self.current_record_id,
            self.start_time,
            Duration::milliseconds(self.elapsed_time),
        )
    }
}

pub struct RecoveryStore {
    slots: Arc<dyn SharedSlots>,
    clock: Arc<dyn Clock>,
}

impl RecoveryStore {
    pub fn new(slots: Arc<dyn SharedSlots>, clock: Arc<dyn Clock>) -> Self {
        Self { slots, clock }
    }

    /// Writes a snapshot of a running session and clears the slot for any other state.
    pub async fn save(&self, session: &TimerSession) -> Result<()> {
        match TimerSnapshot::of(session, self.clock.time()) {
            Some(snapshot) => {
                self.slots
                    .write(TIMER_SLOT, &serde_json::to_string(&snapshot)?)
                    .await?;
                debug!("Saved timer snapshot at {}", snapshot.timestamp);
                Ok(())
            }
            None => self.clear().await,
        }
    }

    /// Rebuilds a running session from the slot. The caller re-arms the ticker.
    pub async fn restore(&self) -> Result<Option<TimerSession>> {
        let Some(raw) = self.slots.read(TIMER_SLOT).await? else {
            return Ok(None);
        };
        let snapshot = match serde_json::from_str::<TimerSnapshot>(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("Discarding unreadable timer snapshot {raw:?}: {e}");
                self.clear().await?;
                return Ok(None);
            }
        };
        if snapshot.is_stale(self.clock.time()) {
            info!("Discarding timer snapshot from {}", snapshot.timestamp);
            self.clear().await?;
            return Ok(None);
        }

        info!("Recovered running timer for {}", snapshot.current_activity);
        Ok(Some(snapshot.into_session()))
    }

    pub async fn clear(&self) -> Result<()> {
        self.slots.remove(TIMER_SLOT).await
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        storage::slot::memory::MemorySlots, timer::TimerState,
        utils::clock::test_clock::ManualClock,
    };

    use super::*;

    const SAVED_AT: i64 = 1_700_000_000_000;

    fn running_session() -> TimerSession {
        let mut session = TimerSession::default();
        session.select_activity("Research", "Recharge").unwrap();
        session
            .start(DateTime::from_timestamp_millis(SAVED_AT - 30_000).unwrap())
            .unwrap();
        session.attach_record("r1".into());
        session.tick(DateTime::from_timestamp_millis(SAVED_AT).unwrap());
        session
    }

    async fn saved(clock: &ManualClock) -> (Arc<MemorySlots>, RecoveryStore) {
        let slots = Arc::new(MemorySlots::default());
        let store = RecoveryStore::new(slots.clone(), Arc::new(clock.clone()));
        store.save(&running_session()).await.unwrap();
        (slots, store)
    }

    #[tokio::test]
    async fn restores_within_an_hour() {
        let clock = ManualClock::at_millis(SAVED_AT);
        let (_, store) = saved(&clock).await;

        clock.set_millis(SAVED_AT + 3_599_999);
        let session = store.restore().await.unwrap().unwrap();

        assert_eq!(session.state(), TimerState::Running);
        assert_eq!(session.activity(), "Research");
        assert_eq!(session.activity_category(), "Recharge");
        assert_eq!(session.active_record_id(), Some(&"r1".into()));
        assert_eq!(session.elapsed(), Duration::seconds(30));
    }

    #[tokio::test]
    async fn discards_after_an_hour() {
        let clock = ManualClock::at_millis(SAVED_AT);
        let (slots, store) = saved(&clock).await;

        clock.set_millis(SAVED_AT + 3_600_001);
        assert_eq!(store.restore().await.unwrap(), None);
        assert_eq!(slots.read(TIMER_SLOT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn discards_corrupt_snapshot() {
        let clock = ManualClock::at_millis(SAVED_AT);
        let slots = Arc::new(MemorySlots::default());
        slots.write(TIMER_SLOT, "{\"currentActivity\":").await.unwrap();
        let store = RecoveryStore::new(slots.clone(), Arc::new(clock));

        assert_eq!(store.restore().await.unwrap(), None);
        assert_eq!(slots.read(TIMER_SLOT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn saving_idle_session_clears_slot() {
        let clock = ManualClock::at_millis(SAVED_AT);
        let (slots, store) = saved(&clock).await;

        store.save(&TimerSession::default()).await.unwrap();
        assert_eq!(slots.read(TIMER_SLOT).await.unwrap(), None);
    }

    #[test]
    fn snapshot_uses_millisecond_fields() {
        let snapshot = TimerSnapshot::of(
            &running_session(),
            DateTime::from_timestamp_millis(SAVED_AT).unwrap(),
        )
        .unwrap();
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["startTime"], SAVED_AT - 30_000);
        assert_eq!(value["elapsedTime"], 30_000);
        assert_eq!(value["currentRecordId"], "r1");
        assert_eq!(value["timestamp"], SAVED_AT);
    }
}
