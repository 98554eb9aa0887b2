//! The single owner of all client state: record cache, timer session, category registry and
//! identity. Shared as `Arc<tokio::sync::Mutex<Tracker>>`; every transition runs under the lock.

use std::sync::Arc;

use chrono::{DateTime, Duration, Local, Utc};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{TrackerError, TrackerResult},
    model::{
        CategoryRegistry, DailyStats, Record, RecordDraft, RecordId, RecordMetadata, RecordPatch,
        Segment,
    },
    recovery::RecoveryStore,
    sync::{PersistenceSync, RecordPage, RecordQuery, RefreshMarker},
    timer::{StartPlan, StopPlan, TimerSession},
    utils::clock::Clock,
};

pub struct Tracker {
    sync: PersistenceSync,
    session: TimerSession,
    recovery: RecoveryStore,
    categories: CategoryRegistry,
    username: String,
    selected: Option<RecordId>,
    clock: Arc<dyn Clock>,
}

impl Tracker {
    pub fn new(
        sync: PersistenceSync,
        recovery: RecoveryStore,
        clock: Arc<dyn Clock>,
        username: &str,
    ) -> Self {
        Self {
            sync,
            session: TimerSession::default(),
            recovery,
            categories: CategoryRegistry::fallback(),
            username: username.to_string(),
            selected: None,
            clock,
        }
    }

    /// Builds a tracker and brings it up to date: categories, the record list and a timer that
    /// was running when the last instance exited. Store failures are logged and leave defaults.
    pub async fn open(
        sync: PersistenceSync,
        recovery: RecoveryStore,
        clock: Arc<dyn Clock>,
        username: &str,
    ) -> Self {
        let mut tracker = Self::new(sync, recovery, clock, username);
        tracker.categories = tracker.sync.categories().await;
        let _ = tracker.reload().await;
        tracker.recover().await;
        tracker
    }

    pub fn session(&self) -> &TimerSession {
        &self.session
    }

    pub fn records(&self) -> &[Record] {
        self.sync.records()
    }

    pub fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn selected(&self) -> Option<&RecordId> {
        self.selected.as_ref()
    }

    /// Replaces the session with the one in the recovery slot, if any. Returns whether it did.
    pub async fn recover(&mut self) -> bool {
        match self.recovery.restore().await {
            Ok(Some(session)) => {
                self.session = session;
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to restore timer {e:?}");
                false
            }
        }
    }

    pub async fn reload(&mut self) -> TrackerResult<()> {
        self.sync.load(&self.username).await
    }

    /// An empty category is filled from the registry.
    pub fn select_activity(&mut self, activity: &str, category: Option<&str>) -> TrackerResult<()> {
        let activity = activity.trim();
        let category = match category.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => self.categories.category_or_activity(activity),
        };
        self.session.select_activity(activity, &category)
    }

    /// Starts the timer on the selected activity. The timer keeps running even if the store
    /// call fails; the error is returned for the caller to report.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> TrackerResult<()> {
        let plan = self.session.start(self.clock.time())?;
        self.save_snapshot().await;

        match plan {
            StartPlan::Create(draft) => {
                self.create_for_session(&draft).await?;
            }
            StartPlan::Append { id, at } => match self.append_open_segment(&id, at).await {
                Err(TrackerError::NotFound(_)) => {
                    warn!("Record {id} is gone, starting a new one");
                    self.discard_missing(&id);
                    let draft = self.session_draft(vec![Segment::open(at)]);
                    self.create_for_session(&draft).await?;
                }
                result => {
                    result?;
                }
            },
        }
        info!("Timer started for {}", self.session.activity());
        Ok(())
    }

    /// Closes the running segment and returns the record as stored afterwards.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> TrackerResult<Record> {
        let plan = self.session.stop(self.clock.time())?;
        self.clear_snapshot().await;

        let record = match plan {
            StopPlan::Finish { id, start, end } => {
                match self.close_segment(&id, start, end).await {
                    Err(TrackerError::NotFound(_)) => {
                        warn!("Record {id} is gone, saving the segment as a new one");
                        self.discard_missing(&id);
                        let draft = self.session_draft(vec![Segment::new(start, end)?]);
                        self.create_for_session(&draft).await?
                    }
                    result => result?,
                }
            }
            StopPlan::Create(draft) => self.create_for_session(&draft).await?,
        };
        info!(
            "Timer stopped for {}, {}ms recorded",
            record.activity,
            record.duration().num_milliseconds()
        );
        Ok(record)
    }

    async fn create_for_session(&mut self, draft: &RecordDraft) -> TrackerResult<Record> {
        let record = self.sync.create(draft).await?;
        self.session.attach_record(record.id.clone());
        self.save_snapshot().await;
        Ok(record)
    }

    async fn append_open_segment(
        &mut self,
        id: &RecordId,
        at: DateTime<Utc>,
    ) -> TrackerResult<Record> {
        let mut record = self.sync.get(id).await?;
        record.begin_segment(at);
        self.sync.update(id, &RecordPatch::timing_of(&record)).await
    }

    async fn close_segment(
        &mut self,
        id: &RecordId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrackerResult<Record> {
        let mut record = self.sync.get(id).await?;
        record.finish_segment(start, end)?;
        self.sync.update(id, &RecordPatch::timing_of(&record)).await
    }

    fn session_draft(&self, segments: Vec<Segment>) -> RecordDraft {
        RecordDraft::new(
            self.session.activity(),
            self.session.activity_category(),
            segments,
        )
    }

    /// Fetches `id`, forgetting it locally if the store no longer has it.
    async fn fetch(&mut self, id: &RecordId) -> TrackerResult<Record> {
        let result = self.sync.get(id).await;
        self.discard_if_missing(id, result)
    }

    async fn push(&mut self, id: &RecordId, patch: &RecordPatch) -> TrackerResult<Record> {
        let result = self.sync.update(id, patch).await;
        self.discard_if_missing(id, result)
    }

    fn discard_if_missing<T>(&mut self, id: &RecordId, result: TrackerResult<T>) -> TrackerResult<T> {
        if result.as_ref().is_err_and(TrackerError::is_not_found) {
            self.discard_missing(id);
        }
        result
    }

    /// A record the store no longer knows is dropped everywhere locally.
    fn discard_missing(&mut self, id: &RecordId) {
        self.sync.forget(id);
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
    }

    /// Advances the running timer to now. Returns the elapsed time of the running segment.
    pub async fn tick(&mut self) -> Option<Duration> {
        let outcome = self.session.tick(self.clock.time())?;
        if outcome.snapshot_due {
            self.save_snapshot().await;
        }
        Some(outcome.elapsed)
    }

    /// Forgets the session without touching the store.
    pub async fn abandon(&mut self) {
        self.session.abandon();
        self.clear_snapshot().await;
        info!("Timer abandoned");
    }

    /// Makes `id` the record the next start appends to and optionally starts right away.
    pub async fn continue_record(&mut self, id: &RecordId, start: bool) -> TrackerResult<Record> {
        let record = self.fetch(id).await?;
        self.session.continue_record(&record)?;
        self.selected = Some(id.clone());
        if start {
            self.start().await?;
        }
        Ok(record)
    }

    /// Fetches `id` and makes it the selected detail record.
    pub async fn select_record(&mut self, id: &RecordId) -> TrackerResult<Record> {
        let record = self.fetch(id).await?;
        self.selected = Some(id.clone());
        Ok(record)
    }

    /// Deleting a record the store no longer has only cleans up locally.
    pub async fn delete_record(&mut self, id: &RecordId) -> TrackerResult<()> {
        match self.sync.delete(id).await {
            Err(TrackerError::NotFound(_)) => {
                debug!("Record {id} was already gone");
                self.discard_missing(id);
            }
            result => result?,
        }
        if self.session.forget_record(id) {
            debug!("Deleted record was the active one, timer reset");
            self.clear_snapshot().await;
        }
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        Ok(())
    }

    pub async fn add_segment(
        &mut self,
        id: &RecordId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrackerResult<Record> {
        let mut record = self.fetch(id).await?;
        record.append_segment(start, end)?;
        self.push(id, &RecordPatch::timing_of(&record)).await
    }

    /// An index past the end changes nothing and sends nothing.
    pub async fn remove_segment(&mut self, id: &RecordId, index: usize) -> TrackerResult<Record> {
        let mut record = self.fetch(id).await?;
        if record.remove_segment(index).is_none() {
            debug!("No segment {index} in {id}");
            return Ok(record);
        }
        self.push(id, &RecordPatch::timing_of(&record)).await
    }

    pub async fn edit_segment(
        &mut self,
        id: &RecordId,
        index: usize,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrackerResult<Record> {
        let mut record = self.fetch(id).await?;
        if !record.edit_segment(index, start, end)? {
            debug!("No segment {index} in {id}");
            return Ok(record);
        }
        self.push(id, &RecordPatch::timing_of(&record)).await
    }

    pub async fn edit_metadata(
        &mut self,
        id: &RecordId,
        metadata: RecordMetadata,
    ) -> TrackerResult<Record> {
        let mut record = self.fetch(id).await?;
        record.set_metadata(metadata)?;
        self.push(id, &RecordPatch::metadata_of(&record)).await
    }

    /// Moves the current records to `username` and switches to it.
    pub async fn set_username(&mut self, username: &str) -> TrackerResult<()> {
        let username = username.trim();
        if username.is_empty() {
            return Err(TrackerError::validation("username can't be empty"));
        }
        self.sync.set_username(username, &self.username).await?;
        info!("Username changed from {:?} to {username:?}", self.username);
        self.username = username.to_string();
        let _ = self.reload().await;
        Ok(())
    }

    /// Totals of the cached records that belong to today in local time.
    pub fn daily_stats(&self) -> DailyStats {
        let today = self.clock.time().with_timezone(&Local).date_naive();
        DailyStats::for_day(self.sync.records(), today)
    }

    pub async fn history(&self, query: &RecordQuery) -> TrackerResult<RecordPage> {
        self.sync.history(query).await
    }

    pub fn history_stream(
        &self,
        query: RecordQuery,
    ) -> impl Stream<Item = TrackerResult<Record>> + Send + 'static {
        self.sync.history_stream(query)
    }

    pub fn subscribe(&self, shutdown: CancellationToken) -> mpsc::Receiver<RefreshMarker> {
        self.sync.subscribe(shutdown)
    }

    /// Reloads after another instance changed something. A running timer whose recovery slot
    /// was cleared meanwhile was stopped or abandoned elsewhere and is dropped here too.
    pub async fn on_refresh(&mut self, marker: &RefreshMarker) {
        debug!("Reloading after change in {}", marker.source_page);
        let _ = self.reload().await;
        if !self.session.is_running() {
            return;
        }
        match self.recovery.restore().await {
            Ok(None) => {
                info!("Timer was finished by {}", marker.source_page);
                self.session.abandon();
            }
            Ok(Some(_)) => (),
            Err(e) => warn!("Failed to check timer snapshot {e:?}"),
        }
    }

    /// Persists the session so a restart within the hour picks it up. Snapshot failures never
    /// stop the timer.
    pub async fn save_snapshot(&self) {
        if let Err(e) = self.recovery.save(&self.session).await {
            warn!("Failed to save timer snapshot {e:?}");
        }
    }

    async fn clear_snapshot(&self) {
        if let Err(e) = self.recovery.clear().await {
            warn!("Failed to clear timer snapshot {e:?}");
        }
    }
}
