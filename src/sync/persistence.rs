use std::sync::Arc;

use futures::{stream, Stream, TryStreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{TrackerError, TrackerResult},
    model::{CategoryRegistry, Record, RecordDraft, RecordId, RecordPatch},
};

use super::{
    refresh::{RefreshChannel, RefreshMarker},
    store::{RecordPage, RecordQuery, RecordStore},
};

/// Local view of the store. Records are kept newest first and every entry is exactly what the
/// store last returned for it.
pub struct PersistenceSync {
    store: Arc<dyn RecordStore>,
    refresh: RefreshChannel,
    records: Vec<Record>,
}

impl PersistenceSync {
    pub fn new(store: Arc<dyn RecordStore>, refresh: RefreshChannel) -> Self {
        Self {
            store,
            refresh,
            records: vec![],
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn cached(&self, id: &RecordId) -> Option<&Record> {
        self.records.iter().find(|v| &v.id == id)
    }

    /// Replaces the cache with `owner`'s records. On failure the previous list stays.
    pub async fn load(&mut self, owner: &str) -> TrackerResult<()> {
        match self.store.list_records(owner).await {
            Ok(mut records) => {
                sort_newest_first(&mut records);
                debug!("Loaded {} records", records.len());
                self.records = records;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load records, keeping {} cached: {e}", self.records.len());
                Err(e)
            }
        }
    }

    pub async fn create(&mut self, draft: &RecordDraft) -> TrackerResult<Record> {
        let record = self
            .store
            .create_record(draft)
            .await
            .inspect_err(|e| warn!("Failed to create record {e}"))?;
        info!("Created record {}", record.id);
        self.records.push(record.clone());
        sort_newest_first(&mut self.records);
        self.broadcast_refresh().await;
        Ok(record)
    }

    /// Sends `patch` and stores the store's answer in place of the cached entry.
    pub async fn update(&mut self, id: &RecordId, patch: &RecordPatch) -> TrackerResult<Record> {
        let record = self
            .store
            .update_record(id, patch)
            .await
            .inspect_err(|e| warn!("Failed to update record {id} {e}"))?;
        if let Some(cached) = self.records.iter_mut().find(|v| &v.id == id) {
            *cached = record.clone();
            sort_newest_first(&mut self.records);
        }
        self.broadcast_refresh().await;
        Ok(record)
    }

    pub async fn delete(&mut self, id: &RecordId) -> TrackerResult<()> {
        self.store
            .delete_record(id)
            .await
            .inspect_err(|e| warn!("Failed to delete record {id} {e}"))?;
        self.records.retain(|v| &v.id != id);
        info!("Deleted record {id}");
        self.broadcast_refresh().await;
        Ok(())
    }

    /// Drops `id` from the cache without telling the store.
    pub fn forget(&mut self, id: &RecordId) {
        self.records.retain(|v| &v.id != id);
    }

    pub async fn get(&self, id: &RecordId) -> TrackerResult<Record> {
        if let Some(record) = self.cached(id) {
            return Ok(record.clone());
        }
        self.store.get_record(id).await
    }

    /// Failing to publish only delays other instances until their next reload.
    pub async fn broadcast_refresh(&self) {
        if let Err(e) = self.refresh.publish().await {
            warn!("Failed to publish refresh marker {e:?}");
        }
    }

    pub fn subscribe(&self, shutdown: CancellationToken) -> mpsc::Receiver<RefreshMarker> {
        self.refresh.subscribe(shutdown)
    }

    pub async fn history(&self, query: &RecordQuery) -> TrackerResult<RecordPage> {
        self.store.list_all_records(query).await
    }

    /// Every record matching `query`, page after page, starting at `query.page`.
    pub fn history_stream(
        &self,
        query: RecordQuery,
    ) -> impl Stream<Item = TrackerResult<Record>> + Send + 'static {
        let store = self.store.clone();
        stream::try_unfold(Some(query), move |query| {
            let store = store.clone();
            async move {
                let Some(query) = query else {
                    return Ok(None);
                };
                let page = store.list_all_records(&query).await?;
                let next = (page.pagination.has_next() && !page.records.is_empty())
                    .then(|| query.with_page(query.page + 1));
                let records = stream::iter(page.records.into_iter().map(Ok::<_, TrackerError>));
                Ok::<_, TrackerError>(Some((records, next)))
            }
        })
        .try_flatten()
    }

    pub async fn set_username(&self, username: &str, old_username: &str) -> TrackerResult<()> {
        self.store.set_username(username, old_username).await
    }

    /// The store's category registry, or the built-in fallback if it can't be fetched.
    pub async fn categories(&self) -> CategoryRegistry {
        match self.store.list_categories().await {
            Ok(categories) if !categories.is_empty() => CategoryRegistry::new(categories),
            Ok(_) => {
                warn!("Category registry is empty, using fallback categories");
                CategoryRegistry::fallback()
            }
            Err(e) => {
                warn!("Failed to load categories, using fallback categories: {e}");
                CategoryRegistry::fallback()
            }
        }
    }
}

/// Records without a start go last.
fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| b.start_time().cmp(&a.start_time()));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::DateTime;
    use futures::StreamExt;
    use mockall::predicate::eq;

    use crate::{
        model::Segment,
        storage::{slot::memory::MemorySlots, SharedSlots},
        sync::{
            refresh::REFRESH_SLOT,
            store::{MockRecordStore, Pagination},
        },
        utils::{clock::test_clock::ManualClock, logging::TEST_LOGGING},
    };

    use super::*;

    fn record(id: &str, start_ms: i64) -> Record {
        let start = DateTime::from_timestamp_millis(start_ms).unwrap();
        Record::from_draft(
            id.into(),
            RecordDraft::new("Reading", "Recharge", vec![Segment::open(start)]),
        )
    }

    fn sync_with(store: MockRecordStore, slots: Arc<MemorySlots>) -> PersistenceSync {
        let refresh = RefreshChannel::new(
            slots,
            Arc::new(ManualClock::at_millis(0)),
            "test",
            Duration::from_secs(1),
        );
        PersistenceSync::new(Arc::new(store), refresh)
    }

    #[tokio::test]
    async fn load_sorts_newest_first_and_keeps_stale_cache_on_failure() {
        *TEST_LOGGING;
        let mut store = MockRecordStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_list_records()
            .with(eq("alice"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![record("old", 1_000), record("new", 5_000)]));
        store
            .expect_list_records()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(TrackerError::Rejected("offline".into())));

        let mut sync = sync_with(store, Arc::default());
        sync.load("alice").await.unwrap();
        let ids = sync.records().iter().map(|v| v.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["new", "old"]);

        assert!(sync.load("alice").await.is_err());
        assert_eq!(sync.records().len(), 2);
    }

    #[tokio::test]
    async fn update_replaces_cache_entry_with_response() {
        let mut store = MockRecordStore::new();
        store
            .expect_list_records()
            .returning(|_| Ok(vec![record("r1", 1_000)]));
        store.expect_update_record().times(1).returning(|id, _| {
            let mut stored = record(id.as_str(), 1_000);
            stored.remark = "from server".into();
            Ok(stored)
        });
        let slots = Arc::new(MemorySlots::default());
        let mut sync = sync_with(store, slots.clone());
        sync.load("").await.unwrap();

        let patch = RecordPatch {
            remark: Some("local".into()),
            ..RecordPatch::default()
        };
        sync.update(&"r1".into(), &patch).await.unwrap();

        assert_eq!(sync.cached(&"r1".into()).unwrap().remark, "from server");
        assert!(slots.read(REFRESH_SLOT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_mutation_leaves_cache_and_does_not_broadcast() {
        let mut store = MockRecordStore::new();
        store
            .expect_list_records()
            .returning(|_| Ok(vec![record("r1", 1_000)]));
        store
            .expect_delete_record()
            .returning(|_| Err(TrackerError::Rejected("locked".into())));
        let slots = Arc::new(MemorySlots::default());
        let mut sync = sync_with(store, slots.clone());
        sync.load("").await.unwrap();

        assert!(sync.delete(&"r1".into()).await.is_err());
        assert_eq!(sync.records().len(), 1);
        assert_eq!(slots.read(REFRESH_SLOT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_falls_back_to_store() {
        let mut store = MockRecordStore::new();
        store
            .expect_get_record()
            .with(eq(RecordId::from("missing")))
            .returning(|id| Err(TrackerError::NotFound(id.clone())));
        store
            .expect_get_record()
            .returning(|id| Ok(record(id.as_str(), 0)));
        let sync = sync_with(store, Arc::default());

        assert!(matches!(
            sync.get(&"missing".into()).await,
            Err(TrackerError::NotFound(_))
        ));
        assert_eq!(sync.get(&"elsewhere".into()).await.unwrap().id.as_str(), "elsewhere");
    }

    #[tokio::test]
    async fn history_stream_walks_every_page() {
        let mut store = MockRecordStore::new();
        store.expect_list_all_records().times(2).returning(|query| {
            let records = match query.page {
                1 => vec![record("a", 0), record("b", 0)],
                _ => vec![record("c", 0)],
            };
            Ok(RecordPage {
                records,
                pagination: Pagination {
                    page: query.page,
                    per_page: 2,
                    total: 3,
                    pages: 2,
                },
            })
        });
        let sync = sync_with(store, Arc::default());

        let ids = sync
            .history_stream(RecordQuery {
                per_page: 2,
                ..RecordQuery::default()
            })
            .map(|v| v.unwrap().id.to_string())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn categories_fall_back_when_registry_is_unavailable() {
        let mut store = MockRecordStore::new();
        store
            .expect_list_categories()
            .returning(|| Err(TrackerError::Decode("html".into())));
        let sync = sync_with(store, Arc::default());

        assert!(sync.categories().await.is_known("Work output"));
    }
}
