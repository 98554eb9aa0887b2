use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    error::TrackerResult,
    model::{Category, Record, RecordDraft, RecordId, RecordPatch},
};

/// The remote, authoritative copy of every record.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records visible to `owner`. An empty owner lists the anonymous records.
    async fn list_records(&self, owner: &str) -> TrackerResult<Vec<Record>>;

    async fn create_record(&self, draft: &RecordDraft) -> TrackerResult<Record>;

    async fn get_record(&self, id: &RecordId) -> TrackerResult<Record>;

    /// Applies `patch` and returns the record as stored afterwards.
    async fn update_record(&self, id: &RecordId, patch: &RecordPatch) -> TrackerResult<Record>;

    async fn delete_record(&self, id: &RecordId) -> TrackerResult<()>;

    async fn list_all_records(&self, query: &RecordQuery) -> TrackerResult<RecordPage>;

    async fn set_username(&self, username: &str, old_username: &str) -> TrackerResult<()>;

    async fn list_categories(&self) -> TrackerResult<Vec<Category>>;
}

/// Filters for the history listing. Empty filters are not sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordQuery {
    pub page: u32,
    pub per_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
            search: None,
            date_from: None,
            date_to: None,
            activity: None,
            emotion: None,
        }
    }
}

impl RecordQuery {
    pub fn with_page(&self, page: u32) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u32,
}

impl Pagination {
    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_skips_empty_filters() {
        let query = RecordQuery {
            search: Some("read".into()),
            date_from: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..RecordQuery::default()
        };
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "page": 1,
                "per_page": 20,
                "search": "read",
                "date_from": "2024-03-01",
            })
        );
    }

    #[test]
    fn last_page_has_no_next() {
        let pagination = Pagination {
            page: 3,
            per_page: 20,
            total: 41,
            pages: 3,
        };
        assert!(!pagination.has_next());
        assert!(Pagination { page: 2, ..pagination }.has_next());
    }
}
