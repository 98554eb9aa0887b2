use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::{
    error::{TrackerError, TrackerResult},
    model::{Category, Record, RecordDraft, RecordId, RecordPatch},
};

use super::store::{Pagination, RecordPage, RecordQuery, RecordStore};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// [RecordStore] speaking the JSON API of the record server.
pub struct HttpRecordStore {
    client: Client,
    base_url: String,
}

impl HttpRecordStore {
    pub fn new(base_url: &str) -> TrackerResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> TrackerResult<Value> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        parse_envelope(status, &text)
    }
}

/// Every response is wrapped as `{success, error?, ...}`.
fn parse_envelope(status: StatusCode, text: &str) -> TrackerResult<Value> {
    let body = serde_json::from_str::<Value>(text).ok();
    let error_message = body
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if !status.is_success() {
        return Err(TrackerError::Api {
            status: status.as_u16(),
            message: error_message.unwrap_or_else(|| text.to_string()),
        });
    }

    let body = body.ok_or_else(|| TrackerError::Decode(format!("response is not JSON: {text}")))?;
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(TrackerError::Rejected(
            error_message.unwrap_or_else(|| "no reason given".into()),
        ));
    }
    Ok(body)
}

fn take_field<T: DeserializeOwned>(body: &mut Value, field: &str) -> TrackerResult<T> {
    let value = body
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| TrackerError::Decode(format!("missing `{field}`")))?;
    serde_json::from_value(value).map_err(|e| TrackerError::Decode(format!("invalid `{field}`: {e}")))
}

/// Records that fail to decode are dropped one by one instead of failing the whole list.
fn take_records(body: &mut Value) -> TrackerResult<Vec<Record>> {
    let values: Vec<Value> = take_field(body, "records")?;
    Ok(values
        .into_iter()
        .filter_map(|v| {
            serde_json::from_value::<Record>(v.clone())
                .inspect_err(|e| warn!("Dropping malformed record {v}: {e}"))
                .ok()
        })
        .collect())
}

fn not_found_as(id: &RecordId) -> impl FnOnce(TrackerError) -> TrackerError + '_ {
    move |e| match e {
        TrackerError::Api { status: 404, .. } => TrackerError::NotFound(id.clone()),
        e => e,
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    #[instrument(skip(self))]
    async fn list_records(&self, owner: &str) -> TrackerResult<Vec<Record>> {
        let mut request = self.client.get(self.url("/api/records"));
        if !owner.is_empty() {
            request = request.query(&[("username", owner)]);
        }
        let mut body = self.send(request).await?;
        let records = take_records(&mut body)?;
        debug!("Listed {} records", records.len());
        Ok(records)
    }

    #[instrument(skip_all, fields(activity = %draft.activity))]
    async fn create_record(&self, draft: &RecordDraft) -> TrackerResult<Record> {
        let request = self.client.post(self.url("/api/records")).json(draft);
        let mut body = self.send(request).await?;
        take_field(&mut body, "record")
    }

    #[instrument(skip(self))]
    async fn get_record(&self, id: &RecordId) -> TrackerResult<Record> {
        let request = self.client.get(self.url(&format!("/api/records/{id}")));
        let mut body = self.send(request).await.map_err(not_found_as(id))?;
        take_field(&mut body, "record")
    }

    #[instrument(skip(self, patch))]
    async fn update_record(&self, id: &RecordId, patch: &RecordPatch) -> TrackerResult<Record> {
        let request = self
            .client
            .put(self.url(&format!("/api/records/{id}")))
            .json(patch);
        let mut body = self.send(request).await.map_err(not_found_as(id))?;
        take_field(&mut body, "record")
    }

    #[instrument(skip(self))]
    async fn delete_record(&self, id: &RecordId) -> TrackerResult<()> {
        let request = self.client.delete(self.url(&format!("/api/records/{id}")));
        self.send(request).await.map_err(not_found_as(id))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_all_records(&self, query: &RecordQuery) -> TrackerResult<RecordPage> {
        let request = self.client.get(self.url("/api/all-records")).query(query);
        let mut body = self.send(request).await?;
        let records = take_records(&mut body)?;
        let pagination: Pagination = take_field(&mut body, "pagination")?;
        Ok(RecordPage {
            records,
            pagination,
        })
    }

    #[instrument(skip(self))]
    async fn set_username(&self, username: &str, old_username: &str) -> TrackerResult<()> {
        let request = self
            .client
            .post(self.url("/api/set-username"))
            .json(&json!({ "username": username, "oldUsername": old_username }));
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_categories(&self) -> TrackerResult<Vec<Category>> {
        let request = self.client.get(self.url("/api/activity-categories"));
        let mut body = self.send(request).await?;
        let mut data: Value = take_field(&mut body, "data")?;
        take_field(&mut data, "categories")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_successful_envelope() {
        let mut body = parse_envelope(
            StatusCode::OK,
            r#"{"success": true, "record": {"id": "r1", "activity": "Reading"}}"#,
        )
        .unwrap();
        let record: Record = take_field(&mut body, "record").unwrap();
        assert_eq!(record.id, RecordId::from("r1"));
        assert!(record.segments().is_empty());
    }

    #[test]
    fn success_false_is_rejected() {
        let err = parse_envelope(StatusCode::OK, r#"{"success": false, "error": "disk full"}"#)
            .unwrap_err();
        assert!(matches!(err, TrackerError::Rejected(m) if m == "disk full"));
    }

    #[test]
    fn http_error_keeps_status_and_message() {
        let err = parse_envelope(
            StatusCode::NOT_FOUND,
            r#"{"success": false, "error": "no such record"}"#,
        )
        .unwrap_err();
        let id = RecordId::from("gone");
        assert!(matches!(not_found_as(&id)(err), TrackerError::NotFound(v) if v == id));

        let err = parse_envelope(StatusCode::BAD_GATEWAY, "upstream down").unwrap_err();
        assert!(
            matches!(err, TrackerError::Api { status: 502, message } if message == "upstream down")
        );
    }

    #[test]
    fn malformed_records_are_dropped() {
        let mut body = parse_envelope(
            StatusCode::OK,
            r#"{"success": true, "records": [{"id": "a", "activity": "Nap"}, {"activity": 4}]}"#,
        )
        .unwrap();
        let records = take_records(&mut body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].activity, "Nap");
    }

    #[test]
    fn missing_field_is_decode_error() {
        let mut body = parse_envelope(StatusCode::OK, r#"{"success": true}"#).unwrap();
        assert!(matches!(
            take_field::<Record>(&mut body, "record"),
            Err(TrackerError::Decode(_))
        ));
    }
}
