use std::{fmt::Display, sync::Arc};

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TrackerError, TrackerResult};

use super::segment::{lenient_time, Segment};

/// Identifier assigned by the record store. Never created on the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Arc<str>);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

/// Sum of segment lengths. Incomplete segments are skipped, inverted ones count as zero.
pub fn compute_duration(segments: &[Segment]) -> Duration {
    segments
        .iter()
        .fold(Duration::zero(), |total, segment| total + segment.length())
}

/// Wall clock distance from the first segment's start to the last segment's end. Expects the
/// segments ordered by start. Returns zero when either bound is missing.
pub fn compute_time_span(segments: &[Segment]) -> Duration {
    let first_start = segments.first().and_then(|v| v.start);
    let last_end = segments.last().and_then(|v| v.end);
    match (first_start, last_end) {
        (Some(start), Some(end)) if end >= start => end - start,
        _ => Duration::zero(),
    }
}

/// Stable sort by start. Segments without a start go last.
pub fn sort_segments(segments: &mut [Segment]) {
    segments.sort_by_key(|v| (v.start.is_none(), v.start));
}

/// Every field of a record that is derived from its segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregates {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub time_span: Duration,
    pub pause_count: u32,
}

impl Aggregates {
    pub fn from_segments(segments: &[Segment]) -> Self {
        let aggregates = Self {
            start_time: segments.first().and_then(|v| v.start),
            end_time: segments.last().and_then(|v| v.end),
            duration: compute_duration(segments),
            time_span: compute_time_span(segments),
            pause_count: segments.len() as u32,
        };
        if segments.windows(2).any(|pair| pair[0].overlaps(&pair[1])) {
            debug!(
                "Overlapping segments: duration {} against time span {}",
                aggregates.duration, aggregates.time_span
            );
        }
        aggregates
    }
}

/// Descriptive fields a user may edit directly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordMetadata {
    pub activity: String,
    pub activity_category: String,
    pub remark: String,
    pub emotion: String,
    pub pause_count: u32,
}

/// A persisted activity entry. Derived fields are private so they can only change together with
/// the segments they come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub activity: String,
    #[serde(default)]
    pub activity_category: String,
    #[serde(default)]
    segments: Vec<Segment>,
    #[serde(default, with = "lenient_time")]
    start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "lenient_time")]
    end_time: Option<DateTime<Utc>>,
    #[serde(default = "Duration::zero", with = "millis")]
    duration: Duration,
    #[serde(default = "Duration::zero", with = "millis")]
    time_span: Duration,
    #[serde(default)]
    pause_count: u32,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub emotion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl Record {
    /// Builds the record the store would return for `draft`. Mostly useful for store fakes.
    pub fn from_draft(id: RecordId, draft: RecordDraft) -> Self {
        Self {
            id,
            activity: draft.activity,
            activity_category: draft.activity_category,
            segments: draft.segments,
            start_time: draft.start_time,
            end_time: draft.end_time,
            duration: draft.duration,
            time_span: draft.time_span,
            pause_count: draft.pause_count,
            remark: draft.remark,
            emotion: draft.emotion,
            date: None,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn time_span(&self) -> Duration {
        self.time_span
    }

    pub fn pause_count(&self) -> u32 {
        self.pause_count
    }

    /// Day the record belongs to. Prefers the store's `date`, falls back to the local day of the
    /// start time.
    pub fn day(&self) -> Option<NaiveDate> {
        self.date
            .as_deref()
            .and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
            .or_else(|| self.start_time.map(|v| v.with_timezone(&Local).date_naive()))
    }

    pub fn emotion_tags(&self) -> Vec<&str> {
        split_emotions(&self.emotion)
    }

    pub fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            activity: self.activity.clone(),
            activity_category: self.activity_category.clone(),
            remark: self.remark.clone(),
            emotion: self.emotion.clone(),
            pause_count: self.pause_count,
        }
    }

    /// Appends a finished segment given by the user and re-sorts by start. Segments may be
    /// entered out of order, so the record's start time can move backwards.
    pub fn append_segment(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> TrackerResult<()> {
        let segment = Segment::new(start, end)?;
        self.segments.push(segment);
        self.recompute();
        Ok(())
    }

    /// Opens a zero-length segment at `at`, the way a resumed timer does.
    pub fn begin_segment(&mut self, at: DateTime<Utc>) {
        self.segments.push(Segment::open(at));
        self.recompute();
    }

    /// Closes the segment that began at `start`, or else the last one still open. If the store
    /// lost it, it is appended instead.
    pub fn finish_segment(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> TrackerResult<()> {
        let finished = Segment::new(start, end)?;
        let index = self
            .segments
            .iter()
            .rposition(|v| v.start == Some(start))
            .or_else(|| self.segments.iter().rposition(Segment::is_open));
        match index {
            Some(index) => self.segments[index] = finished,
            None => self.segments.push(finished),
        }
        self.recompute();
        Ok(())
    }

    /// Removes the segment at `index`. Out of range indices change nothing.
    pub fn remove_segment(&mut self, index: usize) -> Option<Segment> {
        if index >= self.segments.len() {
            return None;
        }
        let removed = self.segments.remove(index);
        self.recompute();
        Some(removed)
    }

    /// Replaces the bounds of the segment at `index`. Returns `false` when the index is out of
    /// range, in which case nothing changes.
    pub fn edit_segment(
        &mut self,
        index: usize,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrackerResult<bool> {
        let segment = Segment::new(start, end)?;
        let Some(target) = self.segments.get_mut(index) else {
            return Ok(false);
        };
        *target = segment;
        self.recompute();
        Ok(true)
    }

    pub fn set_metadata(&mut self, metadata: RecordMetadata) -> TrackerResult<()> {
        validate_metadata(&metadata)?;
        let RecordMetadata {
            activity,
            activity_category,
            remark,
            emotion,
            pause_count,
        } = metadata;
        self.activity = activity;
        self.activity_category = activity_category;
        self.remark = remark;
        self.emotion = emotion;
        self.pause_count = pause_count;
        Ok(())
    }

    fn recompute(&mut self) {
        sort_segments(&mut self.segments);
        let Aggregates {
            start_time,
            end_time,
            duration,
            time_span,
            pause_count,
        } = Aggregates::from_segments(&self.segments);
        self.start_time = start_time;
        self.end_time = end_time;
        self.duration = duration;
        self.time_span = time_span;
        self.pause_count = pause_count;
    }
}

fn validate_metadata(metadata: &RecordMetadata) -> TrackerResult<()> {
    if metadata.activity.trim().is_empty() {
        return Err(TrackerError::validation("activity name is required"));
    }
    if metadata.activity_category.trim().is_empty() {
        return Err(TrackerError::validation("activity category is required"));
    }
    Ok(())
}

pub fn split_emotions(emotion: &str) -> Vec<&str> {
    emotion
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}

pub fn join_emotions<'a>(tags: impl IntoIterator<Item = &'a str>) -> String {
    tags.into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A record that has not been created yet. The store assigns its id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub activity: String,
    pub activity_category: String,
    #[serde(with = "lenient_time")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(with = "lenient_time")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(with = "millis")]
    pub duration: Duration,
    #[serde(with = "millis")]
    pub time_span: Duration,
    pub remark: String,
    pub emotion: String,
    pub pause_count: u32,
    pub segments: Vec<Segment>,
}

impl RecordDraft {
    pub fn new(
        activity: impl Into<String>,
        activity_category: impl Into<String>,
        mut segments: Vec<Segment>,
    ) -> Self {
        sort_segments(&mut segments);
        let aggregates = Aggregates::from_segments(&segments);
        Self {
            activity: activity.into(),
            activity_category: activity_category.into(),
            start_time: aggregates.start_time,
            end_time: aggregates.end_time,
            duration: aggregates.duration,
            time_span: aggregates.time_span,
            remark: String::new(),
            emotion: String::new(),
            pause_count: aggregates.pause_count,
            segments,
        }
    }
}

/// Partial update sent to the store. Segments always travel as a full replacement list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<Segment>>,
    /// `Some(None)` clears the field on the store.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "patch_time")]
    pub start_time: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "patch_time")]
    pub end_time: Option<Option<DateTime<Utc>>>,
    #[serde(rename = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(rename = "timeSpan", skip_serializing_if = "Option::is_none")]
    pub time_span_ms: Option<i64>,
}

impl RecordPatch {
    /// Segment list of `record` together with everything derived from it.
    pub fn timing_of(record: &Record) -> Self {
        Self {
            pause_count: Some(record.pause_count),
            segments: Some(record.segments.clone()),
            start_time: Some(record.start_time),
            end_time: Some(record.end_time),
            duration_ms: Some(record.duration.num_milliseconds()),
            time_span_ms: Some(record.time_span.num_milliseconds()),
            ..Self::default()
        }
    }

    pub fn metadata_of(record: &Record) -> Self {
        Self {
            activity: Some(record.activity.clone()),
            activity_category: Some(record.activity_category.clone()),
            remark: Some(record.remark.clone()),
            emotion: Some(record.emotion.clone()),
            pause_count: Some(record.pause_count),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn patch_time<S>(value: &Option<Option<DateTime<Utc>>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    lenient_time::serialize(&value.flatten(), serializer)
}

/// Durations travel as integer milliseconds.
mod millis {
    use chrono::Duration;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<f64>::deserialize(deserializer)?.unwrap_or_default();
        Ok(if ms.is_finite() {
            Duration::milliseconds(ms.round() as i64)
        } else {
            Duration::zero()
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn seg(start: i64, end: i64) -> Segment {
        Segment::new(at(start), at(end)).unwrap()
    }

    fn record_with(segments: Vec<Segment>) -> Record {
        Record::from_draft("r1".into(), RecordDraft::new("Reading", "Recharge", segments))
    }

    #[test]
    fn duration_sums_valid_segments_only() {
        assert_eq!(compute_duration(&[]), Duration::zero());

        let segments = [
            seg(0, 1_000),
            Segment {
                start: Some(at(5_000)),
                end: None,
            },
            Segment {
                start: Some(at(9_000)),
                end: Some(at(8_000)),
            },
            seg(10_000, 12_500),
        ];
        assert_eq!(compute_duration(&segments), Duration::milliseconds(3_500));
    }

    #[test]
    fn time_span_runs_from_first_start_to_last_end() {
        assert_eq!(compute_time_span(&[]), Duration::zero());
        let segments = [seg(1_000, 2_000), seg(5_000, 9_000)];
        assert_eq!(compute_time_span(&segments), Duration::milliseconds(8_000));

        let record = record_with(vec![seg(5_000, 9_000), seg(1_000, 2_000)]);
        assert_eq!(
            record.time_span(),
            record.end_time().unwrap() - record.start_time().unwrap()
        );
        assert_eq!(record.start_time(), Some(at(1_000)));
        assert_eq!(record.end_time(), Some(at(9_000)));
    }

    #[test]
    fn appending_out_of_order_resorts() {
        let mut record = record_with(vec![seg(10, 20)]);
        record.append_segment(at(0), at(5)).unwrap();

        assert_eq!(record.segments(), &[seg(0, 5), seg(10, 20)]);
        assert_eq!(record.start_time(), Some(at(0)));
        assert_eq!(record.end_time(), Some(at(20)));
        assert_eq!(record.duration(), Duration::milliseconds(15));
        assert_eq!(record.time_span(), Duration::milliseconds(20));
        assert_eq!(record.pause_count(), 2);
    }

    #[test]
    fn appending_inverted_segment_is_rejected() {
        let mut record = record_with(vec![seg(10, 20)]);
        let before = record.clone();
        assert!(record.append_segment(at(30), at(25)).is_err());
        assert_eq!(record, before);
    }

    #[test]
    fn removing_out_of_range_changes_nothing() {
        let mut record = record_with(vec![seg(0, 10), seg(20, 30)]);
        let before = record.clone();
        assert_eq!(record.remove_segment(2), None);
        assert_eq!(record, before);

        assert_eq!(record.remove_segment(0), Some(seg(0, 10)));
        assert_eq!(record.segments(), &[seg(20, 30)]);
        assert_eq!(record.start_time(), Some(at(20)));
        assert_eq!(record.duration(), Duration::milliseconds(10));
        assert_eq!(record.pause_count(), 1);
    }

    #[test]
    fn removing_last_segment_falls_back_to_empty() {
        let mut record = record_with(vec![seg(0, 10)]);
        record.remove_segment(0);
        assert_eq!(record.start_time(), None);
        assert_eq!(record.end_time(), None);
        assert_eq!(record.duration(), Duration::zero());
        assert_eq!(record.time_span(), Duration::zero());
        assert_eq!(record.pause_count(), 0);
    }

    #[test]
    fn editing_segment_resorts() {
        let mut record = record_with(vec![seg(0, 10), seg(20, 30)]);
        assert!(record.edit_segment(0, at(40), at(50)).unwrap());
        assert_eq!(record.segments(), &[seg(20, 30), seg(40, 50)]);
        assert!(!record.edit_segment(7, at(0), at(1)).unwrap());
    }

    #[test]
    fn finishing_closes_open_segment_in_place() {
        let mut record = record_with(vec![seg(0, 10), Segment::open(at(100))]);
        record.finish_segment(at(100), at(160)).unwrap();
        assert_eq!(record.segments(), &[seg(0, 10), seg(100, 160)]);
        assert_eq!(record.pause_count(), 2);

        // Start stored with less precision than the session kept.
        let mut record = record_with(vec![Segment::open(at(100))]);
        record
            .finish_segment(at(100) + Duration::microseconds(250), at(160))
            .unwrap();
        assert_eq!(record.segments().len(), 1);
        assert_eq!(record.pause_count(), 1);

        let mut record = record_with(vec![seg(0, 10)]);
        record.finish_segment(at(20), at(30)).unwrap();
        assert_eq!(record.segments(), &[seg(0, 10), seg(20, 30)]);
    }

    #[test]
    fn overlapping_segments_are_accepted() {
        let record = record_with(vec![seg(0, 100), seg(50, 80)]);
        assert_eq!(record.duration(), Duration::milliseconds(130));
        assert_eq!(record.time_span(), Duration::milliseconds(80));
    }

    #[test]
    fn metadata_requires_category() {
        let mut record = record_with(vec![seg(0, 10)]);
        let before = record.clone();
        let result = record.set_metadata(RecordMetadata {
            activity: "Reading".into(),
            activity_category: " ".into(),
            ..RecordMetadata::default()
        });
        assert!(result.unwrap_err().is_validation());
        assert_eq!(record, before);

        record
            .set_metadata(RecordMetadata {
                activity: "Writing".into(),
                activity_category: "Create".into(),
                remark: "draft 2".into(),
                emotion: "focused, calm".into(),
                pause_count: 4,
            })
            .unwrap();
        assert_eq!(record.activity, "Writing");
        assert_eq!(record.pause_count(), 4);
        assert_eq!(record.emotion_tags(), vec!["focused", "calm"]);
        assert_eq!(record.segments(), before.segments());
    }

    #[test]
    fn reads_store_records() {
        let record: Record = serde_json::from_str(
            r#"{
                "id": "7d1f",
                "activity": "Meetings",
                "activityCategory": "Work",
                "startTime": "2024-03-01T09:00:00.000Z",
                "endTime": "2024-03-01T09:30:00.000Z",
                "duration": 1800000,
                "timeSpan": 1800000.0,
                "remark": "",
                "emotion": "",
                "pauseCount": 1,
                "segments": [{"start": "2024-03-01T09:00:00.000Z", "end": "2024-03-01T09:30:00.000Z"}],
                "date": "2024-03-01"
            }"#,
        )
        .unwrap();
        assert_eq!(record.id.as_str(), "7d1f");
        assert_eq!(record.duration(), Duration::minutes(30));
        assert_eq!(record.time_span(), Duration::minutes(30));
        assert_eq!(record.day(), chrono::NaiveDate::from_ymd_opt(2024, 3, 1));
    }

    #[test]
    fn patch_only_sends_present_fields() {
        let record = record_with(vec![seg(0, 1_000)]);
        let value = serde_json::to_value(RecordPatch::timing_of(&record)).unwrap();
        assert_eq!(value["duration"], 1_000);
        assert_eq!(value["timeSpan"], 1_000);
        assert_eq!(value["pauseCount"], 1);
        assert_eq!(value["segments"].as_array().unwrap().len(), 1);
        assert_eq!(value["startTime"], "1970-01-01T00:00:00.000Z");
        assert!(value.get("activity").is_none());
        assert!(RecordPatch::default().is_empty());

        let emptied = serde_json::to_value(RecordPatch::timing_of(&record_with(vec![]))).unwrap();
        assert!(emptied["startTime"].is_null());
        assert!(emptied.get("startTime").is_some());
    }

    #[test]
    fn emotions_round_trip_through_tags() {
        assert_eq!(split_emotions(" happy ,, tired"), vec!["happy", "tired"]);
        assert_eq!(join_emotions(["happy", " ", "tired"]), "happy, tired");
    }
}
