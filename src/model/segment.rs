use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

/// One contiguous interval during which the timer was running.
///
/// Segments built locally always have both bounds and `end >= start`. Segments read from the
/// store may be incomplete or carry timestamps that don't parse; those are kept so the list can be
/// written back unchanged, but they never count towards any aggregate.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct Segment {
    #[serde(default, with = "lenient_time")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, with = "lenient_time")]
    pub end: Option<DateTime<Utc>>,
}

impl Segment {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> TrackerResult<Self> {
        if end < start {
            return Err(TrackerError::validation(format!(
                "segment end {end} is before its start {start}"
            )));
        }
        Ok(Self {
            start: Some(start),
            end: Some(end),
        })
    }

    /// A zero-length segment, the shape a segment has while the timer is still running.
    pub fn open(at: DateTime<Utc>) -> Self {
        Self {
            start: Some(at),
            end: Some(at),
        }
    }

    /// Zero-length or missing an end.
    pub fn is_open(&self) -> bool {
        self.end.is_none() || self.start == self.end
    }

    pub fn bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.start.zip(self.end)
    }

    /// Active time of the segment. Incomplete or inverted segments count as zero.
    pub fn length(&self) -> Duration {
        match self.bounds() {
            Some((start, end)) if end >= start => end - start,
            _ => Duration::zero(),
        }
    }

    pub fn overlaps(&self, other: &Segment) -> bool {
        match (self.bounds(), other.bounds()) {
            (Some((a_start, a_end)), Some((b_start, b_end))) => a_start < b_end && b_start < a_end,
            _ => false,
        }
    }
}

/// Timestamps are exchanged as RFC 3339 strings with millisecond precision. Reading is lenient:
/// epoch milliseconds are accepted and anything else becomes `None` instead of failing the whole
/// record.
pub(crate) mod lenient_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de::IgnoredAny, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTime {
        Text(String),
        Millis(i64),
        #[allow(dead_code)]
        Other(IgnoredAny),
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_str(&v.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<RawTime>::deserialize(deserializer)?;
        Ok(match raw {
            Some(RawTime::Text(text)) => DateTime::parse_from_rfc3339(&text)
                .map(|v| v.with_timezone(&Utc))
                .ok(),
            Some(RawTime::Millis(ms)) => DateTime::from_timestamp_millis(ms),
            Some(RawTime::Other(_)) | None => None,
        })
    }
}
