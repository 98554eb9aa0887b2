use chrono::{Duration, NaiveDate};

use super::record::Record;

/// Totals shown next to today's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyStats {
    pub total: Duration,
    pub activity_count: usize,
}

impl DailyStats {
    pub fn for_day<'a>(records: impl IntoIterator<Item = &'a Record>, day: NaiveDate) -> Self {
        records
            .into_iter()
            .filter(|v| v.day() == Some(day))
            .fold(
                Self {
                    total: Duration::zero(),
                    activity_count: 0,
                },
                |stats, record| Self {
                    total: stats.total + record.duration(),
                    activity_count: stats.activity_count + 1,
                },
            )
    }
}
