//! Records, their segments and the rules deriving aggregate fields from segments.
//!
//! A [Record] only changes its derived fields (`startTime`, `endTime`, `duration`, `timeSpan`,
//! `pauseCount`) together with its segment list, and always re-sorts segments by start first.

pub mod category;
pub mod record;
pub mod segment;
pub mod stats;

pub use category::{Category, CategoryRegistry, StyleToken};
pub use record::{
    compute_duration, compute_time_span, Aggregates, Record, RecordDraft, RecordId,
    RecordMetadata, RecordPatch,
};
pub use segment::Segment;
pub use stats::DailyStats;
