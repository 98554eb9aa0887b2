use std::fmt::Display;

use chrono::{DateTime, Duration, SubsecRound, Utc};

use crate::{
    error::{TrackerError, TrackerResult},
    model::{Record, RecordDraft, RecordId, Segment},
};

/// Text shown before anything was picked. Never a valid activity.
pub const ACTIVITY_PLACEHOLDER: &str = "Select an activity";

/// A recovery snapshot is due every this many ticks.
pub const SNAPSHOT_EVERY_TICKS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerState {
    #[default]
    Idle,
    Selecting,
    Running,
    Stopped,
}

impl Display for TimerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerState::Idle => write!(f, "idle"),
            TimerState::Selecting => write!(f, "selecting"),
            TimerState::Running => write!(f, "running"),
            TimerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Store work a successful [TimerSession::start] asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum StartPlan {
    /// First segment of a new record.
    Create(RecordDraft),
    /// Another segment on the active record.
    Append { id: RecordId, at: DateTime<Utc> },
}

/// Store work a successful [TimerSession::stop] asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum StopPlan {
    Finish {
        id: RecordId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// The record was never created, so it is created now with the finished segment.
    Create(RecordDraft),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub elapsed: Duration,
    pub snapshot_due: bool,
}

/// The running timing state. Transitions are pure: they return what has to be sent to the store
/// and leave talking to it to the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimerSession {
    state: TimerState,
    activity: String,
    activity_category: String,
    active_record_id: Option<RecordId>,
    segment_start: Option<DateTime<Utc>>,
    elapsed: Duration,
    ticks: u32,
}

impl TimerSession {
    /// A session that is already running, as rebuilt from a recovery snapshot.
    pub fn resumed(
        activity: String,
        activity_category: String,
        active_record_id: Option<RecordId>,
        segment_start: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            state: TimerState::Running,
            activity,
            activity_category,
            active_record_id,
            segment_start: Some(segment_start),
            elapsed,
            ticks: 0,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn activity_category(&self) -> &str {
        &self.activity_category
    }

    pub fn active_record_id(&self) -> Option<&RecordId> {
        self.active_record_id.as_ref()
    }

    pub fn segment_start(&self) -> Option<DateTime<Utc>> {
        self.segment_start
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Picks what the next start records. Picking another activity than the current one forgets
    /// the record that would otherwise be continued.
    pub fn select_activity(&mut self, activity: &str, activity_category: &str) -> TrackerResult<()> {
        if self.is_running() {
            return Err(TrackerError::validation(
                "the activity can't be changed while the timer is running",
            ));
        }
        if self.activity != activity {
            self.active_record_id = None;
        }
        self.activity = activity.to_string();
        self.activity_category = activity_category.to_string();
        self.state = TimerState::Selecting;
        Ok(())
    }

    /// Makes `record` the one the next start appends to.
    pub fn continue_record(&mut self, record: &Record) -> TrackerResult<()> {
        if self.is_running() {
            return Err(TrackerError::validation(
                "stop the running timer before continuing another record",
            ));
        }
        self.activity = record.activity.clone();
        self.activity_category = record.activity_category.clone();
        self.active_record_id = Some(record.id.clone());
        self.state = TimerState::Selecting;
        Ok(())
    }

    /// Segment bounds are kept at the millisecond precision the store writes them with.
    pub fn start(&mut self, now: DateTime<Utc>) -> TrackerResult<StartPlan> {
        let now = now.trunc_subsecs(3);
        if self.is_running() {
            return Err(TrackerError::validation("the timer is already running"));
        }
        let activity = self.activity.trim();
        if activity.is_empty() || activity == ACTIVITY_PLACEHOLDER {
            return Err(TrackerError::validation(
                "select or enter an activity before starting the timer",
            ));
        }

        self.state = TimerState::Running;
        self.segment_start = Some(now);
        self.elapsed = Duration::zero();
        self.ticks = 0;

        Ok(match &self.active_record_id {
            Some(id) => StartPlan::Append {
                id: id.clone(),
                at: now,
            },
            None => StartPlan::Create(RecordDraft::new(
                self.activity.clone(),
                self.activity_category.clone(),
                vec![Segment::open(now)],
            )),
        })
    }

    /// Records the id the store assigned to the record this session created.
    pub fn attach_record(&mut self, id: RecordId) {
        self.active_record_id = Some(id);
    }

    /// Returns `None` unless running.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<TickOutcome> {
        if !self.is_running() {
            return None;
        }
        let start = self.segment_start?;
        self.elapsed = (now - start).max(Duration::zero());
        self.ticks = self.ticks.wrapping_add(1);
        Some(TickOutcome {
            elapsed: self.elapsed,
            snapshot_due: self.ticks % SNAPSHOT_EVERY_TICKS == 0,
        })
    }

    pub fn stop(&mut self, now: DateTime<Utc>) -> TrackerResult<StopPlan> {
        let (true, Some(start)) = (self.is_running(), self.segment_start) else {
            return Err(TrackerError::validation("the timer is not running"));
        };
        // The wall clock may have been moved back while running.
        let end = now.trunc_subsecs(3).max(start);

        self.state = TimerState::Stopped;
        self.segment_start = None;
        self.elapsed = Duration::zero();
        self.ticks = 0;

        Ok(match &self.active_record_id {
            Some(id) => StopPlan::Finish {
                id: id.clone(),
                start,
                end,
            },
            None => StopPlan::Create(RecordDraft::new(
                self.activity.clone(),
                self.activity_category.clone(),
                vec![Segment::new(start, end)?],
            )),
        })
    }

    /// Drops everything, including the record that would be continued.
    pub fn abandon(&mut self) {
        *self = Self::default();
    }

    /// Forgets `id` if this session points at it. Returns whether it did.
    pub fn forget_record(&mut self, id: &RecordId) -> bool {
        if self.active_record_id.as_ref() != Some(id) {
            return false;
        }
        self.abandon();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn selected(activity: &str) -> TimerSession {
        let mut session = TimerSession::default();
        session.select_activity(activity, "Work output").unwrap();
        session
    }

    #[test]
    fn rejects_missing_activity() {
        for activity in ["", "   ", ACTIVITY_PLACEHOLDER] {
            let mut session = selected(activity);
            assert!(session.start(at(0)).unwrap_err().is_validation());
            assert_eq!(session.state(), TimerState::Selecting);
        }
    }

    #[test]
    fn first_start_creates_open_segment() {
        let mut session = selected("Planning");
        let StartPlan::Create(draft) = session.start(at(1_000)).unwrap() else {
            panic!("expected a new record");
        };
        assert_eq!(draft.segments, vec![Segment::open(at(1_000))]);
        assert_eq!(draft.duration, Duration::zero());
        assert_eq!(draft.time_span, Duration::zero());
        assert_eq!(draft.pause_count, 1);
        assert!(session.is_running());
    }

    #[test]
    fn cannot_start_or_select_while_running() {
        let mut session = selected("Planning");
        session.start(at(0)).unwrap();
        assert!(session.start(at(5)).unwrap_err().is_validation());
        assert!(session
            .select_activity("Meetings", "Work output")
            .unwrap_err()
            .is_validation());
        assert_eq!(session.activity(), "Planning");
    }

    #[test]
    fn stop_then_start_continues_same_record() {
        let mut session = selected("Planning");
        session.start(at(0)).unwrap();
        session.attach_record("r1".into());

        let plan = session.stop(at(90_000)).unwrap();
        assert_eq!(
            plan,
            StopPlan::Finish {
                id: "r1".into(),
                start: at(0),
                end: at(90_000),
            }
        );
        assert_eq!(session.state(), TimerState::Stopped);
        assert_eq!(session.elapsed(), Duration::zero());

        assert_eq!(
            session.start(at(200_000)).unwrap(),
            StartPlan::Append {
                id: "r1".into(),
                at: at(200_000),
            }
        );
    }

    #[test]
    fn selecting_another_activity_forgets_record() {
        let mut session = selected("Planning");
        session.start(at(0)).unwrap();
        session.attach_record("r1".into());
        session.stop(at(10)).unwrap();

        session.select_activity("Planning", "Work output").unwrap();
        assert_eq!(session.active_record_id(), Some(&"r1".into()));

        session.select_activity("Research", "Recharge").unwrap();
        assert_eq!(session.active_record_id(), None);
    }

    #[test]
    fn stop_without_record_creates_finished_segment() {
        let mut session = selected("Planning");
        session.start(at(0)).unwrap();
        let StopPlan::Create(draft) = session.stop(at(90_000)).unwrap() else {
            panic!("expected a new record");
        };
        assert_eq!(draft.duration, Duration::seconds(90));
        assert_eq!(draft.time_span, Duration::seconds(90));
        assert_eq!(draft.pause_count, 1);
    }

    #[test]
    fn segment_bounds_drop_sub_millisecond_part() {
        let mut session = selected("Planning");
        let start = at(1_000) + Duration::microseconds(456);
        let StartPlan::Create(draft) = session.start(start).unwrap() else {
            panic!("expected a new record");
        };
        assert_eq!(draft.segments, vec![Segment::open(at(1_000))]);
        assert_eq!(session.segment_start(), Some(at(1_000)));

        session.attach_record("r1".into());
        let plan = session.stop(at(91_000) + Duration::microseconds(999)).unwrap();
        assert_eq!(
            plan,
            StopPlan::Finish {
                id: "r1".into(),
                start: at(1_000),
                end: at(91_000),
            }
        );
    }

    #[test]
    fn stop_requires_running() {
        let mut session = selected("Planning");
        assert!(session.stop(at(0)).unwrap_err().is_validation());
    }

    #[test]
    fn every_tenth_tick_asks_for_snapshot() {
        let mut session = selected("Planning");
        assert_eq!(session.tick(at(0)), None);
        session.start(at(0)).unwrap();

        let due = (1..=20)
            .filter_map(|s| session.tick(at(s * 1_000)))
            .filter(|v| v.snapshot_due)
            .map(|v| v.elapsed.num_seconds())
            .collect::<Vec<_>>();
        assert_eq!(due, [10, 20]);
        assert_eq!(session.elapsed(), Duration::seconds(20));
    }

    #[test]
    fn abandon_resets_everything() {
        let mut session = selected("Planning");
        session.start(at(0)).unwrap();
        session.attach_record("r1".into());
        session.abandon();
        assert_eq!(session, TimerSession::default());
    }

    #[test]
    fn forgets_only_matching_record() {
        let mut session = selected("Planning");
        session.attach_record("r1".into());
        assert!(!session.forget_record(&"r2".into()));
        assert!(session.forget_record(&"r1".into()));
        assert_eq!(session.state(), TimerState::Idle);
    }
}
