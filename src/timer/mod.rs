//! Timing of activity sessions: the [TimerSession] state machine and the 1 s [Ticker] driving
//! its display.

pub mod session;
pub mod ticker;

pub use session::{
    StartPlan, StopPlan, TickOutcome, TimerSession, TimerState, ACTIVITY_PLACEHOLDER,
};
pub use ticker::{Tick, Ticker, TICK_FREQUENCY};
