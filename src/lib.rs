//! Personal time tracker. Runs a timer for a chosen activity, stores every run as a segment of a
//! record kept by a remote record store, and keeps several running instances in step through
//! small shared slots on disk.
//!

pub mod cli;
pub mod error;
pub mod model;
pub mod recovery;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod timer;
pub mod tracker;
pub mod utils;
