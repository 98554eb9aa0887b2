//! Shared key-value slots. Every running instance of the tracker opens the same application
//! directory, so a slot written by one instance is visible to all others. Two slots are used:
//!  - `refresh-signal`, the advisory "records changed" marker.
//!  - `timer-state`, the snapshot of a running timer used for recovery.
//!
//! Writes are last-write-wins. Files are locked while being read or written so a reader never
//! sees half of a write.

pub mod slot;

pub use slot::{FileSlots, SharedSlots};
