//! Everything that talks to the record store or to other instances.
//!
//! [RecordStore] is the remote, authoritative copy of every record and [HttpRecordStore] its only
//! production implementation. [PersistenceSync] keeps the local cache in line with the store and
//! announces every successful mutation over the [RefreshChannel]. Nothing is retried.

pub mod http;
pub mod persistence;
pub mod refresh;
pub mod store;

pub use http::HttpRecordStore;
pub use persistence::PersistenceSync;
pub use refresh::{RefreshChannel, RefreshMarker};
pub use store::{Pagination, RecordPage, RecordQuery, RecordStore};
