//! Job store.
//!
//! Keeps every job in memory behind one lock and mirrors the whole table to
//! a JSON snapshot on disk. Snapshots are written to a temporary file and
//! renamed over the previous one, so a crash mid-write never corrupts it.

pub mod error;
pub mod snapshot;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::JobStore;
