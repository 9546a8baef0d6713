//! Persistent record store
//!
//! Keeps the metadata of finished recordings in one JSON document and their
//! audio in one file per record.

mod record;
mod store;

pub use record::{format_clock, StoredRecord};
pub use store::RecordStore;
