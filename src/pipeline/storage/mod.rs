// Merge store: persisted keyed accumulation of records

pub mod merge;
pub mod merge_store;

pub use merge_store::{MergeStore, UpsertOutcome};
