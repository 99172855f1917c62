// Record pipeline: ingestion, processing stages, and the merge store

pub mod chain;
pub mod counters;
pub mod ingestion;
pub mod processing;
pub mod runner;
pub mod storage;

pub use chain::{Chain, Outcome, Probe, Stage};
pub use runner::{Progress, RunSummary, Runner};
