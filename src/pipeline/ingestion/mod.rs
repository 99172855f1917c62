// Record sources feeding the chain

pub mod source;

pub use source::{JsonLinesSource, MemorySource, RecordSource, RecordStream};
