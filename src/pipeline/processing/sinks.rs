use crate::error::Result;
use crate::pipeline::chain::{Outcome, Stage};
use crate::pipeline::counters::RunCounters;
use crate::pipeline::storage::MergeStore;
use crate::types::{Record, Value};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Counts every record that reaches it and never drops.
///
/// With a flag field configured it also counts records whose flag is not
/// `true` (e.g. organisations that are not existing clients).
pub struct CountingSink {
    counters: Arc<RunCounters>,
    flag_field: Option<String>,
}

impl CountingSink {
    pub fn new() -> Self {
        Self {
            counters: RunCounters::new(),
            flag_field: None,
        }
    }

    pub fn with_flag(mut self, field: impl Into<String>) -> Self {
        self.flag_field = Some(field.into());
        self
    }

    pub fn counters(&self) -> Arc<RunCounters> {
        self.counters.clone()
    }
}

impl Default for CountingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for CountingSink {
    fn name(&self) -> String {
        "count".into()
    }

    async fn handle(&mut self, record: Record) -> Result<Outcome> {
        let flag_false = self
            .flag_field
            .as_deref()
            .is_some_and(|f| record.get(f).and_then(Value::as_bool) != Some(true));
        self.counters.record(flag_false);
        Ok(Outcome::Pass(record))
    }
}

/// Upserts every record into the merge store under its business key and
/// passes it on.
///
/// Records without a usable key are never written; a filter should have
/// dropped them earlier, so each one is logged and counted.
pub struct StoreSink {
    store: Arc<MergeStore>,
    skipped: Arc<AtomicU64>,
}

impl StoreSink {
    pub fn new(store: Arc<MergeStore>) -> Self {
        Self {
            store,
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn skipped_without_key(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Stage for StoreSink {
    fn name(&self) -> String {
        format!("store({})", self.store.namespace())
    }

    async fn handle(&mut self, record: Record) -> Result<Outcome> {
        if self.store.upsert(&record)?.is_none() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(
                key_field = %self.store.key_field(),
                "record reached the store without a business key; not stored"
            );
        }
        Ok(Outcome::Pass(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_counting_sink_counts_false_flags() {
        let mut sink = CountingSink::new().with_flag("our");
        for flag in [Value::Bool(true), Value::Bool(false), Value::Null] {
            let out = sink.handle(Record::new().with("our", flag)).await.unwrap();
            assert!(!out.is_dropped());
        }
        sink.handle(Record::new()).await.unwrap();
        let snap = sink.counters().snapshot();
        assert_eq!(snap.handled, 4);
        assert_eq!(snap.flag_false, 3);
    }

    #[tokio::test]
    async fn test_store_sink_skips_records_without_key() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MergeStore::open(dir.path(), "t", "inn").unwrap());
        let mut sink = StoreSink::new(store.clone());
        let out = sink.handle(Record::new().with("name", "x")).await.unwrap();
        assert!(!out.is_dropped());
        sink.handle(Record::new().with("inn", "7701")).await.unwrap();
        assert_eq!(sink.skipped_without_key(), 1);
        assert_eq!(store.len().unwrap(), 1);
    }
}
