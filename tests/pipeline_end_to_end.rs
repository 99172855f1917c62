use anyhow::Result;
use chrono::NaiveDate;
use registry_pipeline::pipeline::ingestion::{JsonLinesSource, MemorySource, RecordSource};
use registry_pipeline::pipeline::processing::{DateParser, DateRangeFilter, FieldPresenceFilter, StoreSink};
use registry_pipeline::pipeline::storage::MergeStore;
use registry_pipeline::pipeline::{Chain, Runner};
use registry_pipeline::types::{Record, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn date_chain(store: Arc<MergeStore>) -> Chain {
    Chain::new()
        .then(DateParser::new("date_end"))
        .then(DateRangeFilter::new("date_end", d("2021-01-01"), d("2021-12-31")))
        .then(StoreSink::new(store))
}

fn licence(inn: &str, date_end: &str) -> Record {
    Record::new().with("inn", inn).with("date_end", date_end)
}

async fn run_into<S: RecordSource>(dir: &Path, namespace: &str, source: S) -> Result<Arc<MergeStore>> {
    let store = Arc::new(MergeStore::open(dir, namespace, "inn")?);
    let mut runner = Runner::new("test", date_chain(store.clone()));
    runner.run(source.produce()?, |_| {}).await?;
    Ok(store)
}

#[tokio::test]
async fn test_repeated_keys_accumulate_dates() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("licences.jsonl");
    std::fs::write(
        &input,
        concat!(
            "{\"inn\": \"A\", \"date_end\": \"2021-05-01\"}\n",
            "{\"inn\": \"A\", \"date_end\": \"2021-05-02\"}\n",
            "\n",
            "{\"inn\": \"B\", \"date_end\": \"2021-06-01\"}\n",
            "{\"inn\": \"C\", \"date_end\": \"2020-06-01\"}\n",
        ),
    )?;

    let store = run_into(dir.path(), "dates", JsonLinesSource::new(&input)).await?;

    assert_eq!(store.len()?, 2);
    let a = store.get("A")?.expect("A stored");
    assert_eq!(
        a.get("date_end"),
        Some(&Value::set([Value::Date(d("2021-05-01")), Value::Date(d("2021-05-02"))]))
    );
    let b = store.get("B")?.expect("B stored");
    assert_eq!(b.get("date_end"), Some(&Value::Date(d("2021-06-01"))));
    assert!(store.get("C")?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_records_without_key_never_reach_the_store() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(MergeStore::open(dir.path(), "keys", "inn")?);
    let chain = Chain::new()
        .then(FieldPresenceFilter::new("inn"))
        .then(StoreSink::new(store.clone()));
    let mut runner = Runner::new("test", chain);
    let records = vec![
        Record::new().with("name", "no key"),
        Record::new().with("inn", "").with("name", "empty key"),
        Record::new().with("inn", "7701").with("name", "keyed"),
    ];
    let summary = runner.run(MemorySource::new(records).produce()?, |_| {}).await?;

    assert_eq!(summary.dropped, 2);
    assert_eq!(summary.passed, 1);
    assert_eq!(store.keys()?, vec!["7701".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_order_free() -> Result<()> {
    let dir = tempdir()?;
    let records = vec![
        licence("A", "2021-05-01"),
        licence("B", "2021-06-01"),
        licence("A", "2021-05-02"),
    ];
    let mut reversed = records.clone();
    reversed.reverse();

    let forward = run_into(dir.path(), "forward", MemorySource::new(records.clone())).await?;
    let first_pass = forward.values()?;
    drop(forward);

    let again = run_into(dir.path(), "forward", MemorySource::new(records)).await?;
    assert_eq!(again.values()?, first_pass);

    let backward = run_into(dir.path(), "backward", MemorySource::new(reversed)).await?;
    for key in ["A", "B"] {
        assert_eq!(backward.get(key)?, again.get(key)?);
    }
    Ok(())
}

#[tokio::test]
async fn test_malformed_dates_are_skipped_not_fatal() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(MergeStore::open(dir.path(), "malformed", "inn")?);
    let mut runner = Runner::new("test", date_chain(store.clone()));
    let records = vec![
        licence("A", "2021-02-30"),
        licence("B", "not a date"),
        licence("C", "2021-03-01"),
    ];
    let summary = runner.run(MemorySource::new(records).produce()?, |_| {}).await?;

    assert_eq!(summary.malformed, 2);
    assert_eq!(summary.passed, 1);
    assert_eq!(store.keys()?, vec!["C".to_string()]);
    Ok(())
}
