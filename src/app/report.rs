use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::app::flows::{self, FlowKind, FlowParams};
use crate::config::Config;
use crate::constants::humanized_header;
use crate::pipeline::processing::parse_date::parse_registry_date;
use crate::pipeline::storage::MergeStore;
use crate::types::{Record, Value};

#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub path: PathBuf,
    pub rows: usize,
}

/// Earliest date held by `value`. Text is parsed as a registry date.
pub fn earliest_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Text(s) => parse_registry_date(s).ok(),
        Value::Set(members) => members.iter().filter_map(earliest_date).min(),
        _ => None,
    }
}

fn flatten(s: &str) -> String {
    s.replace(['\r', '\n', '\t'], " ")
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Text(s) => flatten(s),
        Value::Date(d) => d.to_string(),
        Value::Bool(true) => "да".to_string(),
        Value::Bool(false) => "нет".to_string(),
        Value::ExternalId(id) => id.to_string(),
        Value::Set(members) => {
            let mut rendered: Vec<String> = members.iter().map(render_value).collect();
            rendered.sort();
            let separator = if rendered.iter().any(|s| s.contains(',')) { "; " } else { ", " };
            rendered.join(separator)
        }
    }
}

/// Tab-separated table of `entities`, columns in the first entity's field
/// order, rows by earliest `date_field` (undated rows last).
pub fn render_table(entities: &[Record], date_field: &str) -> String {
    let Some(first) = entities.first() else {
        return String::new();
    };
    let columns: Vec<&str> = first.field_names().collect();
    let mut out = columns
        .iter()
        .map(|c| humanized_header(c))
        .collect::<Vec<_>>()
        .join("\t");
    out.push('\n');

    let mut rows: Vec<&Record> = entities.iter().collect();
    rows.sort_by_key(|r| {
        let date = r.get(date_field).and_then(earliest_date);
        (date.is_none(), date)
    });
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| row.get(c).map(render_value).unwrap_or_default())
            .collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

pub fn write_report(store: &MergeStore, date_field: &str, reports_dir: &Path) -> Result<ReportOutcome> {
    let entities = store.values()?;
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("creating reports directory {}", reports_dir.display()))?;
    let path = reports_dir.join(format!("{}.tsv", store.namespace()));
    fs::write(&path, render_table(&entities, date_field))
        .with_context(|| format!("writing report {}", path.display()))?;
    info!("Wrote {} rows to {}", entities.len(), path.display());
    Ok(ReportOutcome {
        path,
        rows: entities.len(),
    })
}

/// Reopens a flow's namespace and renders it.
pub struct ReportUseCase {
    config: Config,
}

impl ReportUseCase {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn execute(&self, kind: FlowKind, params: &FlowParams) -> Result<ReportOutcome> {
        let namespace = flows::namespace(kind, params);
        let store = MergeStore::open_existing(&self.config.storage.dir, &namespace)
            .with_context(|| format!("no stored data for {}; run with --process fetch first", namespace))?;
        write_report(&store, kind.date_field(), &self.config.reports.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_render_scalars() {
        assert_eq!(render_value(&Value::Null), "");
        assert_eq!(render_value(&Value::Bool(true)), "да");
        assert_eq!(render_value(&Value::Bool(false)), "нет");
        assert_eq!(render_value(&Value::ExternalId(42)), "42");
        assert_eq!(render_value(&Value::text("line one\nline two")), "line one line two");
        assert_eq!(render_value(&Value::Date(d("2021-05-01"))), "2021-05-01");
    }

    #[test]
    fn test_render_sets_pick_separator() {
        let plain = Value::set([Value::text("b"), Value::text("a")]);
        assert_eq!(render_value(&plain), "a, b");
        let commas = Value::set([Value::text("Moscow, Russia"), Value::text("Kazan")]);
        assert_eq!(render_value(&commas), "Kazan; Moscow, Russia");
    }

    #[test]
    fn test_earliest_date_of_set() {
        let v = Value::set([Value::Date(d("2021-06-01")), Value::Date(d("2021-05-02"))]);
        assert_eq!(earliest_date(&v), Some(d("2021-05-02")));
        assert_eq!(earliest_date(&Value::text("2021-03-04")), Some(d("2021-03-04")));
        assert_eq!(earliest_date(&Value::Null), None);
    }

    #[test]
    fn test_table_sorted_by_date_with_humanized_header() {
        let later = Record::new()
            .with("inn", "2")
            .with("date_end", Value::Date(d("2021-09-01")))
            .with("our", true);
        let earlier = Record::new()
            .with("inn", "1")
            .with("date_end", Value::set([Value::Date(d("2021-08-01")), Value::Date(d("2021-02-01"))]))
            .with("our", false);
        let table = render_table(&[later, earlier], "date_end");
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "ИНН лицензиата\tСрок действия, до\tНаши");
        assert_eq!(lines[1], "1\t2021-02-01, 2021-08-01\tнет");
        assert_eq!(lines[2], "2\t2021-09-01\tда");
    }

    #[test]
    fn test_empty_store_renders_nothing() {
        assert_eq!(render_table(&[], "date_end"), "");
    }
}
