//! Filtering stages. A filter either passes the record through untouched or
//! drops it; only [`BoolEqualityFilter`] can fail a traversal, and only on a
//! misconfigured chain.

use crate::error::{PipelineError, Result};
use crate::pipeline::chain::{Outcome, Probe, Stage};
use crate::pipeline::counters::RatioStats;
use crate::types::{Record, Value};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Drops records whose field is absent, null or an empty string.
pub struct FieldPresenceFilter {
    field: String,
}

impl FieldPresenceFilter {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[async_trait]
impl Stage for FieldPresenceFilter {
    fn name(&self) -> String {
        format!("require({})", self.field)
    }

    async fn handle(&mut self, record: Record) -> Result<Outcome> {
        match record.get(&self.field) {
            Some(v) if !v.is_empty() => Ok(Outcome::Pass(record)),
            _ => Ok(Outcome::Dropped),
        }
    }
}

/// Cheap textual gate in front of date parsing: registry dumps carry years
/// like "3018", which are cut here before they reach the parser.
pub struct PrefixFilter {
    field: String,
    prefix: String,
}

impl PrefixFilter {
    pub fn new(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Stage for PrefixFilter {
    fn name(&self) -> String {
        format!("prefix({}, {:?})", self.field, self.prefix)
    }

    async fn handle(&mut self, record: Record) -> Result<Outcome> {
        let keep = record
            .get(&self.field)
            .and_then(Value::as_text)
            .is_some_and(|s| s.starts_with(&self.prefix));
        if keep {
            Ok(Outcome::Pass(record))
        } else {
            Ok(Outcome::Dropped)
        }
    }
}

/// Keeps records whose parsed date lies in `[start, end]`, both inclusive.
pub struct DateRangeFilter {
    field: String,
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRangeFilter {
    pub fn new(field: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            field: field.into(),
            start,
            end,
        }
    }
}

#[async_trait]
impl Stage for DateRangeFilter {
    fn name(&self) -> String {
        format!("date_range({}, {}..={})", self.field, self.start, self.end)
    }

    async fn handle(&mut self, record: Record) -> Result<Outcome> {
        let date = match record.get(&self.field).and_then(Value::as_date) {
            Some(d) => d,
            None => {
                // A date parser should run first; drop instead of failing.
                warn!(
                    field = %self.field,
                    value = ?record.get(&self.field),
                    "date range filter received a field that is not a parsed date"
                );
                return Ok(Outcome::Dropped);
            }
        };
        if self.start <= date && date <= self.end {
            Ok(Outcome::Pass(record))
        } else {
            Ok(Outcome::Dropped)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    Substring,
}

/// Drops records whose text field matches any excluded value.
///
/// Absent, null and non-text fields never match.
pub struct ValueExclusionFilter {
    field: String,
    excluded: Vec<String>,
    exact: HashSet<String>,
    mode: MatchMode,
}

impl ValueExclusionFilter {
    pub fn new<I, S>(field: impl Into<String>, excluded: I, mode: MatchMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let excluded: Vec<String> = excluded.into_iter().map(Into::into).collect();
        Self {
            field: field.into(),
            exact: excluded.iter().cloned().collect(),
            excluded,
            mode,
        }
    }

    pub fn exact<I, S>(field: impl Into<String>, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(field, excluded, MatchMode::Exact)
    }

    pub fn substring<I, S>(field: impl Into<String>, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(field, excluded, MatchMode::Substring)
    }

    fn matches(&self, text: &str) -> bool {
        match self.mode {
            MatchMode::Exact => self.exact.contains(text),
            MatchMode::Substring => self.excluded.iter().any(|e| text.contains(e.as_str())),
        }
    }
}

#[async_trait]
impl Stage for ValueExclusionFilter {
    fn name(&self) -> String {
        format!("exclude({}, {:?}, {} values)", self.field, self.mode, self.excluded.len())
    }

    async fn handle(&mut self, record: Record) -> Result<Outcome> {
        let excluded = record
            .get(&self.field)
            .and_then(Value::as_text)
            .is_some_and(|s| self.matches(s));
        if excluded {
            Ok(Outcome::Dropped)
        } else {
            Ok(Outcome::Pass(record))
        }
    }
}

/// Keeps records whose boolean field equals `expected`, tracking the share
/// that failed.
///
/// A field that is absent or not a boolean means the chain was wired
/// wrong (the enricher producing it did not run), so it is reported as a
/// configuration error instead of being guessed at.
pub struct BoolEqualityFilter {
    field: String,
    expected: bool,
    stats: Arc<RatioStats>,
}

impl BoolEqualityFilter {
    pub fn new(field: impl Into<String>, expected: bool) -> Self {
        Self {
            field: field.into(),
            expected,
            stats: RatioStats::new(),
        }
    }

    pub fn stats(&self) -> Arc<RatioStats> {
        self.stats.clone()
    }

    /// Percentage of records that did not match, 0.0 before any record.
    pub fn false_percent(&self) -> f64 {
        self.stats.percent()
    }
}

#[async_trait]
impl Stage for BoolEqualityFilter {
    fn name(&self) -> String {
        format!("bool({} == {})", self.field, self.expected)
    }

    async fn handle(&mut self, record: Record) -> Result<Outcome> {
        let actual = match record.get(&self.field) {
            Some(Value::Bool(b)) => *b,
            other => {
                return Err(PipelineError::Configuration(format!(
                    "boolean filter on '{}' expected a boolean, found {:?}",
                    self.field, other
                )))
            }
        };
        let matched = actual == self.expected;
        self.stats.observe(!matched);
        if matched {
            Ok(Outcome::Pass(record))
        } else {
            Ok(Outcome::Dropped)
        }
    }

    fn probes(&self) -> Vec<Probe> {
        vec![Probe::new(format!("{}!={}", self.field, self.expected), self.stats.clone())]
    }
}

/// Drops records where any two of the named fields hold the same value,
/// e.g. a service start date identical to the licence start date.
///
/// An absent field compares as null, so two absent fields count as equal.
pub struct FieldInequalityFilter {
    fields: Vec<String>,
}

impl FieldInequalityFilter {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Stage for FieldInequalityFilter {
    fn name(&self) -> String {
        format!("distinct({})", self.fields.join(", "))
    }

    async fn handle(&mut self, record: Record) -> Result<Outcome> {
        let null = Value::Null;
        let distinct: HashSet<&Value> = self
            .fields
            .iter()
            .map(|f| record.get(f).unwrap_or(&null))
            .collect();
        if distinct.len() < self.fields.len() {
            Ok(Outcome::Dropped)
        } else {
            Ok(Outcome::Pass(record))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_presence_filter() {
        let mut f = FieldPresenceFilter::new("inn");
        assert!(f.handle(Record::new()).await.unwrap().is_dropped());
        assert!(f.handle(Record::new().with("inn", "")).await.unwrap().is_dropped());
        assert!(f.handle(Record::new().with("inn", Value::Null)).await.unwrap().is_dropped());
        assert!(!f.handle(Record::new().with("inn", "7701")).await.unwrap().is_dropped());
    }

    #[tokio::test]
    async fn test_prefix_filter_passes_unchanged_or_drops() {
        let mut f = PrefixFilter::new("date_end", "202");
        let good = Record::new().with("date_end", "2021-03-03").with("x", "y");
        assert_eq!(f.handle(good.clone()).await.unwrap(), Outcome::Pass(good));
        assert!(f
            .handle(Record::new().with("date_end", "3018-03-03"))
            .await
            .unwrap()
            .is_dropped());
        assert!(f.handle(Record::new()).await.unwrap().is_dropped());
        assert!(f
            .handle(Record::new().with("date_end", Value::Null))
            .await
            .unwrap()
            .is_dropped());
    }

    #[tokio::test]
    async fn test_date_range_is_inclusive() {
        let mut f = DateRangeFilter::new("d", date(2021, 1, 1), date(2021, 12, 31));
        for (d, dropped) in [
            (date(2021, 1, 1), false),
            (date(2021, 12, 31), false),
            (date(2021, 6, 15), false),
            (date(2020, 12, 31), true),
            (date(2022, 1, 1), true),
        ] {
            let out = f.handle(Record::new().with("d", d)).await.unwrap();
            assert_eq!(out.is_dropped(), dropped, "{}", d);
        }
    }

    #[tokio::test]
    async fn test_date_range_drops_unparsed_text() {
        let mut f = DateRangeFilter::new("d", date(2021, 1, 1), date(2021, 12, 31));
        let out = f.handle(Record::new().with("d", "2021-05-01")).await.unwrap();
        assert!(out.is_dropped());
    }

    #[tokio::test]
    async fn test_exclusion_exact_and_substring() {
        let mut exact = ValueExclusionFilter::exact("status", ["недействующая"]);
        assert!(exact
            .handle(Record::new().with("status", "недействующая"))
            .await
            .unwrap()
            .is_dropped());
        assert!(!exact
            .handle(Record::new().with("status", "действующая"))
            .await
            .unwrap()
            .is_dropped());

        let mut sub = ValueExclusionFilter::substring("name", ["Индивидуальный предприниматель"]);
        assert!(sub
            .handle(Record::new().with("name", "Индивидуальный предприниматель Иванов"))
            .await
            .unwrap()
            .is_dropped());
        assert!(!sub.handle(Record::new()).await.unwrap().is_dropped());
    }

    #[tokio::test]
    async fn test_bool_filter_false_percent() {
        let mut f = BoolEqualityFilter::new("flag", true);
        let mut passed = 0;
        for i in 0..10 {
            let out = f.handle(Record::new().with("flag", i < 3)).await.unwrap();
            if !out.is_dropped() {
                passed += 1;
            }
        }
        assert_eq!(passed, 3);
        assert_eq!(format!("{:.2}", f.false_percent()), "70.00");
    }

    #[tokio::test]
    async fn test_bool_filter_rejects_non_boolean() {
        let mut f = BoolEqualityFilter::new("flag", true);
        let err = f.handle(Record::new().with("flag", "true")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(f.handle(Record::new()).await.is_err());
        assert_eq!(f.stats().total(), 0);
    }

    #[tokio::test]
    async fn test_field_inequality() {
        let mut f = FieldInequalityFilter::new(["date_service_start", "date_start"]);
        let same = Record::new()
            .with("date_service_start", date(2021, 1, 1))
            .with("date_start", date(2021, 1, 1));
        let differ = Record::new()
            .with("date_service_start", date(2021, 2, 1))
            .with("date_start", date(2021, 1, 1));
        assert!(f.handle(same).await.unwrap().is_dropped());
        assert!(!f.handle(differ).await.unwrap().is_dropped());
        assert!(f.handle(Record::new()).await.unwrap().is_dropped());
    }
}
