use crate::constants::DATE_FORMAT;
use crate::error::{PipelineError, Result};
use crate::pipeline::chain::{Outcome, Stage};
use crate::types::{Record, Value};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Replaces a raw `YYYY-MM-DD` text field with a parsed date.
///
/// Anything else fails the record's traversal with a malformed-field
/// error; put a [`PrefixFilter`](super::filters::PrefixFilter) in front to
/// keep those rare. A field that already holds a date is left alone.
pub struct DateParser {
    field: String,
}

impl DateParser {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

/// Parses the registry's fixed-width date form. `2021-5-1` is rejected even
/// though chrono would accept it.
pub fn parse_registry_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    let raw = raw.trim();
    if raw.len() != 10 {
        return Err(format!("expected {} ({} chars), got {} chars", DATE_FORMAT, 10, raw.len()));
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| e.to_string())
}

#[async_trait]
impl Stage for DateParser {
    fn name(&self) -> String {
        format!("parse_date({})", self.field)
    }

    async fn handle(&mut self, mut record: Record) -> Result<Outcome> {
        let parsed = match record.get(&self.field) {
            Some(Value::Date(_)) => return Ok(Outcome::Pass(record)),
            Some(Value::Text(raw)) => {
                parse_registry_date(raw).map_err(|reason| PipelineError::malformed(&self.field, raw.clone(), reason))?
            }
            Some(other) => {
                return Err(PipelineError::malformed(&self.field, other.to_string(), "not a text value"))
            }
            None => return Err(PipelineError::malformed(&self.field, "", "field is missing")),
        };
        record.set(self.field.clone(), parsed);
        Ok(Outcome::Pass(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parses_in_place() {
        let mut p = DateParser::new("date_end");
        let out = p
            .handle(Record::new().with("date_end", "2021-05-01"))
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(
            out.get("date_end"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2021, 5, 1).unwrap()))
        );
    }

    #[tokio::test]
    async fn test_malformed_text_is_a_recoverable_error() {
        let mut p = DateParser::new("date_end");
        for raw in ["2021-13-01", "2021-5-1", "3018-03-3", "not a date", ""] {
            let err = p.handle(Record::new().with("date_end", raw)).await.unwrap_err();
            assert!(err.is_recoverable(), "{}", raw);
        }
        let err = p.handle(Record::new().with("date_end", Value::Null)).await.unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_already_parsed_passes_through() {
        let mut p = DateParser::new("d");
        let d = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let rec = Record::new().with("d", d);
        assert_eq!(p.handle(rec.clone()).await.unwrap(), Outcome::Pass(rec));
    }

    #[test]
    fn test_far_future_years_still_parse() {
        // Prefix filters are what cut these.
        assert!(parse_registry_date("3018-03-03").is_ok());
    }
}
