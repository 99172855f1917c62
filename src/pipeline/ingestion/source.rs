use crate::error::{PipelineError, Result};
use crate::types::{Record, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

/// Lazy, read-once sequence of raw records.
pub type RecordStream = Box<dyn Iterator<Item = Result<Record>> + Send>;

/// Anything that can hand the pipeline a stream of raw records. Raw values
/// are text or null; nothing about their well-formedness is promised.
pub trait RecordSource {
    fn describe(&self) -> String;

    fn produce(self) -> Result<RecordStream>;
}

/// One JSON object per line, each field a string or null.
///
/// Numbers and booleans are kept as their text form so every field starts
/// out raw. A line that is not valid UTF-8 or not an object yields a
/// malformed-field error for that line only; the stream carries on. Read
/// failures of the file itself stay fatal.
pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

pub fn parse_json_line(line: &str) -> Result<Record> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let object = value
        .as_object()
        .ok_or_else(|| PipelineError::malformed("<line>", line, "expected a JSON object"))?;
    Ok(object
        .iter()
        .map(|(k, v)| {
            let raw = match v {
                serde_json::Value::Null => Value::Null,
                serde_json::Value::String(s) => Value::Text(s.clone()),
                other => Value::Text(other.to_string()),
            };
            (k.clone(), raw)
        })
        .collect())
}

impl RecordSource for JsonLinesSource {
    fn describe(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }

    fn produce(self) -> Result<RecordStream> {
        info!("Reading records from {}", self.path.display());
        let reader = BufReader::new(File::open(&self.path)?);
        let stream = reader
            .split(b'\n')
            .enumerate()
            .filter(|(_, bytes)| bytes.as_ref().map(|b| !b.iter().all(u8::is_ascii_whitespace)).unwrap_or(true))
            .map(|(idx, bytes)| {
                let field = format!("<line {}>", idx + 1);
                let bytes = bytes?;
                let line = match String::from_utf8(bytes) {
                    Ok(line) => line,
                    Err(e) => {
                        let raw = String::from_utf8_lossy(e.as_bytes()).into_owned();
                        return Err(PipelineError::malformed(&field, raw, e.utf8_error().to_string()));
                    }
                };
                let line = line.trim_end_matches('\r');
                parse_json_line(line).map_err(|e| match e {
                    PipelineError::Json(err) => PipelineError::malformed(&field, line, err.to_string()),
                    PipelineError::MalformedField { value, reason, .. } => PipelineError::MalformedField {
                        field,
                        value,
                        reason,
                    },
                    other => other,
                })
            });
        Ok(Box::new(stream))
    }
}

/// In-memory source, mostly for tests and preloaded data.
pub struct MemorySource {
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }
}

impl RecordSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory:{} records", self.records.len())
    }

    fn produce(self) -> Result<RecordStream> {
        Ok(Box::new(self.records.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_json_line_keeps_raw_text() {
        let r = parse_json_line(r#"{"inn": "7701", "date_end": null, "num": 12}"#).unwrap();
        assert_eq!(r.get("inn"), Some(&Value::text("7701")));
        assert_eq!(r.get("date_end"), Some(&Value::Null));
        assert_eq!(r.get("num"), Some(&Value::text("12")));
    }

    #[test]
    fn test_jsonl_source_tolerates_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "A"}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "[1, 2]").unwrap();
        writeln!(file, r#"{{"id": "B"}}"#).unwrap();
        let results: Vec<Result<Record>> = JsonLinesSource::new(file.path()).produce().unwrap().collect();
        assert_eq!(results.len(), 4);
        assert!(results[0].is_ok());
        assert!(results[1].as_ref().unwrap_err().is_recoverable());
        assert!(results[2].as_ref().unwrap_err().is_recoverable());
        assert_eq!(
            results[3].as_ref().unwrap().get("id"),
            Some(&Value::text("B"))
        );
    }

    #[test]
    fn test_jsonl_source_skips_lines_that_are_not_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"inn\": \"1\"}\n").unwrap();
        file.write_all(b"{\"inn\": \"\xff\xfe\"}\r\n").unwrap();
        file.write_all(b"{\"inn\": \"2\"}\r\n").unwrap();
        let results: Vec<Result<Record>> = JsonLinesSource::new(file.path()).produce().unwrap().collect();
        assert_eq!(results.len(), 3);
        match &results[1] {
            Err(PipelineError::MalformedField { field, .. }) => assert_eq!(field, "<line 2>"),
            other => panic!("expected a malformed line, got {:?}", other),
        }
        assert_eq!(
            results[2].as_ref().unwrap().get("inn"),
            Some(&Value::text("2"))
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(JsonLinesSource::new("/nonexistent/records.jsonl").produce().is_err());
    }
}
