//! In-memory resolvers loaded once at startup.
//!
//! Both trade an upfront load for zero external calls per record.

use crate::error::Result;
use crate::pipeline::ingestion::RecordSource;
use crate::pipeline::processing::Resolver;
use crate::types::Value;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9]").expect("static regex"));

/// Set of known tax ids read from the CRM's bulk client export.
///
/// The export is `;`-separated with every cell wrapped in double quotes
/// and a header row. The export is cp1251; only digits are kept from the
/// key column, so it is decoded lossily.
pub struct SnapshotExistence {
    keys: HashSet<String>,
}

impl SnapshotExistence {
    pub fn load<P: AsRef<Path>>(path: P, key_column: usize) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading client snapshot from {}", path.display());
        let bytes = std::fs::read(path)?;
        let snapshot = Self::parse(&String::from_utf8_lossy(&bytes), key_column);
        info!("Snapshot holds {} unique organisations", snapshot.len());
        Ok(snapshot)
    }

    pub fn parse(content: &str, key_column: usize) -> Self {
        let mut keys = HashSet::new();
        let mut rows = 0usize;
        for line in content.lines().skip(1) {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            rows += 1;
            let inner = line.strip_prefix('"').unwrap_or(line);
            let inner = inner.strip_suffix('"').unwrap_or(inner);
            match inner.split("\";\"").nth(key_column) {
                Some(cell) => {
                    let digits = NON_DIGITS.replace_all(cell, "");
                    if !digits.is_empty() {
                        keys.insert(digits.into_owned());
                    }
                }
                None => warn!(row = rows, "snapshot row has no column {}", key_column),
            }
        }
        info!("Snapshot rows: {}", rows);
        Self { keys }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl Resolver for SnapshotExistence {
    fn name(&self) -> String {
        "snapshot_existence".into()
    }

    async fn resolve(&self, key: &str) -> Result<Option<Value>> {
        Ok(Some(Value::Bool(self.contains(key))))
    }
}

/// Maps one record field to another across a whole source, e.g. licensee
/// name to tax id, so records lacking the key can borrow it by name.
pub struct KeyDictionary {
    entries: HashMap<String, String>,
}

impl KeyDictionary {
    /// Later records win on duplicate names. Entries whose key is not all
    /// digits are skipped; so are unreadable source lines.
    pub fn from_source<S: RecordSource>(source: S, name_field: &str, key_field: &str) -> Result<Self> {
        info!("Building {} -> {} dictionary from {}", name_field, key_field, source.describe());
        let mut entries = HashMap::new();
        for item in source.produce()? {
            let record = match item {
                Ok(r) => r,
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "skipping dictionary source record");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let name = record.get(name_field).and_then(Value::as_text);
            let key = record.get(key_field).and_then(Value::as_text);
            if let (Some(name), Some(key)) = (name, key) {
                if !key.is_empty() && key.chars().all(|c| c.is_ascii_digit()) {
                    entries.insert(name.to_string(), key.to_string());
                }
            }
        }
        info!("Prepared dictionary with {} entries", entries.len());
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Resolver for KeyDictionary {
    fn name(&self) -> String {
        "key_dictionary".into()
    }

    async fn resolve(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(key).map(Value::text))
    }
}
