use super::merge::merge_records;
use crate::error::{PipelineError, Result};
use crate::types::{Record, Value};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// What an upsert did to the stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged,
    Unchanged,
}

/// SQLite-backed map from business key to merged entity, one file per
/// namespace.
///
/// Each upsert runs in its own transaction, so a run stopped between records
/// leaves only fully applied merges behind. Writes go through a mutex; the
/// store can be shared across tasks behind an `Arc`.
pub struct MergeStore {
    conn: Mutex<Connection>,
    namespace: String,
    key_field: String,
    path: PathBuf,
}

impl MergeStore {
    /// Opens or creates the store for `namespace` under `dir`.
    ///
    /// Reopening a namespace with a different key field is refused, as is a
    /// file that was created for another namespace.
    pub fn open<P: AsRef<Path>>(dir: P, namespace: &str, key_field: &str) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = Self::path_for(dir, namespace);
        info!("Opening merge store at {}", path.display());
        let conn = Connection::open(&path)?;
        Self::init_schema(&conn)?;

        Self::claim_meta(&conn, "namespace", namespace, namespace)?;
        Self::claim_meta(&conn, "key_field", key_field, namespace)?;

        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
            key_field: key_field.to_string(),
            path,
        })
    }

    /// Reopens a namespace written by an earlier run, for reporting.
    pub fn open_existing<P: AsRef<Path>>(dir: P, namespace: &str) -> Result<Self> {
        let path = Self::path_for(dir.as_ref(), namespace);
        if !path.exists() {
            return Err(PipelineError::Configuration(format!(
                "no merge store for namespace '{}' at {}",
                namespace,
                path.display()
            )));
        }
        let key_field: String = {
            let conn = Connection::open(&path)?;
            Self::init_schema(&conn)?;
            conn.query_row("SELECT value FROM store_meta WHERE key = 'key_field'", [], |row| row.get(0))
                .optional()?
                .ok_or_else(|| {
                    PipelineError::Configuration(format!("merge store '{}' has no key field recorded", namespace))
                })?
        };
        Self::open(dir, namespace, &key_field)
    }

    /// Records `value` under `key` in a fresh store, or checks it against
    /// what an earlier run recorded.
    fn claim_meta(conn: &Connection, key: &str, value: &str, namespace: &str) -> Result<()> {
        let stored: Option<String> = conn
            .query_row("SELECT value FROM store_meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        match stored {
            Some(existing) if existing != value => Err(PipelineError::Configuration(format!(
                "merge store '{}' has {} '{}', not '{}'",
                namespace, key, existing, value
            ))),
            Some(_) => Ok(()),
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
                Ok(())
            }
        }
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS store_meta (
                key    TEXT PRIMARY KEY,
                value  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS merged_entities (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                business_key  TEXT NOT NULL UNIQUE,
                entity        TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// File path for a namespace. Bytes outside `[A-Za-z0-9._-]` are
    /// percent-encoded, so distinct namespaces never share a file.
    pub fn path_for<P: AsRef<Path>>(dir: P, namespace: &str) -> PathBuf {
        let mut safe = String::with_capacity(namespace.len());
        for b in namespace.bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
                safe.push(b as char);
            } else {
                safe.push_str(&format!("%{:02X}", b));
            }
        }
        dir.as_ref().join(format!("{}.sqlite3", safe))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Configuration("merge store lock poisoned".into()))
    }

    /// The business key of `record`: the key field's text, when non-empty.
    /// Other value kinds are not keys, so `Text("42")` and `ExternalId(42)`
    /// never address the same entity.
    pub fn key_of(&self, record: &Record) -> Option<String> {
        record
            .get(&self.key_field)
            .and_then(Value::as_text)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }

    /// Inserts the record as a new entity or merges it into the existing one.
    /// Returns `None` when the record has no business key.
    pub fn upsert(&self, record: &Record) -> Result<Option<UpsertOutcome>> {
        let key = match self.key_of(record) {
            Some(k) => k,
            None => return Ok(None),
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT entity FROM merged_entities WHERE business_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO merged_entities (business_key, entity) VALUES (?1, ?2)",
                    params![key, serde_json::to_string(record)?],
                )?;
                UpsertOutcome::Inserted
            }
            Some(json) => {
                let mut entity: Record = serde_json::from_str(&json)?;
                if merge_records(&mut entity, record) {
                    tx.execute(
                        "UPDATE merged_entities SET entity = ?2 WHERE business_key = ?1",
                        params![key, serde_json::to_string(&entity)?],
                    )?;
                    UpsertOutcome::Merged
                } else {
                    UpsertOutcome::Unchanged
                }
            }
        };
        tx.commit()?;
        debug!(key = %key, outcome = ?outcome, "upsert");
        Ok(Some(outcome))
    }

    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT entity FROM merged_entities WHERE business_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    /// All entities in first-sighting order.
    pub fn values(&self) -> Result<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT entity FROM merged_entities ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            out.push(serde_json::from_str(&json?)?);
        }
        Ok(out)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT business_key FROM merged_entities ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for key in rows {
            out.push(key?);
        }
        Ok(out)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM merged_entities", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
