use crate::error::{PipelineError, Result};
use crate::pipeline::processing::Resolver;
use crate::types::Value;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

static SQL_IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// Read-only handle on the CRM organisation table.
pub struct CrmDatabase {
    conn: Mutex<Connection>,
}

impl CrmDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PipelineError::Configuration(format!(
                "CRM database not found at {}",
                path.display()
            )));
        }
        info!("Opening CRM database at {}", path.display());
        let conn = Connection::open(path)?;
        Ok(Arc::new(Self::from_connection(conn)))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn query(&self, resolver: &str, key: &str, sql: &str) -> Result<Option<Value>> {
        let lookup_err = |message: String| PipelineError::Lookup {
            resolver: resolver.to_string(),
            key: key.to_string(),
            message,
        };
        let conn = self.conn.lock().map_err(|_| lookup_err("connection lock poisoned".into()))?;
        conn.query_row(sql, params![key], |row| Ok(sql_value(row.get_ref(0)?)))
            .optional()
            .map_err(|e| lookup_err(e.to_string()))
    }
}

fn sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Text(i.to_string()),
        ValueRef::Real(f) => Value::Text(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Whether an organisation with the given tax id is a CRM client.
pub struct CrmExistence {
    db: Arc<CrmDatabase>,
}

impl CrmExistence {
    pub fn new(db: Arc<CrmDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Resolver for CrmExistence {
    fn name(&self) -> String {
        "crm_existence".into()
    }

    async fn resolve(&self, key: &str) -> Result<Option<Value>> {
        let row = self
            .db
            .query(&self.name(), key, "SELECT id FROM Organisation WHERE inn = ?1 LIMIT 1")?;
        Ok(Some(Value::Bool(row.is_some())))
    }
}

/// One column of the CRM organisation row for a tax id.
pub struct CrmAttribute {
    db: Arc<CrmDatabase>,
    column: String,
    sql: String,
}

impl CrmAttribute {
    pub fn new(db: Arc<CrmDatabase>, column: &str) -> Result<Self> {
        if !SQL_IDENTIFIER.is_match(column) {
            return Err(PipelineError::Configuration(format!(
                "'{}' is not a valid CRM column name",
                column
            )));
        }
        Ok(Self {
            db,
            column: column.to_string(),
            sql: format!("SELECT {} FROM Organisation WHERE inn = ?1 LIMIT 1", column),
        })
    }
}

#[async_trait]
impl Resolver for CrmAttribute {
    fn name(&self) -> String {
        format!("crm_attribute({})", self.column)
    }

    async fn resolve(&self, key: &str) -> Result<Option<Value>> {
        self.db.query(&self.name(), key, &self.sql)
    }
}
