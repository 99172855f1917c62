use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A field did not hold what a stage required. Only this record is lost.
    #[error("Malformed field '{field}' (value {value:?}): {reason}")]
    MalformedField {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Lookup via {resolver} failed for key '{key}': {message}")]
    Lookup {
        resolver: String,
        key: String,
        message: String,
    },

    #[error("Merge store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

impl PipelineError {
    pub fn malformed(field: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedField {
            field: field.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Whether the run may continue with the next record after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedField { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_malformed_fields_are_recoverable() {
        assert!(PipelineError::malformed("date_end", "3018-13-01", "bad month").is_recoverable());
        assert!(!PipelineError::Configuration("x".into()).is_recoverable());
        assert!(!PipelineError::Lookup {
            resolver: "crm".into(),
            key: "7701".into(),
            message: "timeout".into()
        }
        .is_recoverable());
    }
}
