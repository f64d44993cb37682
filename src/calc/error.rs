use serde_json::json;
use thiserror::Error;

/// Engine failures. Every variant maps to a stable wire code.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalcError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("{message}")]
    BadParams {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("database query failed: {0}")]
    Db(String),
}

impl CalcError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        CalcError::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        CalcError::BadParams {
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        CalcError::BadParams {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CalcError::NotFound { .. } => "not_found",
            CalcError::InvalidSettings(_) => "invalid_settings",
            CalcError::BadParams { .. } => "bad_params",
            CalcError::CorruptSnapshot(_) => "corrupt_snapshot",
            CalcError::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CalcError::NotFound { what, id } => Some(json!({ "kind": what, "id": id })),
            CalcError::BadParams { details, .. } => details.clone(),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for CalcError {
    fn from(e: rusqlite::Error) -> Self {
        CalcError::Db(e.to_string())
    }
}
