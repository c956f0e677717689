//! Closed error taxonomy for the rules engine core.
//!
//! One variant per error kind named in the specification. Comparator and
//! mapper failures that the spec requires to be swallowed (to `false`/`null`)
//! never surface as an `EngineError` — they are logged via `tracing` at the
//! call site instead.

use std::fmt;

use crate::field::FieldName;

/// The closed set of ways a rule execution can fail.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed rule, unknown operator, or an operator/type mismatch.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// No rule exists with the given id.
    #[error("rule not found: {0}")]
    RuleNotFound(String),

    /// No field configuration exists with the given name.
    #[error("field config not found: {0}")]
    FieldConfigNotFound(String),

    /// No entity type exists with the given name.
    #[error("entity type not found: {0}")]
    EntityTypeNotFound(String),

    /// The dependency graph over field configs (or calculated-field
    /// dependencies) contains a cycle.
    #[error("circular dependency detected, cycle includes: {}", join_fields(.0))]
    CircularDependency(Vec<FieldName>),

    /// A mapper expression could not be applied to a response document.
    #[error("field mapping failed for '{field}' at sub-path '{sub_path}': {message}")]
    FieldMappingFailure {
        field: FieldName,
        sub_path: String,
        message: String,
    },

    /// A calculator raised, or returned a value incompatible with the
    /// field's declared type.
    #[error("calculation failed for field '{field}': {message}")]
    CalculationFailure { field: FieldName, message: String },

    /// Transport or server-side failure after retries were exhausted.
    #[error("data service request failed for field '{field}': {source}")]
    DataServiceFailure {
        field: FieldName,
        #[source]
        source: DataServiceError,
    },

    /// Authentication failure talking to a data service. Never retried.
    #[error("authentication failed for field '{field}': {message}")]
    AuthFailure { field: FieldName, message: String },

    /// A deadline (per-fetch or overall execution) was exceeded.
    #[error("operation timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    /// Execution was cancelled by the caller before completion.
    #[error("execution was cancelled")]
    Cancelled,
}

impl EngineError {
    /// The stable error-kind tag, used for the orchestrator's state machine
    /// and for surfacing a discriminator to callers without matching on
    /// the full enum.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ValidationFailure(_) => ErrorKind::ValidationFailure,
            EngineError::RuleNotFound(_) => ErrorKind::RuleNotFound,
            EngineError::FieldConfigNotFound(_) => ErrorKind::FieldConfigNotFound,
            EngineError::EntityTypeNotFound(_) => ErrorKind::EntityTypeNotFound,
            EngineError::CircularDependency(_) => ErrorKind::CircularDependency,
            EngineError::FieldMappingFailure { .. } => ErrorKind::FieldMappingFailure,
            EngineError::CalculationFailure { .. } => ErrorKind::CalculationFailure,
            EngineError::DataServiceFailure { .. } => ErrorKind::DataServiceFailure,
            EngineError::AuthFailure { .. } => ErrorKind::AuthFailure,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Stable discriminator for [`EngineError`], independent of the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationFailure,
    RuleNotFound,
    FieldConfigNotFound,
    EntityTypeNotFound,
    CircularDependency,
    FieldMappingFailure,
    CalculationFailure,
    DataServiceFailure,
    AuthFailure,
    Timeout,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transport/server-side failure from the Data Service Client.
#[derive(Debug, thiserror::Error)]
pub enum DataServiceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned status {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("client returned status {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("response body could not be parsed as JSON: {0}")]
    ParseFailure(#[from] serde_json::Error),
}

impl DataServiceError {
    /// §4.6: 4xx responses are non-retryable, 5xx and transport errors are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataServiceError::Transport(_) | DataServiceError::ServerError { .. })
    }
}

fn join_fields(fields: &[FieldName]) -> String {
    fields
        .iter()
        .map(FieldName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
