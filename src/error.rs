//! Error types for the scan engine.

use std::time::Duration;

use uuid::Uuid;

use crate::db::models::JobState;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Connection pool could not be created.
    #[error("Pool error: {0}")]
    Pool(String),

    /// Failed to get a connection from the pool.
    #[error("Connection error: {0}")]
    Connection(#[from] deadpool_postgres::PoolError),

    /// Query failed.
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Stored payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the job queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The requested state change is not allowed by the job state machine.
    #[error("Invalid job transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobState, to: JobState },
}

/// Errors from API definition parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The document is not a valid definition of the claimed kind.
    #[error("Invalid {kind} document: {reason}")]
    InvalidDocument { kind: &'static str, reason: String },

    /// No operation in the definition matched the requested endpoint.
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors from credential handling and token refresh.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Auth config is not registered with the token manager.
    #[error("Auth config not registered: {0}")]
    NotRegistered(Uuid),

    /// The auth config has no refresh policy but a refresh was requested.
    #[error("Auth config {0} does not support refresh")]
    RefreshUnsupported(Uuid),

    /// The token endpoint rejected the refresh request.
    #[error("Token refresh failed: {reason}")]
    RefreshFailed { reason: String },

    #[error("HTTP error during refresh: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors from the raw smuggling client.
#[derive(Debug, thiserror::Error)]
pub enum SmugglingError {
    /// URL could not be decomposed into host/port/path.
    #[error("Invalid target URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    /// The whole exchange exceeded its deadline.
    #[error("Exchange timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by job executors, classified by the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The job was cancelled by the worker, scan, or job scope.
    #[error("Job cancelled")]
    Cancelled,

    /// The job payload did not match the schema for its job type.
    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The scan referenced by the job has no registered control.
    #[error("Scan not found: {0}")]
    ScanNotFound(Uuid),

    /// No executor is registered for the job type.
    #[error("No executor for job type: {0}")]
    NoExecutor(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Smuggling(#[from] SmugglingError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-retryable domain failure.
    #[error("Execution error: {0}")]
    Execution(String),
}

impl ExecutorError {
    /// Typed error string recorded on the failed job.
    pub fn error_type(&self) -> &'static str {
        match self {
            ExecutorError::Cancelled => "cancelled",
            ExecutorError::Payload(_) => "invalid_payload",
            ExecutorError::ScanNotFound(_) => "scan_not_found",
            ExecutorError::NoExecutor(_) => "no_executor",
            ExecutorError::Database(_) => "database_error",
            _ => "execution_error",
        }
    }
}
