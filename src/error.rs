//! Error handling module
//!
//! Provides the error taxonomy shared by every command and its mapping to
//! stable machine codes and process exit codes.

use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid relation type: {0:?} (expected includes|causes|uses|represents|contrasts_with)")]
    InvalidRelationType(String),

    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Timed out after {seconds}s during {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Graph write failed: {0}")]
    GraphWriteFailed(String),

    #[error("Consistency verification failed: {0}")]
    ConsistencyVerificationFailed(String),

    #[error("Unknown table in backup: {0}")]
    UnknownTable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {}", describe_postgres(.0))]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {}", describe_pool(.0))]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("{operation} failed: {source}")]
    Operation {
        operation: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error body written to stderr by the command layer
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Stable machine-readable code for this error class
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::InvalidRelationType(_) => "INVALID_RELATION_TYPE",
            AppError::ConfirmationRequired(_) => "CONFIRMATION_REQUIRED",
            AppError::MissingCredentials(_) => "MISSING_CREDENTIALS",
            AppError::Connectivity(_) => "CONNECTIVITY_ERROR",
            AppError::Timeout { .. } => "TIMEOUT",
            AppError::GraphWriteFailed(_) => "GRAPH_WRITE_FAILED",
            AppError::ConsistencyVerificationFailed(_) => "CONSISTENCY_VERIFICATION_FAILED",
            AppError::UnknownTable(_) => "UNKNOWN_TABLE",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Pool(_) => "CONNECTIVITY_ERROR",
            AppError::Operation { source, .. } => source.code(),
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Validation(_)
            | AppError::InvalidRelationType(_)
            | AppError::ConfirmationRequired(_)
            | AppError::MissingCredentials(_)
            | AppError::UnknownTable(_) => 2,
            AppError::Connectivity(_) | AppError::Pool(_) | AppError::Timeout { .. } => 3,
            AppError::GraphWriteFailed(_) | AppError::ConsistencyVerificationFailed(_) => 4,
            AppError::Operation { source, .. } => source.exit_code(),
            _ => 1,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            code: self.code(),
            message: self.to_string(),
        }
    }

    /// Attach the attempted operation and a parameter summary to an error
    pub fn context(self, operation: &str, params: &[ParamSummary<'_>]) -> AppError {
        let mut label = operation.to_string();
        if !params.is_empty() {
            let rendered: Vec<String> = params.iter().map(ToString::to_string).collect();
            label.push_str(&format!(" ({})", rendered.join(", ")));
        }
        AppError::Operation {
            operation: label,
            source: Box::new(self),
        }
    }
}

/// Result type alias for command and component functions
pub type AppResult<T> = Result<T, AppError>;

/// Server-side failures carry their message in `DbError`, which the
/// `tokio_postgres::Error` display leaves out.
fn describe_postgres(e: &tokio_postgres::Error) -> String {
    if let Some(db) = e.as_db_error() {
        let mut out = format!(
            "{}: {} (SQLSTATE {})",
            db.severity(),
            db.message(),
            db.code().code()
        );
        if let Some(constraint) = db.constraint() {
            out.push_str(&format!(", constraint {}", constraint));
        }
        return out;
    }

    let mut out = e.to_string();
    let mut cause = std::error::Error::source(e);
    while let Some(inner) = cause {
        let text = inner.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        cause = std::error::Error::source(inner);
    }
    out
}

fn describe_pool(e: &deadpool_postgres::PoolError) -> String {
    match e {
        deadpool_postgres::PoolError::Backend(e) => describe_postgres(e),
        other => other.to_string(),
    }
}

/// Rendering of an operation parameter.
///
/// Bound data values are reported by length only. Names (tables, steps,
/// relation types) and numbers are shown verbatim.
pub enum ParamSummary<'a> {
    Str(&'a str, &'a str),
    Name(&'a str, &'a str),
    Int(&'a str, i64),
}

impl Display for ParamSummary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamSummary::Str(name, value) => {
                if value.is_empty() {
                    write!(f, "{}=empty", name)
                } else {
                    write!(f, "{}=len={}", name, value.chars().count())
                }
            }
            ParamSummary::Name(name, value) => write!(f, "{}={}", name, value),
            ParamSummary::Int(name, value) => write!(f, "{}={}", name, value),
        }
    }
}

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a confirmation error
pub fn confirmation_required(msg: impl Into<String>) -> AppError {
    AppError::ConfirmationRequired(msg.into())
}

/// Helper function to create a connectivity error
pub fn connectivity_error(msg: impl Into<String>) -> AppError {
    AppError::Connectivity(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_class() {
        assert_eq!(validation_error("missing --from").exit_code(), 2);
        assert_eq!(confirmation_required("reset").exit_code(), 2);
        assert_eq!(AppError::UnknownTable("users".into()).exit_code(), 2);
        assert_eq!(connectivity_error("down").exit_code(), 3);
        assert_eq!(
            AppError::Timeout { operation: "probe".into(), seconds: 5 }.exit_code(),
            3
        );
        assert_eq!(AppError::GraphWriteFailed("x".into()).exit_code(), 4);
        assert_eq!(AppError::Internal("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_context_keeps_code_and_hides_values() {
        let err = AppError::GraphWriteFailed("boom".into()).context(
            "merge edge",
            &[
                ParamSummary::Str("from", "6f1c3f0e"),
                ParamSummary::Str("note", ""),
                ParamSummary::Name("table", "experiments"),
                ParamSummary::Int("count", 3),
            ],
        );
        assert_eq!(err.code(), "GRAPH_WRITE_FAILED");
        assert_eq!(err.exit_code(), 4);
        let msg = err.to_string();
        assert!(msg.contains("from=len=8"));
        assert!(msg.contains("note=empty"));
        assert!(msg.contains("table=experiments"));
        assert!(msg.contains("count=3"));
        assert!(!msg.contains("6f1c3f0e"));
    }

    #[tokio::test]
    async fn test_database_error_keeps_the_underlying_cause() {
        let e = tokio_postgres::connect(
            "host=127.0.0.1 port=1 user=nobody dbname=nowhere connect_timeout=2",
            tokio_postgres::NoTls,
        )
        .await
        .err()
        .expect("nothing listens on port 1");
        let cause = std::error::Error::source(&e)
            .map(ToString::to_string)
            .expect("connect failures carry an I/O cause");

        let msg = AppError::from(e).context("probe", &[]).to_string();
        assert!(msg.starts_with("probe failed: Database error: "), "{}", msg);
        assert!(msg.contains(&cause), "{} lacks {}", msg, cause);
    }
}
