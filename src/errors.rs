use thiserror::Error;

/// Application-wide error type - single point of truth
#[derive(Error, Debug)]
pub enum EtlError {
    /// Database operations (pool, query, transaction)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Delimited parser could not frame or decode a file
    #[error("Parse error in {key} at row {row}: {reason}")]
    Parse {
        key: String,
        row: u64,
        reason: String,
    },

    /// Row failed validation - routed to rejections, never fatal
    #[error("Validation error on column {column}: {message}")]
    Validation { column: String, message: String },

    /// Row could not be coerced to its target types
    #[error("Transformation error on column {column}: {message}")]
    Transformation { column: String, message: String },

    /// No extract handler registered for the file's extract type
    #[error("No handler registered for extract type: {0}")]
    HandlerMissing(String),

    /// Duplicate work detected - surfaced as a warning and an empty result
    #[error("File already processed: {key} (version {version_id})")]
    IdempotencyConflict { key: String, version_id: String },

    /// Source file could not be found in object storage
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Source file exists but could not be read
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// An operation exceeded its deadline
    #[error("Timeout after {seconds}s: {operation}")]
    Timeout { seconds: u64, operation: String },

    /// File I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration issues
    #[error("Configuration error: {0}")]
    Config(String),

    /// Batch shape problems (empty rows, ragged value arrays, parameter overflow)
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Run bookkeeping inconsistencies (missing run rows, bad state transitions)
    #[error("Run state error: {0}")]
    RunState(String),
}

/// Application-wide result type - single point of truth
pub type EtlResult<T> = Result<T, EtlError>;

/// Error kinds for retry and reporting decisions.
///
/// These are kinds, not types: several `EtlError` variants can map onto the
/// same kind (e.g. a unique-violation `sqlx::Error` is a constraint kind,
/// a pool timeout is a database kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Validation,
    Transformation,
    Database,
    ConstraintViolation,
    IdempotencyConflict,
    FileNotFound,
    Permission,
    Timeout,
    Config,
    Io,
    Other,
}

impl EtlError {
    /// Classify this error into the pipeline taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::Database(e) if is_constraint_violation(e) => ErrorKind::ConstraintViolation,
            EtlError::Database(_) => ErrorKind::Database,
            EtlError::Parse { .. } => ErrorKind::Parse,
            EtlError::Validation { .. } => ErrorKind::Validation,
            EtlError::Transformation { .. } => ErrorKind::Transformation,
            EtlError::HandlerMissing(_) => ErrorKind::Config,
            EtlError::IdempotencyConflict { .. } => ErrorKind::IdempotencyConflict,
            EtlError::FileNotFound(_) => ErrorKind::FileNotFound,
            EtlError::PermissionDenied(_) => ErrorKind::Permission,
            EtlError::Timeout { .. } => ErrorKind::Timeout,
            EtlError::Io(_) => ErrorKind::Io,
            EtlError::Config(_) => ErrorKind::Config,
            EtlError::InvalidBatch(_) => ErrorKind::Other,
            EtlError::RunState(_) => ErrorKind::Other,
        }
    }

    /// Whether a retry with backoff has any chance of succeeding.
    ///
    /// Transient database failures (connection loss, pool exhaustion,
    /// deadlock, serialisation conflict) and timeouts are retryable.
    /// Constraint violations, parse errors and configuration problems
    /// are not - retrying would fail identically.
    pub fn is_retryable(&self) -> bool {
        match self {
            EtlError::Database(e) => is_transient_db_error(e),
            EtlError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// SQLSTATE classes that indicate a transient condition worth retrying.
///
/// 08xxx = connection exception, 40001 = serialisation failure,
/// 40P01 = deadlock detected, 53xxx = insufficient resources,
/// 57P03 = cannot connect now (server starting up).
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || code == "40001"
        || code == "40P01"
        || code.starts_with("53")
        || code == "57P03"
}

fn is_transient_db_error(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| is_transient_sqlstate(&code))
            .unwrap_or(false),
        _ => false,
    }
}

/// Integrity constraint violation class (23xxx): unique, FK, not-null, check.
fn is_constraint_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| code.starts_with("23"))
            .unwrap_or(false),
        _ => false,
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Config(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for EtlError {
    fn from(err: config::ConfigError) -> Self {
        EtlError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_errors_are_not_retryable() {
        let err = EtlError::Parse {
            key: "extracts/patients.csv".to_string(),
            row: 42,
            reason: "row exceeds maximum length".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = EtlError::Timeout {
            seconds: 30,
            operation: "batch insert".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err = EtlError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), ErrorKind::Database);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transient_sqlstates() {
        assert!(is_transient_sqlstate("08006")); // connection failure
        assert!(is_transient_sqlstate("40001")); // serialisation failure
        assert!(is_transient_sqlstate("40P01")); // deadlock
        assert!(is_transient_sqlstate("53300")); // too many connections
        assert!(!is_transient_sqlstate("23505")); // unique violation
        assert!(!is_transient_sqlstate("42601")); // syntax error
    }

    #[test]
    fn test_idempotency_conflict_kind() {
        let err = EtlError::IdempotencyConflict {
            key: "extracts/patients.csv".to_string(),
            version_id: "v1".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::IdempotencyConflict);
        assert!(!err.is_retryable());
    }
}
