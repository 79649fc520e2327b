//! Status taxonomy shared by every layer of the store.
//!
//! A single `Status` enum carries the error conditions that cross
//! component boundaries: parser corruption, translator validation,
//! routing failures, session aggregates, and planner query errors.
//! Response-level statuses (schema mismatch surfaced inside a row
//! response rather than as an error) live in the planner's response
//! types; `Status` is for conditions that fail the call itself.

use thiserror::Error;

/// Common error conditions.
///
/// Variants map one-to-one onto the propagation policy: parser and
/// translator errors fail the single command, routing errors are retried
/// until the deadline, per-operation errors aggregate into `IoError` at
/// session flush.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Status {
    /// Table absent, column unknown, scanner id unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// Shape, type, or range violation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed command at the translator.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Duplicate table name or duplicate column rename.
    #[error("already present: {0}")]
    AlreadyPresent(String),

    /// Connection-level failure talking to a master or tablet server.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Deadline elapsed. Embeds the last underlying cause when one was
    /// observed before the deadline fired.
    #[error("timed out: {message}")]
    TimedOut {
        message: String,
        cause: Option<Box<Status>>,
    },

    /// Every replica blacklisted or failed.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Close with pending operations, scanner used after close.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Session buffer budget exceeded during apply.
    #[error("incomplete: {0}")]
    Incomplete(String),

    /// Aggregate flush failure; per-operation details are retrievable
    /// from the session's error collector.
    #[error("io error: {failed} of {total} operations failed")]
    IoError { failed: usize, total: usize },

    /// Client schema older than the tablet schema.
    #[error("schema version mismatch: client {client}, tablet {tablet}")]
    SchemaVersionMismatch { client: u32, tablet: u32 },

    /// Wire protocol parse failure.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Query-level error surfaced by the planner (e.g. duplicate key).
    #[error("{0}")]
    QlError(String),

    /// Server-side queue overflow; the client backs off and retries.
    #[error("server too busy: {0}")]
    ServerTooBusy(String),

    /// Server-side scanner passed its TTL and was collected.
    #[error("scanner expired: {0}")]
    ScannerExpired(String),
}

impl Status {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_command(msg: impl Into<String>) -> Self {
        Self::InvalidCommand(msg.into())
    }

    pub fn network_error(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn ql_error(msg: impl Into<String>) -> Self {
        Self::QlError(msg.into())
    }

    /// Timeout without an underlying cause.
    pub fn timed_out(msg: impl Into<String>) -> Self {
        Self::TimedOut {
            message: msg.into(),
            cause: None,
        }
    }

    /// Timeout embedding the last error seen before the deadline.
    pub fn timed_out_with_cause(msg: impl Into<String>, cause: Status) -> Self {
        Self::TimedOut {
            message: msg.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Whether the condition is transient and worth retrying within the
    /// operation deadline.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::ServiceUnavailable(_) | Self::ServerTooBusy(_)
        )
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type using `Status`.
pub type Result<T> = std::result::Result<T, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(Status::network_error("connection refused").is_retriable());
        assert!(Status::service_unavailable("all replicas failed").is_retriable());
        assert!(!Status::invalid_argument("bad ttl").is_retriable());
        assert!(!Status::timed_out("deadline").is_retriable());
    }

    #[test]
    fn test_timeout_embeds_cause() {
        let cause = Status::network_error("broken pipe");
        let status = Status::timed_out_with_cause("flush deadline", cause.clone());
        match status {
            Status::TimedOut {
                cause: Some(inner), ..
            } => assert_eq!(*inner, cause),
            other => panic!("expected TimedOut with cause, got {:?}", other),
        }
    }

    #[test]
    fn test_display_messages() {
        let status = Status::SchemaVersionMismatch {
            client: 3,
            tablet: 5,
        };
        assert_eq!(
            status.to_string(),
            "schema version mismatch: client 3, tablet 5"
        );
        assert_eq!(
            Status::IoError {
                failed: 2,
                total: 7
            }
            .to_string(),
            "io error: 2 of 7 operations failed"
        );
    }
}
