//! Error type shared by every pipeline stage.
//!
//! Each variant belongs to one [`ErrorKind`], which decides whether the run
//! aborts, whether the failure was transient, or whether only a single record
//! is skipped.

use thiserror::Error;

/// How the pipeline reacts to an [`EtlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed precondition. The run cannot start or continue.
    Fatal,
    /// Transient I/O failure that survived the retry budget.
    Retryable,
    /// A single input record is unusable. The record is dropped and counted.
    SkipRecord,
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context} returned {status}: {body}")]
    Status {
        context: &'static str,
        status: u16,
        body: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("passback_params parse error at byte {offset}: {message}")]
    Passback { offset: usize, message: String },

    #[error("malformed record: {0}")]
    Record(String),

    #[error("Google Sheets error: {0}")]
    Sheets(String),

    #[error("authentication error: {0}")]
    Auth(String),
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Migration(_) | Self::Auth(_) | Self::Decode(_) => {
                ErrorKind::Fatal
            }
            Self::Status { status, .. } if *status == 429 || *status >= 500 => {
                ErrorKind::Retryable
            }
            Self::Status { .. } => ErrorKind::Fatal,
            Self::Io(_) | Self::Http(_) | Self::Database(_) | Self::Sheets(_) => {
                ErrorKind::Retryable
            }
            Self::Passback { .. } | Self::Record(_) => ErrorKind::SkipRecord,
        }
    }

    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Fatal => 1,
            ErrorKind::Retryable | ErrorKind::SkipRecord => 2,
        }
    }

    /// Whether a failed HTTP call is worth repeating.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { .. } => self.kind() == ErrorKind::Retryable,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_is_fatal() {
        let err = EtlError::Config("PARAMS_FILE missing".into());
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "configuration error: PARAMS_FILE missing");
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = EtlError::Status {
            context: "statistics API",
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert!(err.is_transient());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn throttling_is_retryable() {
        let err = EtlError::Status {
            context: "statistics API",
            status: 429,
            body: String::new(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_are_fatal() {
        let err = EtlError::Status {
            context: "statistics API",
            status: 403,
            body: "bad token".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "statistics API returned 403: bad token");
    }

    #[test]
    fn record_errors_skip_the_record() {
        let err = EtlError::Passback {
            offset: 3,
            message: "expected ':'".into(),
        };
        assert_eq!(err.kind(), ErrorKind::SkipRecord);
        assert_eq!(
            err.to_string(),
            "passback_params parse error at byte 3: expected ':'"
        );
        assert_eq!(EtlError::Record("x".into()).kind(), ErrorKind::SkipRecord);
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = EtlError::from(io_err);
        assert!(matches!(err, EtlError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
