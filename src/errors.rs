//! Error types for bridge operations

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Negative sentinel codes handed back to the host instead of an endpoint handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Transport, spawn or reactor setup failed
    Socket = -1,
    /// The security policy refused the caller
    Security = -2,
    /// The endpoint registry has no free slot
    NoSockets = -8,
}

impl ErrorCode {
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Socket => "socket error",
            ErrorCode::Security => "security violation",
            ErrorCode::NoSockets => "no free endpoints",
        };
        write!(f, "{} ({})", name, self.as_raw())
    }
}

/// Errors that can occur while starting an external command
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Bad command index {0}")]
    BadCommandIndex(i64),

    #[error("Bad argument list item {position}: expected a string")]
    BadArgument { position: usize },

    #[error("Bad argument list item {position}: contains a NUL byte")]
    NulInArgument { position: usize },

    #[error("Bad argument: expected a string or an array of strings")]
    BadArgumentType,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resource error during {stage}: {code}")]
    Resource { stage: &'static str, code: ErrorCode },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Process creation failed: {0}")]
    SpawnFatal(io::Error),
}

impl BridgeError {
    /// Socket-resource failure observed at `stage`
    pub fn socket(stage: &'static str) -> Self {
        BridgeError::Resource {
            stage,
            code: ErrorCode::Socket,
        }
    }

    /// Negative code reported to the host, `None` for hard failures
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            BridgeError::Resource { code, .. } => Some(*code),
            BridgeError::PermissionDenied(_) => Some(ErrorCode::Security),
            _ => None,
        }
    }

    /// Whether the error was raised before any resource was acquired
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BridgeError::BadCommandIndex(_)
                | BridgeError::BadArgument { .. }
                | BridgeError::NulInArgument { .. }
                | BridgeError::BadArgumentType
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::BadArgument { position: 3 };
        assert_eq!(
            err.to_string(),
            "Bad argument list item 3: expected a string"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = BridgeError::from(io_err);
        assert!(err.to_string().contains("IO error"));
        assert!(err.code().is_none());
    }

    #[test]
    fn resource_errors_carry_codes() {
        assert_eq!(
            BridgeError::socket("socketpair").code(),
            Some(ErrorCode::Socket)
        );
        let exhausted = BridgeError::Resource {
            stage: "allocate",
            code: ErrorCode::NoSockets,
        };
        assert_eq!(exhausted.code().map(ErrorCode::as_raw), Some(-8));
        assert_eq!(
            BridgeError::PermissionDenied("nope".into()).code(),
            Some(ErrorCode::Security)
        );
    }

    #[test]
    fn hard_failures_have_no_code() {
        assert!(BridgeError::BadCommandIndex(0).code().is_none());
        assert!(BridgeError::SpawnFatal(io::Error::other("x")).code().is_none());
        assert!(BridgeError::BadCommandIndex(0).is_validation());
        assert!(!BridgeError::socket("spawn").is_validation());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Socket.to_string(), "socket error (-1)");
    }
}
