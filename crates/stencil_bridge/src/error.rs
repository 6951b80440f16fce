use stencil_abi::Status;
use thiserror::Error;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Errors that can cross back to the host as exceptions.
///
/// Invariant violations are not represented here: they panic.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// A host API primitive returned a non-ok status.
    #[error("{message}")]
    Status {
        status: Status,
        code: Option<String>,
        message: String,
    },

    /// Unwrap tag check failed, or a value had the wrong host type.
    #[error("{0}")]
    TypeMismatch(String),

    /// A value outside the set the conversion engine supports.
    #[error("{0}")]
    Unsupported(String),

    /// Reported by the wrapped library itself.
    #[error("{0}")]
    Domain(String),

    /// A panic raised inside the wrapped library and recovered at the boundary.
    #[error("caught panic: {0}")]
    Panic(String),
}

impl BridgeError {
    pub fn status(status: Status, message: impl Into<String>) -> Self {
        BridgeError::Status {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn domain(err: impl std::fmt::Display) -> Self {
        BridgeError::Domain(err.to_string())
    }

    /// True when the failure was caused by a host exception already in flight.
    pub fn is_pending_exception(&self) -> bool {
        matches!(
            self,
            BridgeError::Status {
                status: Status::PENDING_EXCEPTION,
                ..
            }
        )
    }

    /// Whether the host should see this as a `TypeError`.
    pub fn is_type_error(&self) -> bool {
        match self {
            BridgeError::TypeMismatch(_) | BridgeError::Unsupported(_) => true,
            BridgeError::Status { status, .. } => matches!(
                *status,
                Status::OBJECT_EXPECTED
                    | Status::STRING_EXPECTED
                    | Status::NAME_EXPECTED
                    | Status::FUNCTION_EXPECTED
                    | Status::NUMBER_EXPECTED
                    | Status::BOOLEAN_EXPECTED
                    | Status::ARRAY_EXPECTED
                    | Status::BIGINT_EXPECTED
            ),
            _ => false,
        }
    }

    /// Error code attached to the thrown host error.
    pub fn code(&self) -> Option<&str> {
        match self {
            BridgeError::Status { code, .. } => code.as_deref(),
            BridgeError::TypeMismatch(_) | BridgeError::Unsupported(_) => {
                Some("ERR_INVALID_ARG_TYPE")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_is_prefixed() {
        let err = BridgeError::Panic("unrecognized option: bogus".into());
        assert_eq!(err.to_string(), "caught panic: unrecognized option: bogus");
    }

    #[test]
    fn pending_exception_is_detected() {
        let err = BridgeError::status(Status::PENDING_EXCEPTION, "An exception is pending");
        assert!(err.is_pending_exception());
        assert!(!BridgeError::Domain("x".into()).is_pending_exception());
    }

    #[test]
    fn expectation_statuses_are_type_errors() {
        assert!(BridgeError::status(Status::STRING_EXPECTED, "A string was expected").is_type_error());
        assert!(!BridgeError::status(Status::GENERIC_FAILURE, "boom").is_type_error());
        assert!(BridgeError::Unsupported("Unsupported value type".into()).is_type_error());
    }
}
