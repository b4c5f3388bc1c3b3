use serde::Serialize;
use thiserror::Error;

use super::state::Step;
use crate::gateway::{GatewayError, GatewayOperation};
use crate::gps::GpsError;
use crate::proof::MissingProof;

/// Stable error codes for the UI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    GpsUnavailable,
    GpsDenied,
    GpsTimeout,
    OtpFormat,
    OtpInvalid,
    RemoteFailure,
    ProofIncomplete,
    MissingRescheduleDate,
    InvalidRescheduleDate,
    InvalidOperation,
    Busy,
    NotStarted,
    SessionClosed,
}

/// Everything that can block a workflow operation. None of these escape the
/// controller as `Err`; they are surfaced on the state and in the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Location(#[from] GpsError),

    #[error("Enter the 6-digit code")]
    OtpFormat,

    #[error("Invalid OTP code")]
    OtpInvalid,

    #[error("{message}")]
    Remote {
        operation: GatewayOperation,
        message: String,
    },

    #[error("Proof incomplete: {0}")]
    ProofIncomplete(MissingProof),

    #[error("Select a reschedule date")]
    MissingRescheduleDate,

    #[error("Invalid reschedule date '{input}', expected YYYY-MM-DD")]
    InvalidRescheduleDate { input: String },

    #[error("{operation} is not available in step {step}")]
    InvalidOperation { operation: &'static str, step: Step },

    #[error("{operation} is already in progress")]
    Busy { operation: &'static str },

    #[error("No delivery is open")]
    NotStarted,

    #[error("The delivery session is closed")]
    SessionClosed,
}

impl WorkflowError {
    /// Wrap a gateway failure, keeping the server message when it has one
    pub fn remote(operation: GatewayOperation, error: &GatewayError) -> Self {
        WorkflowError::Remote {
            operation,
            message: error
                .message()
                .unwrap_or_else(|| operation.fallback_message())
                .to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Location(GpsError::Unavailable(_)) => ErrorKind::GpsUnavailable,
            WorkflowError::Location(GpsError::Denied) => ErrorKind::GpsDenied,
            WorkflowError::Location(GpsError::Timeout(_)) => ErrorKind::GpsTimeout,
            WorkflowError::OtpFormat => ErrorKind::OtpFormat,
            WorkflowError::OtpInvalid => ErrorKind::OtpInvalid,
            WorkflowError::Remote { .. } => ErrorKind::RemoteFailure,
            WorkflowError::ProofIncomplete(_) => ErrorKind::ProofIncomplete,
            WorkflowError::MissingRescheduleDate => ErrorKind::MissingRescheduleDate,
            WorkflowError::InvalidRescheduleDate { .. } => ErrorKind::InvalidRescheduleDate,
            WorkflowError::InvalidOperation { .. } => ErrorKind::InvalidOperation,
            WorkflowError::Busy { .. } => ErrorKind::Busy,
            WorkflowError::NotStarted => ErrorKind::NotStarted,
            WorkflowError::SessionClosed => ErrorKind::SessionClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_remote_uses_fallback_without_server_message() {
        let err = WorkflowError::remote(
            GatewayOperation::StartDelivery,
            &GatewayError::Transport { message: None },
        );
        assert_eq!(err.to_string(), "Could not start delivery");
        assert_eq!(err.kind(), ErrorKind::RemoteFailure);

        let err = WorkflowError::remote(
            GatewayOperation::ReturnToSender,
            &GatewayError::rejected("Parcel is not in transit"),
        );
        assert_eq!(err.to_string(), "Parcel is not in transit");
    }

    #[test]
    fn test_gps_errors_map_to_kinds() {
        assert_eq!(WorkflowError::from(GpsError::Denied).kind(), ErrorKind::GpsDenied);
        assert_eq!(
            WorkflowError::from(GpsError::Timeout(Duration::from_secs(10))).kind(),
            ErrorKind::GpsTimeout
        );
        assert_eq!(
            WorkflowError::from(GpsError::Unavailable("no sensor".into())).kind(),
            ErrorKind::GpsUnavailable
        );
    }

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::MissingRescheduleDate).unwrap(),
            "\"MISSING_RESCHEDULE_DATE\""
        );
        assert_eq!(serde_json::to_string(&ErrorKind::GpsDenied).unwrap(), "\"GPS_DENIED\"");
    }
}
