// Remote delivery actions invoked by the workflow. Transport lives behind
// the trait; the server is the authority on duplicate or racing attempts.

pub mod scripted;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use scripted::{GatewayCall, ScriptedGateway};
pub use types::{
    CompleteDeliveryRequest, GatewayOperation, IdempotencyKey, MarkFailedRequest, ProofType,
    RescheduleRequest, ReturnToSenderRequest, SendOtpRequest, StartDeliveryRequest,
    VerifyOtpRequest,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("request rejected{}", fmt_detail(.message))]
    Rejected {
        status: Option<u16>,
        message: Option<String>,
    },

    #[error("transport failure{}", fmt_detail(.message))]
    Transport { message: Option<String> },
}

fn fmt_detail(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

impl GatewayError {
    pub fn rejected(message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            status: None,
            message: Some(message.into()),
        }
    }

    /// The server-provided message, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            GatewayError::Rejected { message, .. } | GatewayError::Transport { message } => {
                message.as_deref().filter(|m| !m.trim().is_empty())
            }
        }
    }
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ActionGateway: Send + Sync {
    async fn start_delivery(&self, request: &StartDeliveryRequest) -> Result<(), GatewayError>;

    /// `Ok(false)` means the server checked the code and it did not match
    async fn verify_delivery_otp(&self, request: &VerifyOtpRequest) -> Result<bool, GatewayError>;

    async fn complete_delivery(
        &self,
        request: &CompleteDeliveryRequest,
    ) -> Result<(), GatewayError>;

    async fn mark_delivery_failed(&self, request: &MarkFailedRequest) -> Result<(), GatewayError>;

    async fn reschedule_delivery(
        &self,
        parcel_id: &str,
        request: &RescheduleRequest,
    ) -> Result<(), GatewayError>;

    async fn return_to_sender(
        &self,
        parcel_id: &str,
        request: &ReturnToSenderRequest,
    ) -> Result<(), GatewayError>;

    /// Ask the platform to send a fresh code to the recipient
    async fn send_delivery_otp(&self, request: &SendOtpRequest) -> Result<(), GatewayError>;
}
