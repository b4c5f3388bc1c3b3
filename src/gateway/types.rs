// Request payloads for the remote delivery actions

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::failure::FailureReason;
use crate::proof::PhotoRef;

/// One key per workflow session, attached to every remote call so the
/// server can collapse retried requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub Uuid);

impl IdempotencyKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOperation {
    StartDelivery,
    VerifyDeliveryOtp,
    CompleteDelivery,
    MarkDeliveryFailed,
    RescheduleDelivery,
    ReturnToSender,
    SendDeliveryOtp,
}

impl GatewayOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOperation::StartDelivery => "startDelivery",
            GatewayOperation::VerifyDeliveryOtp => "verifyDeliveryOtp",
            GatewayOperation::CompleteDelivery => "completeDelivery",
            GatewayOperation::MarkDeliveryFailed => "markDeliveryFailed",
            GatewayOperation::RescheduleDelivery => "rescheduleDelivery",
            GatewayOperation::ReturnToSender => "returnToSender",
            GatewayOperation::SendDeliveryOtp => "sendDeliveryOtp",
        }
    }

    /// Message shown when the remote error carries none of its own
    pub fn fallback_message(&self) -> &'static str {
        match self {
            GatewayOperation::StartDelivery => "Could not start delivery",
            GatewayOperation::VerifyDeliveryOtp => "OTP verification failed",
            GatewayOperation::SendDeliveryOtp => "Could not resend OTP",
            GatewayOperation::CompleteDelivery
            | GatewayOperation::MarkDeliveryFailed
            | GatewayOperation::RescheduleDelivery
            | GatewayOperation::ReturnToSender => "Delivery action failed",
        }
    }
}

impl fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence the completion is backed by, in strict precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofType {
    Photo,
    Signature,
    Otp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDeliveryRequest {
    pub parcel_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub notes: Option<String>,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub parcel_id: String,
    pub otp_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub notes: Option<String>,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteDeliveryRequest {
    pub parcel_id: String,
    pub otp_code: Option<String>,
    pub receiver_name: Option<String>,
    pub photo: Option<PhotoRef>,
    pub notes: Option<String>,
    pub proof_type: ProofType,
    pub latitude: f64,
    pub longitude: f64,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkFailedRequest {
    pub parcel_id: String,
    pub reason: FailureReason,
    pub latitude: f64,
    pub longitude: f64,
    pub notes: Option<String>,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub new_date: NaiveDate,
    pub reason: FailureReason,
    pub delivery_notes: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnToSenderRequest {
    pub reason: FailureReason,
    pub notes: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpRequest {
    pub parcel_id: String,
    pub phone_number: String,
    pub idempotency_key: IdempotencyKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_type_wire_names() {
        assert_eq!(serde_json::to_string(&ProofType::Photo).unwrap(), "\"PHOTO\"");
        assert_eq!(serde_json::to_string(&ProofType::Signature).unwrap(), "\"SIGNATURE\"");
        assert_eq!(serde_json::to_string(&ProofType::Otp).unwrap(), "\"OTP\"");
    }

    #[test]
    fn test_reschedule_request_serializes_iso_date() {
        let request = RescheduleRequest {
            new_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            reason: FailureReason::CustomerAbsent,
            delivery_notes: None,
            latitude: 1.0,
            longitude: 2.0,
            idempotency_key: IdempotencyKey::generate(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["newDate"], "2026-10-20");
        assert_eq!(json["reason"], "CUSTOMER_ABSENT");
    }
}
