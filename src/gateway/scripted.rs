// In-process gateway with scripted answers. Records every call it
// receives; backs the simulator and integration tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

use super::types::*;
use super::{ActionGateway, GatewayError};

/// A call as received by the gateway, in order
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    StartDelivery(StartDeliveryRequest),
    VerifyDeliveryOtp(VerifyOtpRequest),
    CompleteDelivery(CompleteDeliveryRequest),
    MarkDeliveryFailed(MarkFailedRequest),
    RescheduleDelivery {
        parcel_id: String,
        request: RescheduleRequest,
    },
    ReturnToSender {
        parcel_id: String,
        request: ReturnToSenderRequest,
    },
    SendDeliveryOtp(SendOtpRequest),
}

impl GatewayCall {
    pub fn operation(&self) -> GatewayOperation {
        match self {
            GatewayCall::StartDelivery(_) => GatewayOperation::StartDelivery,
            GatewayCall::VerifyDeliveryOtp(_) => GatewayOperation::VerifyDeliveryOtp,
            GatewayCall::CompleteDelivery(_) => GatewayOperation::CompleteDelivery,
            GatewayCall::MarkDeliveryFailed(_) => GatewayOperation::MarkDeliveryFailed,
            GatewayCall::RescheduleDelivery { .. } => GatewayOperation::RescheduleDelivery,
            GatewayCall::ReturnToSender { .. } => GatewayOperation::ReturnToSender,
            GatewayCall::SendDeliveryOtp(_) => GatewayOperation::SendDeliveryOtp,
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    accepted_otp: Option<String>,
    failures: HashMap<GatewayOperation, GatewayError>,
    calls: Vec<GatewayCall>,
}

/// Cloning shares the underlying script and call log
#[derive(Debug, Clone, Default)]
pub struct ScriptedGateway {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGateway {
    /// Accepts every call and every OTP code
    pub fn new() -> Self {
        Self::default()
    }

    /// Only `code` passes OTP verification; any other code verifies as false
    pub fn accepting_otp(self, code: impl Into<String>) -> Self {
        self.lock().accepted_otp = Some(code.into());
        self
    }

    /// Make every call to `operation` fail with `error` until cleared
    pub fn fail_on(self, operation: GatewayOperation, error: GatewayError) -> Self {
        self.lock().failures.insert(operation, error);
        self
    }

    pub fn clear_failure(&self, operation: GatewayOperation) {
        self.lock().failures.remove(&operation);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, operation: GatewayOperation) -> Vec<GatewayCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: GatewayCall) -> Result<(), GatewayError> {
        let operation = call.operation();
        let mut script = self.lock();
        script.calls.push(call);
        info!(operation = %operation, call_count = script.calls.len(), "Scripted gateway call");
        match script.failures.get(&operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ActionGateway for ScriptedGateway {
    async fn start_delivery(&self, request: &StartDeliveryRequest) -> Result<(), GatewayError> {
        self.record(GatewayCall::StartDelivery(request.clone()))
    }

    async fn verify_delivery_otp(&self, request: &VerifyOtpRequest) -> Result<bool, GatewayError> {
        self.record(GatewayCall::VerifyDeliveryOtp(request.clone()))?;
        let accepted = self.lock().accepted_otp.clone();
        Ok(accepted.map_or(true, |code| code == request.otp_code))
    }

    async fn complete_delivery(
        &self,
        request: &CompleteDeliveryRequest,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::CompleteDelivery(request.clone()))
    }

    async fn mark_delivery_failed(&self, request: &MarkFailedRequest) -> Result<(), GatewayError> {
        self.record(GatewayCall::MarkDeliveryFailed(request.clone()))
    }

    async fn reschedule_delivery(
        &self,
        parcel_id: &str,
        request: &RescheduleRequest,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::RescheduleDelivery {
            parcel_id: parcel_id.to_string(),
            request: request.clone(),
        })
    }

    async fn return_to_sender(
        &self,
        parcel_id: &str,
        request: &ReturnToSenderRequest,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::ReturnToSender {
            parcel_id: parcel_id.to_string(),
            request: request.clone(),
        })
    }

    async fn send_delivery_otp(&self, request: &SendOtpRequest) -> Result<(), GatewayError> {
        self.record(GatewayCall::SendDeliveryOtp(request.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify_request(code: &str) -> VerifyOtpRequest {
        VerifyOtpRequest {
            parcel_id: "p-1".to_string(),
            otp_code: code.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            notes: None,
            idempotency_key: IdempotencyKey::generate(),
        }
    }

    #[tokio::test]
    async fn test_accepting_otp_only_matches_configured_code() {
        let gateway = ScriptedGateway::new().accepting_otp("123456");
        assert!(gateway.verify_delivery_otp(&verify_request("123456")).await.unwrap());
        assert!(!gateway.verify_delivery_otp(&verify_request("654321")).await.unwrap());
        assert_eq!(gateway.calls_to(GatewayOperation::VerifyDeliveryOtp).len(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_recorded_then_returned() {
        let gateway = ScriptedGateway::new().fail_on(
            GatewayOperation::SendDeliveryOtp,
            GatewayError::rejected("SMS quota exceeded"),
        );
        let request = SendOtpRequest {
            parcel_id: "p-1".to_string(),
            phone_number: "+237600000000".to_string(),
            idempotency_key: IdempotencyKey::generate(),
        };

        let err = gateway.send_delivery_otp(&request).await.unwrap_err();
        assert_eq!(err.message(), Some("SMS quota exceeded"));
        assert_eq!(gateway.calls().len(), 1);

        gateway.clear_failure(GatewayOperation::SendDeliveryOtp);
        assert!(gateway.send_delivery_otp(&request).await.is_ok());
    }
}
