// Scripted delivery sessions: a scenario file describes the parcel, the
// device location, the server's answers and the courier's actions, and is
// driven through a real controller.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, Instrument};

use crate::delivery::DeliveryRecord;
use crate::failure::{FailureAction, FailureReason};
use crate::gateway::{GatewayError, GatewayOperation, ScriptedGateway};
use crate::gps::{DeviceGps, FixedLocation, GpsError};
use crate::proof::PhotoRef;
use crate::telemetry::create_workflow_span;
use crate::workflow::{
    ChannelListener, DeliveryResult, ErrorKind, Milestone, SessionEvent, Step, TransitionOutcome,
    WorkflowController, WorkflowSettings, WorkflowSnapshot,
};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid scenario: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub delivery: DeliveryRecord,
    #[serde(default)]
    pub gps: GpsScript,
    #[serde(default)]
    pub gateway: GatewayScript,
    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpsFailure {
    Denied,
    Unavailable,
    Timeout,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpsScript {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub failure: Option<GpsFailure>,
}

impl Default for GpsScript {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            failure: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedFailure {
    pub operation: GatewayOperation,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayScript {
    #[serde(default)]
    pub accepted_otp: Option<String>,
    #[serde(default)]
    pub failures: Vec<ScriptedFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioAction {
    Advance,
    SubmitOtp { code: String },
    SubmitEnteredOtp,
    EnterOtpDigit { index: usize, value: String },
    OtpBackspace { index: usize },
    ResendOtp,
    SetSignature { value: String },
    SelectPhoto { reference: String },
    ClearPhoto,
    SetNote { value: String },
    ToggleMarkFailed { on: bool },
    SelectFailureAction { action: FailureAction },
    SetFailureReason { reason: Option<FailureReason> },
    SetRescheduleDate { value: String },
    ConfirmProof,
    Complete,
    Back,
    Exit,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeSummary {
    pub outcome: &'static str,
    pub step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&TransitionOutcome> for OutcomeSummary {
    fn from(outcome: &TransitionOutcome) -> Self {
        match outcome {
            TransitionOutcome::Advanced { to, .. } => Self::plain("advanced", Some(*to)),
            TransitionOutcome::Updated { step } => Self::plain("updated", Some(*step)),
            TransitionOutcome::Exited { step } => Self::plain("exited", Some(*step)),
            TransitionOutcome::Discarded { .. } => Self::plain("discarded", None),
            TransitionOutcome::Blocked { step, error } => Self {
                outcome: "blocked",
                step: *step,
                error_kind: Some(error.kind()),
                message: Some(error.to_string()),
            },
        }
    }
}

impl OutcomeSummary {
    fn plain(outcome: &'static str, step: Option<Step>) -> Self {
        Self {
            outcome,
            step,
            error_kind: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub action: ScenarioAction,
    pub result: OutcomeSummary,
    pub timeline: Vec<Milestone>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub actions: Vec<ActionReport>,
    pub gateway_calls: Vec<GatewayOperation>,
    pub result: Option<DeliveryResult>,
    pub exited: bool,
    pub final_state: Option<WorkflowSnapshot>,
}

impl Scenario {
    pub fn parse(text: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(text)?)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    fn gateway(&self) -> ScriptedGateway {
        let mut gateway = ScriptedGateway::new();
        if let Some(code) = &self.gateway.accepted_otp {
            gateway = gateway.accepting_otp(code.clone());
        }
        for failure in &self.gateway.failures {
            gateway = gateway.fail_on(
                failure.operation,
                GatewayError::Rejected {
                    status: None,
                    message: failure.message.clone(),
                },
            );
        }
        gateway
    }

    fn location(&self, timeout: Duration) -> FixedLocation {
        match self.gps.failure {
            None => FixedLocation::at(self.gps.latitude, self.gps.longitude),
            Some(GpsFailure::Denied) => FixedLocation::failing(GpsError::Denied),
            Some(GpsFailure::Unavailable) => FixedLocation::failing(GpsError::Unavailable(
                "no positioning hardware".to_string(),
            )),
            Some(GpsFailure::Timeout) => FixedLocation::failing(GpsError::Timeout(timeout)),
        }
    }
}

async fn perform(controller: &WorkflowController, action: &ScenarioAction) -> TransitionOutcome {
    match action {
        ScenarioAction::Advance => controller.advance_from_details().await,
        ScenarioAction::SubmitOtp { code } => controller.submit_otp(code).await,
        ScenarioAction::SubmitEnteredOtp => controller.submit_entered_otp().await,
        ScenarioAction::EnterOtpDigit { index, value } => controller.enter_otp_digit(*index, value),
        ScenarioAction::OtpBackspace { index } => controller.otp_backspace(*index),
        ScenarioAction::ResendOtp => controller.resend_otp().await,
        ScenarioAction::SetSignature { value } => controller.set_signature(value),
        ScenarioAction::SelectPhoto { reference } => {
            controller.select_photo(PhotoRef::new(reference.clone()))
        }
        ScenarioAction::ClearPhoto => controller.clear_photo(),
        ScenarioAction::SetNote { value } => controller.set_note(value),
        ScenarioAction::ToggleMarkFailed { on } => controller.toggle_mark_failed(*on),
        ScenarioAction::SelectFailureAction { action } => controller.select_failure_action(*action),
        ScenarioAction::SetFailureReason { reason } => controller.set_failure_reason(*reason),
        ScenarioAction::SetRescheduleDate { value } => controller.set_reschedule_date(value),
        ScenarioAction::ConfirmProof => controller.confirm_proof(),
        ScenarioAction::Complete => controller.complete().await,
        ScenarioAction::Back => controller.back(),
        ScenarioAction::Exit => controller.exit(),
    }
}

/// Drive `scenario` to the end of its action list
pub async fn run_scenario(scenario: &Scenario, settings: WorkflowSettings) -> ScenarioReport {
    let gateway = scenario.gateway();
    let gps = DeviceGps::new(scenario.location(settings.location.timeout));
    let (listener, mut events) = ChannelListener::new();
    let controller = WorkflowController::new(Arc::new(gps), Arc::new(gateway.clone()))
        .with_settings(settings)
        .with_listener(Arc::new(listener));

    let requirements = scenario.delivery.requirements;
    let key = controller.start(scenario.delivery.clone(), requirements);
    let correlation_id = key.to_string();
    let span = create_workflow_span(
        "run_scenario",
        Some(scenario.delivery.id.as_str()),
        Some(correlation_id.as_str()),
    );

    let actions = async {
        let mut reports = Vec::with_capacity(scenario.actions.len());
        for action in &scenario.actions {
            let outcome = perform(&controller, action).await;
            info!(action = ?action, outcome = ?outcome, "Scenario action performed");
            reports.push(ActionReport {
                action: action.clone(),
                result: OutcomeSummary::from(&outcome),
                timeline: controller.timeline(),
            });
        }
        reports
    }
    .instrument(span)
    .await;

    let mut result = None;
    let mut exited = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Completed(r) => result = Some(r),
            SessionEvent::Exited => exited = true,
        }
    }

    ScenarioReport {
        actions,
        gateway_calls: gateway.calls().iter().map(|c| c.operation()).collect(),
        result,
        exited,
        final_state: controller.snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNATURE_SCENARIO: &str = r#"
        [delivery]
        id = "p-100"
        trackingNumber = "SCP-100"
        customerName = "Jane Doe"
        customerPhone = "+237600000001"
        address = "Akwa, Douala"

        [delivery.requirements]
        requiresOtp = true
        requiresSignature = true

        [gps]
        latitude = 4.05
        longitude = 9.76

        [gateway]
        accepted_otp = "123456"

        [[actions]]
        op = "advance"

        [[actions]]
        op = "submit_otp"
        code = "123456"

        [[actions]]
        op = "set_signature"
        value = "Jane Doe"

        [[actions]]
        op = "confirm_proof"

        [[actions]]
        op = "complete"
    "#;

    #[tokio::test]
    async fn test_signature_scenario_runs_to_done() {
        let scenario = Scenario::parse(SIGNATURE_SCENARIO).unwrap();
        let report = run_scenario(&scenario, WorkflowSettings::default()).await;

        assert_eq!(
            report.gateway_calls,
            vec![
                GatewayOperation::StartDelivery,
                GatewayOperation::VerifyDeliveryOtp,
                GatewayOperation::CompleteDelivery,
            ]
        );
        assert_eq!(
            report.result,
            Some(DeliveryResult::Delivered {
                otp: Some("123456".to_string()),
                signature: Some("Jane Doe".to_string()),
                photo: None,
                note: None,
            })
        );
        let last = report.actions.last().unwrap();
        assert_eq!(last.result.outcome, "advanced");
        assert_eq!(last.result.step, Some(Step::Done));
        assert!(!report.exited);
    }

    #[tokio::test]
    async fn test_denied_gps_blocks_first_action() {
        let text = SIGNATURE_SCENARIO.replace(
            "longitude = 9.76",
            "longitude = 9.76\nfailure = \"denied\"",
        );
        let scenario = Scenario::parse(&text).unwrap();
        let report = run_scenario(&scenario, WorkflowSettings::default()).await;

        let first = &report.actions[0];
        assert_eq!(first.result.outcome, "blocked");
        assert_eq!(first.result.error_kind, Some(ErrorKind::GpsDenied));
        assert!(report.gateway_calls.is_empty());
        assert_eq!(report.final_state.unwrap().step, Step::Details);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let text = format!("{SIGNATURE_SCENARIO}\n[[actions]]\nop = \"teleport\"\n");
        assert!(matches!(Scenario::parse(&text), Err(ScenarioError::Parse(_))));
    }
}
