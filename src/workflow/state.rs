// Workflow state as a single value, advanced by a pure transition function.
// The controller owns sequencing and remote calls; everything that decides
// what the next state looks like lives here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::WorkflowError;
use crate::delivery::Requirements;
use crate::failure::{FailureAction, FailureHandler, FailureReason};
use crate::proof::{PhotoRef, ProofCapture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Details,
    Otp,
    Proof,
    Confirm,
    Done,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Details => "DETAILS",
            Step::Otp => "OTP",
            Step::Proof => "PROOF",
            Step::Confirm => "CONFIRM",
            Step::Done => "DONE",
        }
    }

    /// Position in the full step order, used for "has advanced past" checks
    fn rank(&self) -> u8 {
        match self {
            Step::Details => 0,
            Step::Otp => 1,
            Step::Proof => 2,
            Step::Confirm => 3,
            Step::Done => 4,
        }
    }

    pub fn is_past(&self, other: Step) -> bool {
        self.rank() > other.rank()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs that change gate placement without changing the step graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRules {
    /// Check the reschedule date when leaving PROOF, not only at completion
    pub require_reschedule_date_at_confirm: bool,
}

impl Default for TransitionRules {
    fn default() -> Self {
        Self {
            require_reschedule_date_at_confirm: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    /// `startDelivery` was acknowledged
    DeliveryStarted,
    /// `verifyDeliveryOtp` returned true for `code`
    OtpVerified { code: String },
    ConfirmProof,
    /// The terminal remote action was acknowledged
    Completed,
    Back,
    OtpDigitEntered { index: usize, value: String },
    OtpBackspace { index: usize },
    SignatureChanged(String),
    PhotoSelected(PhotoRef),
    PhotoCleared,
    NoteChanged(String),
    MarkFailedToggled(bool),
    FailureActionSelected(FailureAction),
    FailureReasonSelected(Option<FailureReason>),
    RescheduleDateSet(Option<NaiveDate>),
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::DeliveryStarted => "advance_from_details",
            WorkflowEvent::OtpVerified { .. } => "submit_otp",
            WorkflowEvent::ConfirmProof => "confirm_proof",
            WorkflowEvent::Completed => "complete",
            WorkflowEvent::Back => "back",
            WorkflowEvent::OtpDigitEntered { .. } => "enter_otp_digit",
            WorkflowEvent::OtpBackspace { .. } => "otp_backspace",
            WorkflowEvent::SignatureChanged(_) => "set_signature",
            WorkflowEvent::PhotoSelected(_) => "select_photo",
            WorkflowEvent::PhotoCleared => "clear_photo",
            WorkflowEvent::NoteChanged(_) => "set_note",
            WorkflowEvent::MarkFailedToggled(_) => "toggle_mark_failed",
            WorkflowEvent::FailureActionSelected(_) => "select_failure_action",
            WorkflowEvent::FailureReasonSelected(_) => "set_failure_reason",
            WorkflowEvent::RescheduleDateSet(_) => "set_reschedule_date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    step: Step,
    proof: ProofCapture,
    failure: FailureHandler,
    error: Option<String>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            step: Step::Details,
            proof: ProofCapture::new(),
            failure: FailureHandler::new(),
            error: None,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn proof(&self) -> &ProofCapture {
        &self.proof
    }

    pub fn failure(&self) -> &FailureHandler {
        &self.failure
    }

    pub fn mark_failed(&self) -> bool {
        self.failure.mark_failed
    }

    /// Last message surfaced outside the OTP cells
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Same state with `error` surfaced in the place the courier is looking:
    /// on the OTP cells while in OTP, on the step otherwise.
    pub fn with_error(&self, error: &WorkflowError) -> Self {
        let mut next = self.clone();
        if next.step == Step::Otp {
            next.proof.otp.set_error(error.to_string());
        } else {
            next.error = Some(error.to_string());
        }
        next
    }

    /// Checks applied when leaving PROOF
    pub fn proof_gate(
        &self,
        requirements: &Requirements,
        rules: &TransitionRules,
    ) -> Result<(), WorkflowError> {
        if self.failure.mark_failed {
            if let Some(missing) = self.failure.missing_reason() {
                return Err(WorkflowError::ProofIncomplete(missing));
            }
            if rules.require_reschedule_date_at_confirm && self.failure.needs_reschedule_date() {
                return Err(WorkflowError::MissingRescheduleDate);
            }
            return Ok(());
        }
        match self.proof.missing_for(requirements) {
            Some(missing) => Err(WorkflowError::ProofIncomplete(missing)),
            None => Ok(()),
        }
    }

    /// Checks applied at completion, before any location or remote call
    pub fn completion_gate(&self, requirements: &Requirements) -> Result<(), WorkflowError> {
        let strict = TransitionRules {
            require_reschedule_date_at_confirm: true,
        };
        self.proof_gate(requirements, &strict)
    }
}

fn invalid(event: &WorkflowEvent, step: Step) -> WorkflowError {
    WorkflowError::InvalidOperation {
        operation: event.name(),
        step,
    }
}

/// Compute the state that follows `event`. Never mutates `state`; an `Err`
/// means the event is refused and the caller keeps the current state.
pub fn transition(
    state: &WorkflowState,
    requirements: &Requirements,
    rules: &TransitionRules,
    event: &WorkflowEvent,
) -> Result<WorkflowState, WorkflowError> {
    let mut next = state.clone();

    match (state.step, event) {
        (Step::Details, WorkflowEvent::DeliveryStarted) => {
            next.step = if requirements.requires_otp {
                Step::Otp
            } else {
                Step::Proof
            };
            next.error = None;
        }

        (Step::Otp, WorkflowEvent::OtpVerified { code }) => {
            next.proof.otp = crate::proof::OtpBuffer::from_code(code);
            next.step = Step::Proof;
            next.error = None;
        }

        (Step::Proof, WorkflowEvent::ConfirmProof) => {
            state.proof_gate(requirements, rules)?;
            next.step = Step::Confirm;
            next.error = None;
        }

        (Step::Confirm, WorkflowEvent::Completed) => {
            next.step = Step::Done;
            next.error = None;
        }

        (Step::Otp, WorkflowEvent::Back) => {
            next.proof.otp.clear_error();
            next.step = Step::Details;
            next.error = None;
        }

        (Step::Proof, WorkflowEvent::Back) => {
            next.step = if requirements.requires_otp {
                Step::Otp
            } else {
                Step::Details
            };
            next.error = None;
        }

        (Step::Confirm, WorkflowEvent::Back) => {
            next.step = Step::Proof;
            next.error = None;
        }

        (Step::Otp, WorkflowEvent::OtpDigitEntered { index, value }) => {
            next.proof.otp.enter_digit(*index, value);
        }

        (Step::Otp, WorkflowEvent::OtpBackspace { index }) => {
            next.proof.otp.backspace(*index);
        }

        (Step::Details | Step::Otp | Step::Proof, WorkflowEvent::NoteChanged(text)) => {
            next.proof.set_note(text.clone());
        }

        (Step::Proof, WorkflowEvent::SignatureChanged(text)) => {
            next.proof.set_signature(text.clone());
            next.error = None;
        }

        (Step::Proof, WorkflowEvent::PhotoSelected(photo)) => {
            next.proof.photo = Some(photo.clone());
            next.error = None;
        }

        (Step::Proof, WorkflowEvent::PhotoCleared) => {
            next.proof.photo = None;
        }

        (Step::Proof, WorkflowEvent::MarkFailedToggled(on)) => {
            next.failure.mark_failed = *on;
            next.error = None;
        }

        (Step::Proof, WorkflowEvent::FailureActionSelected(action)) => {
            next.failure.action = *action;
            next.error = None;
        }

        (Step::Proof, WorkflowEvent::FailureReasonSelected(reason)) => {
            next.failure.reason = *reason;
            next.error = None;
        }

        (Step::Proof, WorkflowEvent::RescheduleDateSet(date)) => {
            next.failure.reschedule_date = *date;
            next.error = None;
        }

        (step, event) => return Err(invalid(event, step)),
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::MissingProof;

    fn apply(
        state: &WorkflowState,
        requirements: &Requirements,
        event: WorkflowEvent,
    ) -> Result<WorkflowState, WorkflowError> {
        transition(state, requirements, &TransitionRules::default(), &event)
    }

    fn at_proof(requirements: &Requirements) -> WorkflowState {
        let state =
            apply(&WorkflowState::new(), requirements, WorkflowEvent::DeliveryStarted).unwrap();
        if requirements.requires_otp {
            apply(
                &state,
                requirements,
                WorkflowEvent::OtpVerified {
                    code: "123456".to_string(),
                },
            )
            .unwrap()
        } else {
            state
        }
    }

    #[test]
    fn test_details_skips_otp_when_not_required() {
        let state = apply(
            &WorkflowState::new(),
            &Requirements::none(),
            WorkflowEvent::DeliveryStarted,
        )
        .unwrap();
        assert_eq!(state.step(), Step::Proof);

        let state = apply(
            &WorkflowState::new(),
            &Requirements::none().with_otp(),
            WorkflowEvent::DeliveryStarted,
        )
        .unwrap();
        assert_eq!(state.step(), Step::Otp);
    }

    #[test]
    fn test_transition_does_not_mutate_input() {
        let original = WorkflowState::new();
        let _ = apply(&original, &Requirements::none(), WorkflowEvent::DeliveryStarted).unwrap();
        assert_eq!(original.step(), Step::Details);
    }

    #[test]
    fn test_verified_code_is_kept_in_buffer() {
        let requirements = Requirements::none().with_otp();
        let state = at_proof(&requirements);
        assert_eq!(state.proof().otp.code(), "123456");
    }

    #[test]
    fn test_photo_required_blocks_confirm() {
        let requirements = Requirements::none().with_photo();
        let state = at_proof(&requirements);

        let err = apply(&state, &requirements, WorkflowEvent::ConfirmProof).unwrap_err();
        assert_eq!(err, WorkflowError::ProofIncomplete(MissingProof::Photo));

        let state = apply(
            &state,
            &requirements,
            WorkflowEvent::PhotoSelected(PhotoRef::new("content://42")),
        )
        .unwrap();
        let state = apply(&state, &requirements, WorkflowEvent::ConfirmProof).unwrap();
        assert_eq!(state.step(), Step::Confirm);
    }

    #[test]
    fn test_failure_branch_needs_reason_not_proof() {
        let requirements = Requirements::none().with_photo().with_signature();
        let state = at_proof(&requirements);
        let state = apply(&state, &requirements, WorkflowEvent::MarkFailedToggled(true)).unwrap();

        let err = apply(&state, &requirements, WorkflowEvent::ConfirmProof).unwrap_err();
        assert_eq!(err, WorkflowError::ProofIncomplete(MissingProof::FailureReason));

        let state = apply(
            &state,
            &requirements,
            WorkflowEvent::FailureReasonSelected(Some(FailureReason::AddressNotFound)),
        )
        .unwrap();
        let state = apply(&state, &requirements, WorkflowEvent::ConfirmProof).unwrap();
        assert_eq!(state.step(), Step::Confirm);
    }

    #[test]
    fn test_reschedule_date_gate_placement_follows_rules() {
        let requirements = Requirements::none();
        let state = at_proof(&requirements);
        let state = apply(&state, &requirements, WorkflowEvent::MarkFailedToggled(true)).unwrap();
        let state = apply(
            &state,
            &requirements,
            WorkflowEvent::FailureActionSelected(FailureAction::Reschedule),
        )
        .unwrap();
        let state = apply(
            &state,
            &requirements,
            WorkflowEvent::FailureReasonSelected(Some(FailureReason::CustomerAbsent)),
        )
        .unwrap();

        let err = apply(&state, &requirements, WorkflowEvent::ConfirmProof).unwrap_err();
        assert_eq!(err, WorkflowError::MissingRescheduleDate);

        let lenient = TransitionRules {
            require_reschedule_date_at_confirm: false,
        };
        let confirmed =
            transition(&state, &requirements, &lenient, &WorkflowEvent::ConfirmProof).unwrap();
        assert_eq!(confirmed.step(), Step::Confirm);
        assert_eq!(
            confirmed.completion_gate(&requirements).unwrap_err(),
            WorkflowError::MissingRescheduleDate
        );
    }

    #[test]
    fn test_back_navigation() {
        let with_otp = Requirements::none().with_otp();
        let state = at_proof(&with_otp);
        assert_eq!(apply(&state, &with_otp, WorkflowEvent::Back).unwrap().step(), Step::Otp);

        let without = Requirements::none();
        let state = at_proof(&without);
        assert_eq!(apply(&state, &without, WorkflowEvent::Back).unwrap().step(), Step::Details);

        let confirm = apply(&state, &without, WorkflowEvent::ConfirmProof).unwrap();
        assert_eq!(apply(&confirm, &without, WorkflowEvent::Back).unwrap().step(), Step::Proof);

        let err = apply(&WorkflowState::new(), &without, WorkflowEvent::Back).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidOperation { step: Step::Details, .. }));
    }

    #[test]
    fn test_back_from_otp_returns_to_details() {
        let requirements = Requirements::none().with_otp();
        let state =
            apply(&WorkflowState::new(), &requirements, WorkflowEvent::DeliveryStarted).unwrap();
        let state = apply(
            &state,
            &requirements,
            WorkflowEvent::OtpDigitEntered {
                index: 0,
                value: "4".into(),
            },
        )
        .unwrap()
        .with_error(&WorkflowError::OtpInvalid);

        let back = apply(&state, &requirements, WorkflowEvent::Back).unwrap();
        assert_eq!(back.step(), Step::Details);
        assert_eq!(back.error(), None);
        assert_eq!(back.proof().otp.error(), None);
        assert_eq!(back.proof().otp.cell(0), Some('4'));
    }

    #[test]
    fn test_done_accepts_nothing() {
        let requirements = Requirements::none();
        let state = at_proof(&requirements);
        let state = apply(&state, &requirements, WorkflowEvent::ConfirmProof).unwrap();
        let done = apply(&state, &requirements, WorkflowEvent::Completed).unwrap();
        assert_eq!(done.step(), Step::Done);

        for event in [
            WorkflowEvent::Back,
            WorkflowEvent::ConfirmProof,
            WorkflowEvent::Completed,
            WorkflowEvent::NoteChanged("late".into()),
        ] {
            assert!(apply(&done, &requirements, event).is_err());
        }
    }

    #[test]
    fn test_proof_fields_only_editable_in_proof() {
        let requirements = Requirements::none();
        let err = apply(
            &WorkflowState::new(),
            &requirements,
            WorkflowEvent::SignatureChanged("Jane".into()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidOperation {
                operation: "set_signature",
                ..
            }
        ));

        let state = apply(
            &WorkflowState::new(),
            &requirements,
            WorkflowEvent::NoteChanged("gate code 12".into()),
        )
        .unwrap();
        assert_eq!(state.proof().note(), "gate code 12");
    }

    #[test]
    fn test_errors_surface_on_otp_cells_in_otp_step() {
        let requirements = Requirements::none().with_otp();
        let state =
            apply(&WorkflowState::new(), &requirements, WorkflowEvent::DeliveryStarted).unwrap();
        let state = state.with_error(&WorkflowError::OtpInvalid);
        assert_eq!(state.proof().otp.error(), Some("Invalid OTP code"));
        assert_eq!(state.error(), None);

        let state = WorkflowState::new().with_error(&WorkflowError::OtpFormat);
        assert_eq!(state.error(), Some("Enter the 6-digit code"));
    }
}
