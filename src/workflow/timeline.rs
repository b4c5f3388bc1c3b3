// Display-only projections of the workflow state

use serde::Serialize;

use super::state::{Step, WorkflowState};
use crate::delivery::Requirements;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Milestone {
    pub label: &'static str,
    pub achieved: bool,
}

impl Milestone {
    fn achieved(label: &'static str) -> Self {
        Self { label, achieved: true }
    }
}

/// Ordered milestones reached so far. Pure; recompute after every change.
pub fn project(state: &WorkflowState, requirements: &Requirements) -> Vec<Milestone> {
    let step = state.step();
    let mut items = vec![Milestone::achieved("Delivery opened")];

    if step.is_past(Step::Details) {
        items.push(Milestone::achieved("Contact customer"));
    }
    if requirements.requires_otp && step.is_past(Step::Otp) {
        items.push(Milestone::achieved("OTP verified"));
    }
    if requirements.requires_photo && state.proof().has_photo() {
        items.push(Milestone::achieved("Photo captured"));
    }
    if requirements.requires_signature && state.proof().has_signature() {
        items.push(Milestone::achieved("Signature captured"));
    }
    if step == Step::Done {
        // A failed attempt is shown as an unachieved final milestone
        items.push(if state.mark_failed() {
            Milestone {
                label: "Delivery marked failed",
                achieved: false,
            }
        } else {
            Milestone::achieved("Delivery completed")
        });
    }

    items
}

/// Steps shown in the progress indicator; OTP only when it applies
pub fn visible_steps(requirements: &Requirements) -> Vec<Step> {
    [Step::Details, Step::Otp, Step::Proof, Step::Confirm, Step::Done]
        .into_iter()
        .filter(|step| *step != Step::Otp || requirements.requires_otp)
        .collect()
}

/// 1-based position of `step` in the progress indicator
pub fn step_position(step: Step, requirements: &Requirements) -> Option<usize> {
    visible_steps(requirements)
        .iter()
        .position(|s| *s == step)
        .map(|i| i + 1)
}
