// Failure-path selection: what happens to the parcel and why

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::proof::MissingProof;

/// How an unsuccessful attempt is resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureAction {
    #[default]
    Failed,
    Reschedule,
    ReturnToSender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    CustomerAbsent,
    AddressNotFound,
    CustomerRefused,
    PackageDamaged,
    Other,
}

impl FailureReason {
    pub const ALL: [FailureReason; 5] = [
        FailureReason::CustomerAbsent,
        FailureReason::AddressNotFound,
        FailureReason::CustomerRefused,
        FailureReason::PackageDamaged,
        FailureReason::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::CustomerAbsent => "CUSTOMER_ABSENT",
            FailureReason::AddressNotFound => "ADDRESS_NOT_FOUND",
            FailureReason::CustomerRefused => "CUSTOMER_REFUSED",
            FailureReason::PackageDamaged => "PACKAGE_DAMAGED",
            FailureReason::Other => "OTHER",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted reschedule date input, as produced by a date picker
pub const RESCHEDULE_DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_reschedule_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), RESCHEDULE_DATE_FORMAT).ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureHandler {
    pub mark_failed: bool,
    pub action: FailureAction,
    pub reason: Option<FailureReason>,
    pub reschedule_date: Option<NaiveDate>,
}

impl FailureHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reason is the only field needed to leave the proof step
    pub fn missing_reason(&self) -> Option<MissingProof> {
        match self.reason {
            Some(_) => None,
            None => Some(MissingProof::FailureReason),
        }
    }

    /// Only a reschedule needs a date
    pub fn needs_reschedule_date(&self) -> bool {
        self.action == FailureAction::Reschedule && self.reschedule_date.is_none()
    }
}
