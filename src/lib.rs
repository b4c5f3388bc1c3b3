// Courier Workflow Library - delivery completion for the parcel courier client
// This exposes the workflow, its collaborators and the scenario runner

pub mod config;
pub mod delivery;
pub mod failure;
pub mod gateway;
pub mod gps;
pub mod proof;
pub mod simulation;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use crate::config::{config, init_config, WorkflowConfig};
pub use delivery::{DeliveryRecord, PackageDetails, Requirements};
pub use failure::{FailureAction, FailureHandler, FailureReason};
pub use gateway::{
    ActionGateway, GatewayError, GatewayOperation, IdempotencyKey, ScriptedGateway,
};
pub use gps::{DeviceGps, FixedLocation, GpsError, GpsFix, GpsProvider, LocationRequest};
pub use proof::{MissingProof, OtpBuffer, PhotoRef, ProofCapture};
pub use simulation::{run_scenario, Scenario, ScenarioError, ScenarioReport};
pub use telemetry::{create_workflow_span, init_telemetry};
pub use workflow::{
    DeliveryResult, ErrorKind, Milestone, Step, TransitionOutcome, WorkflowController,
    WorkflowError, WorkflowListener, WorkflowSettings, WorkflowState,
};
