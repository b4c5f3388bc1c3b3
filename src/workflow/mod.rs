// Delivery-completion workflow: state, gates, controller and projections

pub mod controller;
pub mod errors;
pub mod result;
pub mod state;
pub mod timeline;

pub use controller::{
    ChannelListener, NoopListener, SessionEvent, TransitionOutcome, TransitionRecord,
    WorkflowController, WorkflowListener, WorkflowSettings, WorkflowSnapshot,
};
pub use errors::{ErrorKind, WorkflowError};
pub use result::DeliveryResult;
pub use state::{transition, Step, TransitionRules, WorkflowEvent, WorkflowState};
pub use timeline::{project, step_position, visible_steps, Milestone};
