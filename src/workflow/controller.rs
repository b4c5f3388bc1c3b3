// Delivery workflow controller
//
// Sequences location capture and remote calls around the pure transition
// function in `state`. One controller drives one open delivery at a time.
// The session lock is never held across an await: every async operation
// takes a ticket when it begins and settles it when its chain resolves,
// and a ticket whose generation no longer matches is discarded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::errors::WorkflowError;
use super::result::DeliveryResult;
use super::state::{transition, Step, TransitionRules, WorkflowEvent, WorkflowState};
use super::timeline::{project, step_position, visible_steps, Milestone};
use crate::delivery::{DeliveryRecord, Requirements};
use crate::failure::{parse_reschedule_date, FailureAction, FailureReason};
use crate::gateway::{
    ActionGateway, CompleteDeliveryRequest, GatewayOperation, IdempotencyKey, MarkFailedRequest,
    RescheduleRequest, ReturnToSenderRequest, SendOtpRequest, StartDeliveryRequest,
    VerifyOtpRequest,
};
use crate::gps::{GpsFix, GpsProvider, LocationRequest};
use crate::proof::{is_valid_otp_code, MissingProof, PhotoRef};

/// Controller behaviour derived from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkflowSettings {
    pub location: LocationRequest,
    pub rules: TransitionRules,
}

/// Receives the session's terminal notifications
pub trait WorkflowListener: Send + Sync {
    fn on_complete(&self, result: &DeliveryResult);
    fn on_exit(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl WorkflowListener for NoopListener {
    fn on_complete(&self, _result: &DeliveryResult) {}
    fn on_exit(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Completed(DeliveryResult),
    Exited,
}

/// Forwards notifications to an async consumer
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            debug!("Session event dropped, receiver closed");
        }
    }
}

impl WorkflowListener for ChannelListener {
    fn on_complete(&self, result: &DeliveryResult) {
        self.send(SessionEvent::Completed(result.clone()));
    }

    fn on_exit(&self) {
        self.send(SessionEvent::Exited);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The step changed
    Advanced { from: Step, to: Step },
    /// Accepted without a step change (field edit, OTP resend)
    Updated { step: Step },
    /// Refused; the error has been surfaced on the state when a session is open
    Blocked {
        step: Option<Step>,
        error: WorkflowError,
    },
    /// The response arrived after `back()`/`exit()`/`start()` and was dropped
    Discarded { generation: u64 },
    Exited { step: Step },
}

impl TransitionOutcome {
    pub fn error(&self) -> Option<&WorkflowError> {
        match self {
            TransitionOutcome::Blocked { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_advanced(&self) -> bool {
        matches!(self, TransitionOutcome::Advanced { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub from: Step,
    pub to: Step,
    pub operation: &'static str,
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Serializable view of the open session for the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub parcel_id: String,
    pub tracking_number: String,
    pub requirements: Requirements,
    pub step: Step,
    pub state: WorkflowState,
    pub timeline: Vec<Milestone>,
    pub visible_steps: Vec<Step>,
    pub step_position: Option<usize>,
    pub busy: bool,
    pub generation: u64,
    pub closed: bool,
    pub result: Option<DeliveryResult>,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug)]
struct Session {
    delivery: DeliveryRecord,
    requirements: Requirements,
    state: WorkflowState,
    in_flight: Option<&'static str>,
    idempotency_key: IdempotencyKey,
    history: Vec<TransitionRecord>,
    result: Option<DeliveryResult>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    generation: u64,
    session: Option<Session>,
}

/// Snapshot taken when an async operation begins
struct Ticket {
    operation: &'static str,
    generation: u64,
    started: Instant,
    delivery: DeliveryRecord,
    requirements: Requirements,
    state: WorkflowState,
    key: IdempotencyKey,
}

pub struct WorkflowController {
    inner: Mutex<Inner>,
    gps: Arc<dyn GpsProvider>,
    gateway: Arc<dyn ActionGateway>,
    listener: Arc<dyn WorkflowListener>,
    settings: WorkflowSettings,
}

impl std::fmt::Debug for WorkflowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowController")
            .field("inner", &self.inner)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl WorkflowController {
    pub fn new(gps: Arc<dyn GpsProvider>, gateway: Arc<dyn ActionGateway>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            gps,
            gateway,
            listener: Arc::new(NoopListener),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn WorkflowListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open `delivery` at DETAILS, discarding any previous session and any
    /// response still in flight for it.
    pub fn start(&self, delivery: DeliveryRecord, requirements: Requirements) -> IdempotencyKey {
        let key = IdempotencyKey::generate();
        let mut inner = self.lock();
        inner.generation += 1;
        info!(
            parcel_id = %delivery.id,
            tracking_number = %delivery.tracking_number,
            requires_otp = requirements.requires_otp,
            requires_signature = requirements.requires_signature,
            requires_photo = requirements.requires_photo,
            idempotency_key = %key,
            generation = inner.generation,
            "Delivery workflow opened"
        );
        inner.session = Some(Session {
            delivery,
            requirements,
            state: WorkflowState::new(),
            in_flight: None,
            idempotency_key: key,
            history: Vec::new(),
            result: None,
            closed: false,
        });
        key
    }

    // ----- async transitions -------------------------------------------

    #[instrument(skip_all, name = "advance_from_details")]
    pub async fn advance_from_details(&self) -> TransitionOutcome {
        let ticket = match self.begin("advance_from_details", &[Step::Details]) {
            Ok(ticket) => ticket,
            Err(outcome) => return outcome,
        };

        let fix = match self.locate().await {
            Ok(fix) => fix,
            Err(error) => return self.settle_error(ticket, error),
        };

        let request = StartDeliveryRequest {
            parcel_id: ticket.delivery.id.clone(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            notes: ticket.state.proof().note_for_submission(),
            idempotency_key: ticket.key,
        };
        match self.gateway.start_delivery(&request).await {
            Ok(()) => self.settle(ticket, WorkflowEvent::DeliveryStarted, None),
            Err(e) => self.settle_error(
                ticket,
                WorkflowError::remote(GatewayOperation::StartDelivery, &e),
            ),
        }
    }

    /// Verify `code` with the server. A code that is not exactly six digits
    /// is refused locally and never sent.
    #[instrument(skip_all, name = "submit_otp")]
    pub async fn submit_otp(&self, code: &str) -> TransitionOutcome {
        let ticket = match self.begin("submit_otp", &[Step::Otp]) {
            Ok(ticket) => ticket,
            Err(outcome) => return outcome,
        };
        if !is_valid_otp_code(code) {
            return self.settle_error(ticket, WorkflowError::OtpFormat);
        }

        let fix = match self.locate().await {
            Ok(fix) => fix,
            Err(error) => return self.settle_error(ticket, error),
        };

        let request = VerifyOtpRequest {
            parcel_id: ticket.delivery.id.clone(),
            otp_code: code.to_string(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            notes: ticket.state.proof().note_for_submission(),
            idempotency_key: ticket.key,
        };
        match self.gateway.verify_delivery_otp(&request).await {
            Ok(true) => self.settle(
                ticket,
                WorkflowEvent::OtpVerified {
                    code: code.to_string(),
                },
                None,
            ),
            Ok(false) => self.settle_error(ticket, WorkflowError::OtpInvalid),
            Err(e) => self.settle_error(
                ticket,
                WorkflowError::remote(GatewayOperation::VerifyDeliveryOtp, &e),
            ),
        }
    }

    /// Submit whatever is currently typed into the OTP cells
    pub async fn submit_entered_otp(&self) -> TransitionOutcome {
        let code = self
            .state()
            .map(|state| state.proof().otp.code())
            .unwrap_or_default();
        self.submit_otp(&code).await
    }

    /// Ask the server to send the recipient a new code. Stays in OTP.
    #[instrument(skip_all, name = "resend_otp")]
    pub async fn resend_otp(&self) -> TransitionOutcome {
        let ticket = match self.begin("resend_otp", &[Step::Otp]) {
            Ok(ticket) => ticket,
            Err(outcome) => return outcome,
        };
        let request = SendOtpRequest {
            parcel_id: ticket.delivery.id.clone(),
            phone_number: ticket.delivery.customer_phone.clone(),
            idempotency_key: ticket.key,
        };
        match self.gateway.send_delivery_otp(&request).await {
            Ok(()) => self.release(ticket),
            Err(e) => self.settle_error(
                ticket,
                WorkflowError::remote(GatewayOperation::SendDeliveryOtp, &e),
            ),
        }
    }

    /// Record the attempt remotely and finish the session. The local gate runs
    /// before the location request so an incomplete form never waits on GPS.
    #[instrument(skip_all, name = "complete")]
    pub async fn complete(&self) -> TransitionOutcome {
        let ticket = match self.begin("complete", &[Step::Confirm]) {
            Ok(ticket) => ticket,
            Err(outcome) => return outcome,
        };
        if let Err(error) = ticket.state.completion_gate(&ticket.requirements) {
            return self.settle_error(ticket, error);
        }

        let fix = match self.locate().await {
            Ok(fix) => fix,
            Err(error) => return self.settle_error(ticket, error),
        };

        if ticket.state.mark_failed() {
            self.complete_failure(ticket, fix).await
        } else {
            self.complete_delivered(ticket, fix).await
        }
    }

    async fn complete_delivered(&self, ticket: Ticket, fix: GpsFix) -> TransitionOutcome {
        let proof = ticket.state.proof();
        let otp = ticket
            .requirements
            .requires_otp
            .then(|| proof.otp.code());
        let signature = proof.signature_for_submission();
        let note = proof.note_for_submission();

        let request = CompleteDeliveryRequest {
            parcel_id: ticket.delivery.id.clone(),
            otp_code: otp.clone(),
            receiver_name: signature.clone(),
            photo: proof.photo.clone(),
            notes: note.clone(),
            proof_type: proof.proof_type(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            idempotency_key: ticket.key,
        };
        let result = DeliveryResult::Delivered {
            otp,
            signature,
            photo: proof.photo.clone(),
            note,
        };

        match self.gateway.complete_delivery(&request).await {
            Ok(()) => self.settle(ticket, WorkflowEvent::Completed, Some(result)),
            Err(e) => self.settle_error(
                ticket,
                WorkflowError::remote(GatewayOperation::CompleteDelivery, &e),
            ),
        }
    }

    async fn complete_failure(&self, ticket: Ticket, fix: GpsFix) -> TransitionOutcome {
        let failure = ticket.state.failure().clone();
        let Some(reason) = failure.reason else {
            return self.settle_error(
                ticket,
                WorkflowError::ProofIncomplete(MissingProof::FailureReason),
            );
        };
        let note = ticket.state.proof().note_for_submission();
        let parcel_id = ticket.delivery.id.clone();

        let (operation, outcome) = match failure.action {
            FailureAction::Failed => {
                let request = MarkFailedRequest {
                    parcel_id,
                    reason,
                    latitude: fix.latitude,
                    longitude: fix.longitude,
                    notes: note.clone(),
                    idempotency_key: ticket.key,
                };
                (
                    GatewayOperation::MarkDeliveryFailed,
                    self.gateway.mark_delivery_failed(&request).await,
                )
            }
            FailureAction::Reschedule => {
                let Some(new_date) = failure.reschedule_date else {
                    return self.settle_error(ticket, WorkflowError::MissingRescheduleDate);
                };
                let request = RescheduleRequest {
                    new_date,
                    reason,
                    delivery_notes: note.clone(),
                    latitude: fix.latitude,
                    longitude: fix.longitude,
                    idempotency_key: ticket.key,
                };
                (
                    GatewayOperation::RescheduleDelivery,
                    self.gateway.reschedule_delivery(&parcel_id, &request).await,
                )
            }
            FailureAction::ReturnToSender => {
                let request = ReturnToSenderRequest {
                    reason,
                    notes: note.clone(),
                    latitude: fix.latitude,
                    longitude: fix.longitude,
                    idempotency_key: ticket.key,
                };
                (
                    GatewayOperation::ReturnToSender,
                    self.gateway.return_to_sender(&parcel_id, &request).await,
                )
            }
        };

        match outcome {
            Ok(()) => {
                info!(
                    parcel_id = %ticket.delivery.id,
                    operation = %operation,
                    reason = %reason,
                    "Delivery attempt recorded as failed"
                );
                let result = DeliveryResult::Failed { reason, note };
                self.settle(ticket, WorkflowEvent::Completed, Some(result))
            }
            Err(e) => self.settle_error(ticket, WorkflowError::remote(operation, &e)),
        }
    }

    // ----- local transitions and edits -----------------------------------

    pub fn confirm_proof(&self) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::ConfirmProof)
    }

    /// Step back. Any response still in flight is abandoned.
    pub fn back(&self) -> TransitionOutcome {
        let mut inner = self.lock();
        let generation = inner.generation;
        let rules = self.settings.rules;
        let Some(session) = open_session(&mut inner) else {
            return blocked_without_session(&missing_session_error(&inner));
        };
        let from = session.state.step();
        match transition(&session.state, &session.requirements, &rules, &WorkflowEvent::Back) {
            Ok(next) => {
                if let Some(operation) = session.in_flight.take() {
                    info!(operation, "Abandoning in-flight operation");
                }
                session.state = next;
                let to = session.state.step();
                let new_generation = generation + 1;
                record(session, from, to, "back", new_generation, Instant::now());
                inner.generation = new_generation;
                TransitionOutcome::Advanced { from, to }
            }
            Err(error) => {
                session.state = session.state.with_error(&error);
                TransitionOutcome::Blocked {
                    step: Some(from),
                    error,
                }
            }
        }
    }

    /// Leave the session from any step, including DONE
    pub fn exit(&self) -> TransitionOutcome {
        let outcome = {
            let mut inner = self.lock();
            inner.generation += 1;
            let generation = inner.generation;
            match inner.session.as_mut() {
                None => {
                    return TransitionOutcome::Blocked {
                        step: None,
                        error: WorkflowError::NotStarted,
                    }
                }
                Some(session) if session.closed => {
                    return TransitionOutcome::Blocked {
                        step: Some(session.state.step()),
                        error: WorkflowError::SessionClosed,
                    }
                }
                Some(session) => {
                    session.closed = true;
                    session.in_flight = None;
                    let step = session.state.step();
                    info!(
                        parcel_id = %session.delivery.id,
                        step = %step,
                        generation,
                        "Delivery workflow exited"
                    );
                    TransitionOutcome::Exited { step }
                }
            }
        };
        self.listener.on_exit();
        outcome
    }

    pub fn enter_otp_digit(&self, index: usize, value: &str) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::OtpDigitEntered {
            index,
            value: value.to_string(),
        })
    }

    pub fn otp_backspace(&self, index: usize) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::OtpBackspace { index })
    }

    pub fn set_signature(&self, text: &str) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::SignatureChanged(text.to_string()))
    }

    pub fn select_photo(&self, photo: PhotoRef) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::PhotoSelected(photo))
    }

    pub fn clear_photo(&self) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::PhotoCleared)
    }

    pub fn set_note(&self, text: &str) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::NoteChanged(text.to_string()))
    }

    pub fn toggle_mark_failed(&self, on: bool) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::MarkFailedToggled(on))
    }

    pub fn select_failure_action(&self, action: FailureAction) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::FailureActionSelected(action))
    }

    pub fn set_failure_reason(&self, reason: Option<FailureReason>) -> TransitionOutcome {
        self.apply_local(WorkflowEvent::FailureReasonSelected(reason))
    }

    /// Accepts `YYYY-MM-DD`; an empty input clears the date
    pub fn set_reschedule_date(&self, input: &str) -> TransitionOutcome {
        if input.trim().is_empty() {
            return self.apply_local(WorkflowEvent::RescheduleDateSet(None));
        }
        match parse_reschedule_date(input) {
            Some(date) => self.apply_local(WorkflowEvent::RescheduleDateSet(Some(date))),
            None => self.surface(WorkflowError::InvalidRescheduleDate {
                input: input.to_string(),
            }),
        }
    }

    // ----- inspection -----------------------------------------------------

    pub fn step(&self) -> Option<Step> {
        self.lock().session.as_ref().map(|s| s.state.step())
    }

    pub fn state(&self) -> Option<WorkflowState> {
        self.lock().session.as_ref().map(|s| s.state.clone())
    }

    pub fn result(&self) -> Option<DeliveryResult> {
        self.lock().session.as_ref().and_then(|s| s.result.clone())
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.lock()
            .session
            .as_ref()
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    pub fn timeline(&self) -> Vec<Milestone> {
        self.lock()
            .session
            .as_ref()
            .map(|s| project(&s.state, &s.requirements))
            .unwrap_or_default()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_busy(&self) -> bool {
        self.lock()
            .session
            .as_ref()
            .is_some_and(|s| s.in_flight.is_some())
    }

    pub fn snapshot(&self) -> Option<WorkflowSnapshot> {
        let inner = self.lock();
        let session = inner.session.as_ref()?;
        let step = session.state.step();
        Some(WorkflowSnapshot {
            parcel_id: session.delivery.id.clone(),
            tracking_number: session.delivery.tracking_number.clone(),
            requirements: session.requirements,
            step,
            state: session.state.clone(),
            timeline: project(&session.state, &session.requirements),
            visible_steps: visible_steps(&session.requirements),
            step_position: step_position(step, &session.requirements),
            busy: session.in_flight.is_some(),
            generation: inner.generation,
            closed: session.closed,
            result: session.result.clone(),
            idempotency_key: session.idempotency_key,
        })
    }

    // ----- internals ------------------------------------------------------

    async fn locate(&self) -> Result<GpsFix, WorkflowError> {
        self.gps
            .current_position(&self.settings.location)
            .await
            .map_err(WorkflowError::from)
    }

    /// Claim the session for an async operation allowed in `steps`
    fn begin(&self, operation: &'static str, steps: &[Step]) -> Result<Ticket, TransitionOutcome> {
        let mut inner = self.lock();
        let generation = inner.generation;
        let session = match inner.session.as_mut() {
            None => return Err(blocked_without_session(&WorkflowError::NotStarted)),
            Some(session) if session.closed => {
                return Err(blocked_without_session(&WorkflowError::SessionClosed))
            }
            Some(session) => session,
        };

        let step = session.state.step();
        let refusal = if let Some(running) = session.in_flight {
            Some(WorkflowError::Busy { operation: running })
        } else if !steps.contains(&step) {
            Some(WorkflowError::InvalidOperation { operation, step })
        } else {
            None
        };
        if let Some(error) = refusal {
            debug!(operation, step = %step, error = %error, "Operation refused");
            session.state = session.state.with_error(&error);
            return Err(TransitionOutcome::Blocked {
                step: Some(step),
                error,
            });
        }

        session.in_flight = Some(operation);
        debug!(operation, generation, parcel_id = %session.delivery.id, "Operation started");
        Ok(Ticket {
            operation,
            generation,
            started: Instant::now(),
            delivery: session.delivery.clone(),
            requirements: session.requirements,
            state: session.state.clone(),
            key: session.idempotency_key,
        })
    }

    /// Apply the event that follows a successful remote chain
    fn settle(
        &self,
        ticket: Ticket,
        event: WorkflowEvent,
        result: Option<DeliveryResult>,
    ) -> TransitionOutcome {
        let rules = self.settings.rules;
        let outcome = {
            let mut inner = self.lock();
            let generation = inner.generation;
            let Some(session) = current_session(&mut inner, &ticket) else {
                warn!(
                    operation = ticket.operation,
                    ticket_generation = ticket.generation,
                    generation,
                    idempotency_key = %ticket.key,
                    "Discarding stale successful response"
                );
                return TransitionOutcome::Discarded {
                    generation: ticket.generation,
                };
            };
            session.in_flight = None;

            let from = session.state.step();
            match transition(&session.state, &session.requirements, &rules, &event) {
                Ok(next) => {
                    session.state = next;
                    let to = session.state.step();
                    record(session, from, to, ticket.operation, generation, ticket.started);
                    if result.is_some() {
                        session.result = result.clone();
                    }
                    TransitionOutcome::Advanced { from, to }
                }
                Err(error) => {
                    warn!(
                        operation = ticket.operation,
                        error = %error,
                        "Transition refused after remote success"
                    );
                    session.state = session.state.with_error(&error);
                    return TransitionOutcome::Blocked {
                        step: Some(from),
                        error,
                    };
                }
            }
        };

        if let Some(result) = result.as_ref() {
            self.listener.on_complete(result);
        }
        outcome
    }

    /// Finish an operation that does not move the step
    fn release(&self, ticket: Ticket) -> TransitionOutcome {
        let mut inner = self.lock();
        match current_session(&mut inner, &ticket) {
            Some(session) => {
                session.in_flight = None;
                info!(operation = ticket.operation, "Operation completed");
                TransitionOutcome::Updated {
                    step: session.state.step(),
                }
            }
            None => TransitionOutcome::Discarded {
                generation: ticket.generation,
            },
        }
    }

    fn settle_error(&self, ticket: Ticket, error: WorkflowError) -> TransitionOutcome {
        let mut inner = self.lock();
        let Some(session) = current_session(&mut inner, &ticket) else {
            debug!(operation = ticket.operation, error = %error, "Discarding stale failure");
            return TransitionOutcome::Discarded {
                generation: ticket.generation,
            };
        };
        session.in_flight = None;
        warn!(
            parcel_id = %session.delivery.id,
            operation = ticket.operation,
            kind = ?error.kind(),
            error = %error,
            "Workflow operation blocked"
        );
        session.state = session.state.with_error(&error);
        TransitionOutcome::Blocked {
            step: Some(session.state.step()),
            error,
        }
    }

    fn apply_local(&self, event: WorkflowEvent) -> TransitionOutcome {
        let rules = self.settings.rules;
        let mut inner = self.lock();
        let generation = inner.generation;
        let Some(session) = open_session(&mut inner) else {
            return blocked_without_session(&missing_session_error(&inner));
        };

        let from = session.state.step();
        match transition(&session.state, &session.requirements, &rules, &event) {
            Ok(next) => {
                session.state = next;
                let to = session.state.step();
                if from != to {
                    record(session, from, to, event.name(), generation, Instant::now());
                    TransitionOutcome::Advanced { from, to }
                } else {
                    TransitionOutcome::Updated { step: to }
                }
            }
            Err(error) => {
                debug!(operation = event.name(), error = %error, "Local operation refused");
                session.state = session.state.with_error(&error);
                TransitionOutcome::Blocked {
                    step: Some(from),
                    error,
                }
            }
        }
    }

    fn surface(&self, error: WorkflowError) -> TransitionOutcome {
        let mut inner = self.lock();
        match open_session(&mut inner) {
            Some(session) => {
                session.state = session.state.with_error(&error);
                TransitionOutcome::Blocked {
                    step: Some(session.state.step()),
                    error,
                }
            }
            None => TransitionOutcome::Blocked { step: None, error },
        }
    }
}

fn open_session(inner: &mut Inner) -> Option<&mut Session> {
    inner.session.as_mut().filter(|s| !s.closed)
}

/// The session a ticket was issued for, if nothing has superseded it
fn current_session<'a>(inner: &'a mut Inner, ticket: &Ticket) -> Option<&'a mut Session> {
    if inner.generation != ticket.generation {
        return None;
    }
    open_session(inner)
}

fn missing_session_error(inner: &Inner) -> WorkflowError {
    match inner.session {
        Some(_) => WorkflowError::SessionClosed,
        None => WorkflowError::NotStarted,
    }
}

fn blocked_without_session(error: &WorkflowError) -> TransitionOutcome {
    TransitionOutcome::Blocked {
        step: None,
        error: error.clone(),
    }
}

fn record(
    session: &mut Session,
    from: Step,
    to: Step,
    operation: &'static str,
    generation: u64,
    started: Instant,
) {
    let entry = TransitionRecord {
        from,
        to,
        operation,
        generation,
        timestamp: Utc::now(),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        parcel_id = %session.delivery.id,
        from = %entry.from,
        to = %entry.to,
        operation = entry.operation,
        generation = entry.generation,
        duration_ms = entry.duration_ms,
        "Delivery workflow transition"
    );
    session.history.push(entry);
}
