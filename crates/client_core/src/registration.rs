use std::sync::{Arc, Weak};

use serde_json::{Map, Value};
use shared::{
    domain::{DoctorId, RegistrationStep, TokenNumber},
    protocol::{
        AgentReply, AgentState, DoctorOption, QueueInfo, RegistrationMessageResponse,
        ResponseOutcome,
    },
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    navigation::{HandoffBundle, Route},
    scheduling::{RequestSequencer, RequestTicket, ScheduledTask},
    today, HospitalApiError, RegistrationApi, Timings,
};

pub const GENERIC_REGISTRATION_ERROR: &str = "An error occurred. Please try again.";

#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    Phone(String),
    PatientDetails { full_name: String, age: u32 },
    Symptoms(String),
    ConfirmDepartment,
    OverrideDepartment(String),
    SelectDoctor(DoctorId),
    Empty,
}

impl StepInput {
    pub fn phone_number(&self) -> Option<&str> {
        match self {
            StepInput::Phone(phone) => Some(phone.as_str()),
            _ => None,
        }
    }

    /// The `input` object the registration agent expects for this step.
    pub fn into_payload(self) -> Map<String, Value> {
        let mut payload = Map::new();
        match self {
            StepInput::Phone(phone) => {
                payload.insert("phone_number".into(), Value::String(phone));
            }
            StepInput::PatientDetails { full_name, age } => {
                payload.insert("full_name".into(), Value::String(full_name));
                payload.insert("age".into(), Value::from(age));
            }
            StepInput::Symptoms(symptoms) => {
                payload.insert("symptoms".into(), Value::String(symptoms));
            }
            StepInput::ConfirmDepartment => {
                payload.insert("confirm".into(), Value::Bool(true));
            }
            StepInput::OverrideDepartment(department) => {
                payload.insert("department_override".into(), Value::String(department));
            }
            StepInput::SelectDoctor(doctor_id) => {
                payload.insert("doctor_id".into(), Value::String(doctor_id.to_string()));
            }
            StepInput::Empty => {}
        }
        payload
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffPhase {
    Animating,
    TokenRevealed,
}

/// Render model of one registration step. Each variant carries only what that step shows.
#[derive(Debug, Clone, PartialEq)]
pub enum StepView {
    Phone,
    PatientDetails,
    Symptoms {
        patient_name: Option<String>,
    },
    Department {
        suggested: Option<String>,
        confidence: Option<f64>,
        reasoning: Vec<String>,
        departments: Vec<String>,
    },
    Doctor {
        doctors: Vec<DoctorOption>,
    },
    CreatingVisit,
    Handoff {
        phase: HandoffPhase,
        token_number: Option<TokenNumber>,
        patient_name: Option<String>,
        department: Option<String>,
    },
    Unknown {
        step: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationSession {
    pub session_id: Option<String>,
    pub current_step: RegistrationStep,
    pub agent_state: AgentState,
    pub response_data: AgentReply,
    pub queue_info: Option<QueueInfo>,
}

impl RegistrationSession {
    pub fn apply(&mut self, response: RegistrationMessageResponse) -> ResponseOutcome {
        if let Some(session_id) = response.session_id {
            self.session_id = Some(session_id);
        }
        if let Some(state) = response.state {
            if let Some(step) = state.step.clone() {
                self.current_step = step;
            }
            self.agent_state = state;
        }
        match response.response {
            Some(reply) => {
                self.queue_info = queue_info_from(&reply);
                let outcome = reply.classify();
                self.response_data = reply;
                outcome
            }
            None => ResponseOutcome::Ok,
        }
    }

    pub fn token_number(&self) -> Option<TokenNumber> {
        self.queue_info.as_ref().and_then(|info| info.token_number)
    }

    pub fn is_ready_for_handoff(&self) -> bool {
        self.current_step == RegistrationStep::HandoffComplete && self.token_number().is_some()
    }

    pub fn handoff_bundle(&self, queue_date: chrono::NaiveDate) -> HandoffBundle {
        let state = &self.agent_state;
        HandoffBundle {
            token_number: self.token_number(),
            visit_id: state.visit_id,
            doctor_id: state.doctor_id,
            queue_date: Some(queue_date),
            patient_name: state.full_name.clone(),
            department: state.department_final.clone(),
            phone_number: state.phone_number.clone(),
            doctor_name: state.doctor_name.clone(),
        }
    }

    pub fn view(&self, phase: HandoffPhase) -> StepView {
        let reply = &self.response_data;
        match &self.current_step {
            RegistrationStep::CollectPhone | RegistrationStep::PatientLookup => StepView::Phone,
            RegistrationStep::CollectPatientDetails => StepView::PatientDetails,
            RegistrationStep::CollectSymptoms => StepView::Symptoms {
                patient_name: self.agent_state.full_name.clone(),
            },
            RegistrationStep::ResolveDepartment => StepView::Department {
                suggested: reply.suggested_department.clone(),
                confidence: reply.confidence,
                reasoning: reply.reasoning.clone(),
                departments: reply.departments.clone(),
            },
            RegistrationStep::SelectDoctor => StepView::Doctor {
                doctors: reply.doctors.clone(),
            },
            RegistrationStep::CreateVisit => StepView::CreatingVisit,
            RegistrationStep::HandoffComplete => StepView::Handoff {
                phase,
                token_number: self.token_number(),
                patient_name: self.agent_state.full_name.clone(),
                department: self.agent_state.department_final.clone(),
            },
            RegistrationStep::Unknown(step) => StepView::Unknown { step: step.clone() },
        }
    }
}

// A flat `token_number` is only read when the reply has no `queue_status` at all.
fn queue_info_from(reply: &AgentReply) -> Option<QueueInfo> {
    match &reply.queue_status {
        Some(status) => Some(status.clone()),
        None => reply.token_number.map(|token_number| QueueInfo {
            token_number: Some(token_number),
            ..QueueInfo::default()
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationEvent {
    LoadingChanged(bool),
    StepChanged(StepView),
    HandoffPhaseChanged(HandoffPhase),
    Error(String),
    Navigate(Route),
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("a registration request is already in flight")]
    Busy,
    #[error("a phone number is required to start registration")]
    MissingPhoneNumber,
    #[error("{0}")]
    Rejected(String),
    #[error("{message}")]
    Service {
        message: String,
        #[source]
        source: HospitalApiError,
    },
    #[error("response was superseded by a newer request")]
    Superseded,
}

struct FlowState {
    session: RegistrationSession,
    in_flight: Option<RequestTicket>,
    error: Option<String>,
    handoff_phase: HandoffPhase,
    handoff_timers: Vec<ScheduledTask>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            session: RegistrationSession::default(),
            in_flight: None,
            error: None,
            handoff_phase: HandoffPhase::TokenRevealed,
            handoff_timers: Vec::new(),
        }
    }
}

pub struct RegistrationFlow {
    api: Arc<dyn RegistrationApi>,
    timings: Timings,
    sequencer: RequestSequencer,
    inner: Mutex<FlowState>,
    events: broadcast::Sender<RegistrationEvent>,
}

impl RegistrationFlow {
    pub fn new(api: Arc<dyn RegistrationApi>, timings: Timings) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            api,
            timings,
            sequencer: RequestSequencer::new(),
            inner: Mutex::new(FlowState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.events.subscribe()
    }

    /// Sends the patient's input to the agent. The first submission starts the session
    /// and must carry a phone number.
    pub async fn submit(self: &Arc<Self>, input: StepInput) -> Result<StepView, RegistrationError> {
        let (ticket, session_id) = {
            let mut state = self.inner.lock().await;
            if state.in_flight.is_some() {
                return Err(RegistrationError::Busy);
            }
            let session_id = state.session.session_id.clone();
            if session_id.is_none() && input.phone_number().is_none() {
                return Err(RegistrationError::MissingPhoneNumber);
            }
            state.error = None;
            let ticket = self.sequencer.issue();
            state.in_flight = Some(ticket);
            (ticket, session_id)
        };
        let _ = self.events.send(RegistrationEvent::LoadingChanged(true));

        let result = match session_id {
            None => {
                let phone_number = input.phone_number().unwrap_or_default().to_string();
                info!("registration: starting session");
                self.api.start_registration(&phone_number).await
            }
            Some(session_id) => {
                debug!(session_id = %session_id, "registration: continuing session");
                self.api
                    .continue_registration(&session_id, input.into_payload())
                    .await
            }
        };

        let mut state = self.inner.lock().await;
        if state.in_flight == Some(ticket) {
            state.in_flight = None;
            let _ = self.events.send(RegistrationEvent::LoadingChanged(false));
        }
        if !self.sequencer.accept(ticket) {
            debug!(
                sequence = ticket.sequence(),
                "registration: dropping stale response"
            );
            return Err(RegistrationError::Superseded);
        }

        let response = match result {
            Ok(response) => response,
            Err(source) => {
                let message = source.user_message(GENERIC_REGISTRATION_ERROR);
                warn!("registration: request failed: {source}");
                state.error = Some(message.clone());
                let _ = self.events.send(RegistrationEvent::Error(message.clone()));
                return Err(RegistrationError::Service { message, source });
            }
        };

        let outcome = state.session.apply(response);
        self.sync_handoff(&mut state);
        let view = state.session.view(state.handoff_phase);
        let _ = self.events.send(RegistrationEvent::StepChanged(view.clone()));

        match outcome {
            ResponseOutcome::Ok => Ok(view),
            ResponseOutcome::ValidationError | ResponseOutcome::ServerError => {
                let message = state
                    .session
                    .response_data
                    .message
                    .clone()
                    .unwrap_or_else(|| GENERIC_REGISTRATION_ERROR.to_string());
                info!(step = %state.session.current_step, "registration: input rejected");
                state.error = Some(message.clone());
                let _ = self.events.send(RegistrationEvent::Error(message.clone()));
                Err(RegistrationError::Rejected(message))
            }
        }
    }

    /// Starts the handoff timers on entering a ready handoff and cancels them on leaving it.
    fn sync_handoff(self: &Arc<Self>, state: &mut FlowState) {
        if !state.session.is_ready_for_handoff() {
            if !state.handoff_timers.is_empty() {
                debug!("registration: handoff cancelled");
                state.handoff_timers.clear();
            }
            state.handoff_phase = HandoffPhase::TokenRevealed;
            return;
        }
        if !state.handoff_timers.is_empty() {
            return;
        }

        state.handoff_phase = HandoffPhase::Animating;
        let _ = self
            .events
            .send(RegistrationEvent::HandoffPhaseChanged(HandoffPhase::Animating));

        let flow = Arc::downgrade(self);
        let animation = ScheduledTask::after(self.timings.handoff_animation, {
            let flow = Weak::clone(&flow);
            async move {
                if let Some(flow) = flow.upgrade() {
                    flow.reveal_token().await;
                }
            }
        });
        let navigation = ScheduledTask::after(self.timings.handoff_navigation, async move {
            if let Some(flow) = flow.upgrade() {
                flow.hand_off().await;
            }
        });
        state.handoff_timers = vec![animation, navigation];
    }

    async fn reveal_token(&self) {
        let mut state = self.inner.lock().await;
        if !state.session.is_ready_for_handoff() || state.handoff_phase != HandoffPhase::Animating
        {
            return;
        }
        state.handoff_phase = HandoffPhase::TokenRevealed;
        let _ = self.events.send(RegistrationEvent::HandoffPhaseChanged(
            HandoffPhase::TokenRevealed,
        ));
        let _ = self.events.send(RegistrationEvent::StepChanged(
            state.session.view(HandoffPhase::TokenRevealed),
        ));
    }

    async fn hand_off(&self) {
        let state = self.inner.lock().await;
        if !state.session.is_ready_for_handoff() {
            return;
        }
        let bundle = state.session.handoff_bundle(today());
        info!(
            token_number = ?bundle.token_number,
            visit_id = ?bundle.visit_id,
            "registration: handing off to queue tracker"
        );
        let _ = self
            .events
            .send(RegistrationEvent::Navigate(Route::QueueTracker(bundle)));
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        self.sequencer.invalidate();
        *state = FlowState::default();
        let _ = self.events.send(RegistrationEvent::LoadingChanged(false));
        let _ = self.events.send(RegistrationEvent::StepChanged(
            state.session.view(state.handoff_phase),
        ));
    }

    /// Cancels pending timers and discards responses still in flight.
    pub async fn teardown(&self) {
        let mut state = self.inner.lock().await;
        self.sequencer.invalidate();
        state.in_flight = None;
        state.handoff_timers.clear();
    }

    pub async fn session(&self) -> RegistrationSession {
        self.inner.lock().await.session.clone()
    }

    pub async fn current_view(&self) -> StepView {
        let state = self.inner.lock().await;
        state.session.view(state.handoff_phase)
    }

    pub async fn current_step(&self) -> RegistrationStep {
        self.inner.lock().await.session.current_step.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.inner.lock().await.error.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.lock().await.in_flight.is_some()
    }
}

#[cfg(test)]
#[path = "tests/registration_tests.rs"]
mod tests;
