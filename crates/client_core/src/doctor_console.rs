use std::sync::{Arc, Weak};

use chrono::NaiveDate;
use shared::{
    domain::{PatientId, TokenNumber, VisitId},
    protocol::{
        CallNextRequest, CalledPatient, ConsultationRequest, DoctorQueueStats, NextWaiting,
    },
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    navigation::Route,
    scheduling::{RequestSequencer, ScheduledTask},
    session_store::{DoctorIdentity, DoctorSessionStore},
    today, ApiResult, DoctorApi, HospitalApiError, Timings,
};

pub const LOGIN_ERROR: &str = "Login failed. Please try again.";
pub const SKIP_REASON: &str = "Patient not present when called";
const CALL_NEXT_ERROR: &str = "Unable to call the next patient";
const START_CONSULTATION_ERROR: &str = "Unable to start the consultation";
const END_CONSULTATION_ERROR: &str = "Unable to end the consultation";
const SKIP_ERROR: &str = "Unable to skip the patient";

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Please enter your name")]
    BlankName,
    #[error("no doctor is signed in")]
    NotSignedIn,
    #[error("another console action is in progress")]
    Busy,
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error("{message}")]
    Service {
        message: String,
        #[source]
        source: HospitalApiError,
    },
    #[error("doctor session store failed: {0}")]
    SessionStore(String),
}

impl ConsoleError {
    pub fn redirect(&self) -> Option<Route> {
        match self {
            ConsoleError::NotSignedIn => Some(Route::DoctorLogin),
            _ => None,
        }
    }
}

/// Looks the doctor up by name and remembers them for later console sessions.
pub async fn sign_in(
    api: &dyn DoctorApi,
    store: &dyn DoctorSessionStore,
    name: &str,
) -> Result<DoctorIdentity, ConsoleError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ConsoleError::BlankName);
    }

    let profile = api.login(name).await.map_err(|source| ConsoleError::Service {
        message: source.user_message(LOGIN_ERROR),
        source,
    })?;
    let identity = DoctorIdentity::from(profile);
    store
        .save(&identity)
        .await
        .map_err(|err| ConsoleError::SessionStore(format!("{err:#}")))?;

    info!(doctor_id = %identity.doctor_id, name = %identity.name, "doctor: signed in");
    Ok(identity)
}

/// Chip text for one upcoming token, e.g. `#7 present`.
pub fn token_chip(next: &NextWaiting) -> String {
    format!("#{} {}", next.token_number, next.status)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentPatient {
    pub visit_id: VisitId,
    pub patient_id: PatientId,
    pub token_number: TokenNumber,
    pub name: String,
    pub age: Option<u32>,
    pub contact: Option<String>,
    pub symptoms: Option<String>,
}

impl From<CalledPatient> for CurrentPatient {
    fn from(called: CalledPatient) -> Self {
        Self {
            visit_id: called.visit_id,
            patient_id: called.patient_id,
            token_number: called.token_number,
            name: called.patient_name,
            age: called.patient_age,
            contact: called.patient_contact,
            symptoms: called.symptoms_summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleState {
    Initializing,
    CallNext,
    Ready(CurrentPatient),
    Consulting(CurrentPatient),
}

impl ConsoleState {
    pub fn name(&self) -> &'static str {
        match self {
            ConsoleState::Initializing => "initializing",
            ConsoleState::CallNext => "callNext",
            ConsoleState::Ready(_) => "ready",
            ConsoleState::Consulting(_) => "consulting",
        }
    }

    pub fn current_patient(&self) -> Option<&CurrentPatient> {
        match self {
            ConsoleState::Ready(patient) | ConsoleState::Consulting(patient) => Some(patient),
            ConsoleState::Initializing | ConsoleState::CallNext => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    StateChanged(ConsoleState),
    BusyChanged(bool),
    StatsUpdated(DoctorQueueStats),
    Error(String),
    Navigate(Route),
}

struct ConsoleInner {
    state: ConsoleState,
    busy: bool,
    error: Option<String>,
    stats: Option<DoctorQueueStats>,
    stats_poller: Option<ScheduledTask>,
    closed: bool,
}

pub struct DoctorConsole {
    api: Arc<dyn DoctorApi>,
    store: Arc<dyn DoctorSessionStore>,
    identity: DoctorIdentity,
    queue_date: NaiveDate,
    timings: Timings,
    stats_sequencer: RequestSequencer,
    inner: Mutex<ConsoleInner>,
    events: broadcast::Sender<ConsoleEvent>,
}

impl DoctorConsole {
    /// Restores the signed-in doctor and starts the console. Without a stored identity the
    /// caller gets [`ConsoleError::NotSignedIn`] and should route to the login screen.
    pub async fn initialize(
        api: Arc<dyn DoctorApi>,
        store: Arc<dyn DoctorSessionStore>,
        timings: Timings,
    ) -> Result<Arc<Self>, ConsoleError> {
        let identity = store
            .load()
            .await
            .map_err(|err| ConsoleError::SessionStore(format!("{err:#}")))?
            .ok_or(ConsoleError::NotSignedIn)?;
        let console = Self::new(api, store, identity, today(), timings);
        console.start().await;
        Ok(console)
    }

    pub fn new(
        api: Arc<dyn DoctorApi>,
        store: Arc<dyn DoctorSessionStore>,
        identity: DoctorIdentity,
        queue_date: NaiveDate,
        timings: Timings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            api,
            store,
            identity,
            queue_date,
            timings,
            stats_sequencer: RequestSequencer::new(),
            inner: Mutex::new(ConsoleInner {
                state: ConsoleState::Initializing,
                busy: false,
                error: None,
                stats: None,
                stats_poller: None,
                closed: false,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.events.subscribe()
    }

    pub fn identity(&self) -> &DoctorIdentity {
        &self.identity
    }

    pub fn queue_date(&self) -> NaiveDate {
        self.queue_date
    }

    pub async fn start(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed || inner.state != ConsoleState::Initializing {
                return;
            }
            inner.state = ConsoleState::CallNext;
            let _ = self
                .events
                .send(ConsoleEvent::StateChanged(ConsoleState::CallNext));

            let console = Arc::downgrade(self);
            inner.stats_poller = Some(ScheduledTask::every(
                self.timings.doctor_stats_poll,
                move || {
                    let console = Weak::clone(&console);
                    async move {
                        if let Some(console) = console.upgrade() {
                            console.refresh_stats().await;
                        }
                    }
                },
            ));
        }
        info!(doctor_id = %self.identity.doctor_id, "doctor: console started");
        self.refresh_stats().await;
    }

    /// Reads the doctor's queue counts. Failures are logged and otherwise ignored.
    pub async fn refresh_stats(&self) -> Option<DoctorQueueStats> {
        if self.inner.lock().await.closed {
            return None;
        }
        let ticket = self.stats_sequencer.issue();
        let result = self
            .api
            .queue_stats(self.identity.doctor_id, self.queue_date)
            .await;

        let stats = match result {
            Ok(stats) => stats,
            Err(err) => {
                warn!(doctor_id = %self.identity.doctor_id, "doctor: stats refresh failed: {err}");
                return None;
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.closed || !self.stats_sequencer.accept(ticket) {
            debug!(sequence = ticket.sequence(), "doctor: dropping stale stats");
            return None;
        }
        inner.stats = Some(stats.clone());
        let _ = self.events.send(ConsoleEvent::StatsUpdated(stats.clone()));
        Some(stats)
    }

    fn spawn_stats_refresh(self: &Arc<Self>) {
        let console = Arc::clone(self);
        tokio::spawn(async move {
            console.refresh_stats().await;
        });
    }

    async fn begin<T>(
        &self,
        action: &'static str,
        select: impl FnOnce(&ConsoleState) -> Option<T>,
    ) -> Result<T, ConsoleError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(ConsoleError::NotSignedIn);
        }
        if inner.busy {
            return Err(ConsoleError::Busy);
        }
        let selected = select(&inner.state).ok_or(ConsoleError::InvalidTransition {
            action,
            state: inner.state.name(),
        })?;
        inner.busy = true;
        inner.error = None;
        let _ = self.events.send(ConsoleEvent::BusyChanged(true));
        Ok(selected)
    }

    async fn transition(
        &self,
        action: &'static str,
        next: ConsoleState,
    ) -> Result<(), ConsoleError> {
        let mut inner = self.inner.lock().await;
        inner.busy = false;
        let _ = self.events.send(ConsoleEvent::BusyChanged(false));
        if inner.closed {
            return Err(ConsoleError::NotSignedIn);
        }
        debug!(action, from = inner.state.name(), to = next.name(), "doctor: transition");
        inner.state = next.clone();
        let _ = self.events.send(ConsoleEvent::StateChanged(next));
        Ok(())
    }

    /// Releases the busy flag and records the failure; the state is left as it was.
    async fn fail(
        &self,
        action: &'static str,
        source: HospitalApiError,
        fallback: &str,
    ) -> ConsoleError {
        let mut inner = self.inner.lock().await;
        inner.busy = false;
        let _ = self.events.send(ConsoleEvent::BusyChanged(false));
        let message = source.user_message(fallback);
        warn!(action, "doctor: action failed: {source}");
        if !inner.closed {
            inner.error = Some(message.clone());
            let _ = self.events.send(ConsoleEvent::Error(message.clone()));
        }
        ConsoleError::Service { message, source }
    }

    async fn settle(
        &self,
        action: &'static str,
        result: ApiResult<ConsoleState>,
        fallback: &str,
    ) -> Result<(), ConsoleError> {
        match result {
            Ok(next) => self.transition(action, next).await,
            Err(source) => Err(self.fail(action, source, fallback).await),
        }
    }

    fn consultation_request(
        &self,
        patient: &CurrentPatient,
        reason: Option<&str>,
    ) -> ConsultationRequest {
        ConsultationRequest {
            doctor_id: self.identity.doctor_id,
            visit_id: patient.visit_id,
            queue_date: self.queue_date,
            reason: reason.map(str::to_string),
        }
    }

    pub async fn call_next(self: &Arc<Self>) -> Result<CurrentPatient, ConsoleError> {
        self.begin("call next", |state| {
            matches!(state, ConsoleState::CallNext).then_some(())
        })
        .await?;

        let result = self
            .api
            .call_next(&CallNextRequest {
                doctor_id: self.identity.doctor_id,
                queue_date: self.queue_date,
            })
            .await;
        let patient = match result {
            Ok(called) => CurrentPatient::from(called),
            Err(source) => return Err(self.fail("call_next", source, CALL_NEXT_ERROR).await),
        };
        self.transition("call_next", ConsoleState::Ready(patient.clone()))
            .await?;

        info!(token_number = %patient.token_number, "doctor: called next patient");
        self.spawn_stats_refresh();
        Ok(patient)
    }

    pub async fn start_consultation(self: &Arc<Self>) -> Result<(), ConsoleError> {
        let patient = self
            .begin("start a consultation", |state| match state {
                ConsoleState::Ready(patient) => Some(patient.clone()),
                _ => None,
            })
            .await?;

        let result = self
            .api
            .start_consultation(&self.consultation_request(&patient, None))
            .await
            .map(|_| ConsoleState::Consulting(patient));
        self.settle("start_consultation", result, START_CONSULTATION_ERROR)
            .await
    }

    pub async fn skip(self: &Arc<Self>) -> Result<(), ConsoleError> {
        let patient = self
            .begin("skip a patient", |state| match state {
                ConsoleState::Ready(patient) => Some(patient.clone()),
                _ => None,
            })
            .await?;

        let result = self
            .api
            .skip_patient(&self.consultation_request(&patient, Some(SKIP_REASON)))
            .await
            .map(|_| ConsoleState::CallNext);
        self.settle("skip_patient", result, SKIP_ERROR).await?;
        self.spawn_stats_refresh();
        Ok(())
    }

    pub async fn end_consultation(self: &Arc<Self>) -> Result<(), ConsoleError> {
        let patient = self
            .begin("end a consultation", |state| match state {
                ConsoleState::Consulting(patient) => Some(patient.clone()),
                _ => None,
            })
            .await?;

        let result = self
            .api
            .end_consultation(&self.consultation_request(&patient, None))
            .await
            .map(|_| ConsoleState::CallNext);
        self.settle("end_consultation", result, END_CONSULTATION_ERROR)
            .await?;
        self.spawn_stats_refresh();
        Ok(())
    }

    pub async fn sign_out(&self) {
        self.teardown().await;
        if let Err(err) = self.store.clear().await {
            warn!("doctor: failed to clear stored session: {err:#}");
        }
        info!(doctor_id = %self.identity.doctor_id, "doctor: signed out");
        let _ = self.events.send(ConsoleEvent::Navigate(Route::DoctorLogin));
    }

    /// Stops the stats poll; later actions fail with [`ConsoleError::NotSignedIn`].
    pub async fn teardown(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.stats_poller = None;
        self.stats_sequencer.invalidate();
    }

    pub async fn state(&self) -> ConsoleState {
        self.inner.lock().await.state.clone()
    }

    pub async fn current_patient(&self) -> Option<CurrentPatient> {
        self.inner.lock().await.state.current_patient().cloned()
    }

    pub async fn stats(&self) -> Option<DoctorQueueStats> {
        self.inner.lock().await.stats.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.inner.lock().await.error.clone()
    }

    pub async fn is_busy(&self) -> bool {
        self.inner.lock().await.busy
    }
}

#[cfg(test)]
#[path = "tests/doctor_console_tests.rs"]
mod tests;
