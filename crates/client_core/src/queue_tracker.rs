use std::sync::{Arc, Weak};

use chrono::NaiveDate;
use shared::{
    domain::{DoctorId, QueueRole, QueueStatus, TokenNumber, VisitId},
    protocol::{CheckInRequest, QueueStatusQuery, QueueStatusSnapshot},
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    navigation::{HandoffBundle, Route},
    scheduling::{RequestSequencer, RequestTicket, ScheduledTask},
    today, HospitalApiError, QueueApi, Timings,
};

pub const QUEUE_STATUS_ERROR: &str = "Unable to fetch queue status";
pub const CHECK_IN_ERROR: &str = "Check-in failed";

/// Statuses drawn on the progress timeline, with their labels.
pub const MILESTONES: [(QueueStatus, &str); 4] = [
    (QueueStatus::Waiting, "Booked"),
    (QueueStatus::Present, "Checked In"),
    (QueueStatus::Called, "Called"),
    (QueueStatus::InConsultation, "In Consultation"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTrackingContext {
    pub visit_id: VisitId,
    pub doctor_id: DoctorId,
    pub token_number: TokenNumber,
    pub queue_date: NaiveDate,
    pub patient_name: Option<String>,
    pub department: Option<String>,
    pub phone_number: Option<String>,
    pub doctor_name: Option<String>,
}

impl QueueTrackingContext {
    /// Token, visit and doctor are required; the date falls back to `today`.
    pub fn from_handoff(bundle: HandoffBundle, today: NaiveDate) -> Result<Self, TrackerError> {
        let mut missing = Vec::new();
        if bundle.token_number.is_none() {
            missing.push("token_number");
        }
        if bundle.visit_id.is_none() {
            missing.push("visit_id");
        }
        if bundle.doctor_id.is_none() {
            missing.push("doctor_id");
        }
        let (Some(token_number), Some(visit_id), Some(doctor_id)) =
            (bundle.token_number, bundle.visit_id, bundle.doctor_id)
        else {
            return Err(TrackerError::MissingIdentity { missing });
        };

        Ok(Self {
            visit_id,
            doctor_id,
            token_number,
            queue_date: bundle.queue_date.unwrap_or(today),
            patient_name: bundle.patient_name,
            department: bundle.department,
            phone_number: bundle.phone_number,
            doctor_name: bundle.doctor_name,
        })
    }

    pub fn status_query(&self) -> QueueStatusQuery {
        QueueStatusQuery {
            visit_id: Some(self.visit_id),
            doctor_id: self.doctor_id,
            queue_date: self.queue_date,
            role: QueueRole::Patient,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneState {
    Completed,
    Active,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Milestone {
    pub status: QueueStatus,
    pub label: &'static str,
    pub state: MilestoneState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    InProgress,
    Finished,
    /// The status sits outside the progress order, e.g. `skipped`.
    NoActiveMilestone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressProjection {
    pub milestones: Vec<Milestone>,
    pub state: ProgressState,
}

impl ProgressProjection {
    pub fn active(&self) -> Option<&Milestone> {
        self.milestones
            .iter()
            .find(|milestone| milestone.state == MilestoneState::Active)
    }
}

/// Projects `status` onto the timeline. No snapshot yet reads as `waiting`.
pub fn project_progress(status: Option<QueueStatus>) -> ProgressProjection {
    let current = status.unwrap_or(QueueStatus::Waiting).rank();
    let milestones: Vec<Milestone> = MILESTONES
        .iter()
        .map(|(status, label)| {
            let state = match (status.rank(), current) {
                (Some(rank), Some(current)) if rank < current => MilestoneState::Completed,
                (Some(rank), Some(current)) if rank == current => MilestoneState::Active,
                _ => MilestoneState::Pending,
            };
            Milestone {
                status: *status,
                label: *label,
                state,
            }
        })
        .collect();

    let state = if current.is_none() {
        ProgressState::NoActiveMilestone
    } else if milestones
        .iter()
        .all(|milestone| milestone.state == MilestoneState::Completed)
    {
        ProgressState::Finished
    } else {
        ProgressState::InProgress
    };

    ProgressProjection { milestones, state }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    Initial,
    Manual,
    Background,
}

impl FetchMode {
    fn shows_indicator(self) -> bool {
        matches!(self, FetchMode::Initial | FetchMode::Manual)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    StatusUpdated(QueueStatusSnapshot),
    RefreshingChanged(bool),
    CheckingInChanged(bool),
    Error(String),
    CalledAlert { token_number: TokenNumber },
    Completed,
    Navigate(Route),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("queue tracking requires {}", .missing.join(", "))]
    MissingIdentity { missing: Vec<&'static str> },
    #[error("check-in is only available while waiting")]
    CheckInUnavailable,
    #[error("a check-in is already in progress")]
    Busy,
    #[error("{message}")]
    Service {
        message: String,
        #[source]
        source: HospitalApiError,
    },
    #[error("response was superseded by a newer request")]
    Superseded,
    #[error("queue tracking has stopped")]
    Closed,
}

impl TrackerError {
    /// Where the front end should go instead of showing this error.
    pub fn redirect(&self) -> Option<Route> {
        match self {
            TrackerError::MissingIdentity { .. } => Some(Route::RegistrationStart),
            _ => None,
        }
    }
}

#[derive(Default)]
struct TrackerState {
    snapshot: Option<QueueStatusSnapshot>,
    indicator_ticket: Option<RequestTicket>,
    checking_in: bool,
    error: Option<String>,
    alerts_enabled: bool,
    poller: Option<ScheduledTask>,
    redirect: Option<ScheduledTask>,
    redirect_scheduled: bool,
    closed: bool,
}

pub struct QueueTracker {
    api: Arc<dyn QueueApi>,
    context: QueueTrackingContext,
    timings: Timings,
    sequencer: RequestSequencer,
    inner: Mutex<TrackerState>,
    events: broadcast::Sender<TrackerEvent>,
}

impl QueueTracker {
    /// Validates the handoff, fetches the first snapshot and starts polling.
    pub async fn mount(
        api: Arc<dyn QueueApi>,
        bundle: HandoffBundle,
        timings: Timings,
    ) -> Result<Arc<Self>, TrackerError> {
        let context = QueueTrackingContext::from_handoff(bundle, today())?;
        let tracker = Self::new(api, context, timings);
        let _ = tracker.start().await;
        Ok(tracker)
    }

    pub fn new(
        api: Arc<dyn QueueApi>,
        context: QueueTrackingContext,
        timings: Timings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            api,
            context,
            timings,
            sequencer: RequestSequencer::new(),
            inner: Mutex::new(TrackerState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn context(&self) -> &QueueTrackingContext {
        &self.context
    }

    pub async fn start(self: &Arc<Self>) -> Result<QueueStatusSnapshot, TrackerError> {
        {
            let mut state = self.inner.lock().await;
            if !state.closed && state.poller.is_none() {
                let tracker = Arc::downgrade(self);
                state.poller = Some(ScheduledTask::every(self.timings.queue_poll, move || {
                    let tracker = Weak::clone(&tracker);
                    async move {
                        if let Some(tracker) = tracker.upgrade() {
                            let _ = tracker.fetch(FetchMode::Background).await;
                        }
                    }
                }));
                info!(
                    visit_id = %self.context.visit_id,
                    token_number = %self.context.token_number,
                    "queue: tracking started"
                );
            }
        }
        self.fetch(FetchMode::Initial).await
    }

    pub async fn refresh(self: &Arc<Self>) -> Result<QueueStatusSnapshot, TrackerError> {
        self.fetch(FetchMode::Manual).await
    }

    async fn fetch(
        self: &Arc<Self>,
        mode: FetchMode,
    ) -> Result<QueueStatusSnapshot, TrackerError> {
        let ticket = {
            let mut state = self.inner.lock().await;
            if state.closed {
                return Err(TrackerError::Closed);
            }
            let ticket = self.sequencer.issue();
            state.error = None;
            if mode.shows_indicator() {
                if state.indicator_ticket.is_none() {
                    let _ = self.events.send(TrackerEvent::RefreshingChanged(true));
                }
                state.indicator_ticket = Some(ticket);
            }
            ticket
        };

        let result = self.api.queue_status(&self.context.status_query()).await;

        let mut state = self.inner.lock().await;
        if state.indicator_ticket == Some(ticket) {
            state.indicator_ticket = None;
            let _ = self.events.send(TrackerEvent::RefreshingChanged(false));
        }
        if !self.sequencer.accept(ticket) {
            debug!(
                sequence = ticket.sequence(),
                ?mode,
                "queue: dropping stale status response"
            );
            return Err(TrackerError::Superseded);
        }

        match result {
            Ok(snapshot) => {
                self.apply_snapshot(&mut state, snapshot.clone());
                Ok(snapshot)
            }
            Err(source) => {
                let message = source.user_message(QUEUE_STATUS_ERROR);
                warn!(visit_id = %self.context.visit_id, "queue: status fetch failed: {source}");
                state.error = Some(message.clone());
                let _ = self.events.send(TrackerEvent::Error(message.clone()));
                Err(TrackerError::Service { message, source })
            }
        }
    }

    fn apply_snapshot(
        self: &Arc<Self>,
        state: &mut TrackerState,
        snapshot: QueueStatusSnapshot,
    ) {
        let previous = state.snapshot.as_ref().map(|current| current.status);
        let status = snapshot.status;
        state.snapshot = Some(snapshot.clone());
        let _ = self.events.send(TrackerEvent::StatusUpdated(snapshot));

        if previous != Some(status) {
            debug!(visit_id = %self.context.visit_id, %status, "queue: status changed");
        }
        let newly_called = status == QueueStatus::Called && previous != Some(QueueStatus::Called);
        if newly_called && state.alerts_enabled {
            let _ = self.events.send(TrackerEvent::CalledAlert {
                token_number: self.context.token_number,
            });
        }
        if status.is_terminal() && !state.redirect_scheduled && !state.closed {
            state.redirect_scheduled = true;
            info!(visit_id = %self.context.visit_id, "queue: consultation completed");
            let _ = self.events.send(TrackerEvent::Completed);
            let tracker = Arc::downgrade(self);
            state.redirect = Some(ScheduledTask::after(
                self.timings.completion_redirect,
                async move {
                    if let Some(tracker) = tracker.upgrade() {
                        tracker.redirect_home().await;
                    }
                },
            ));
        }
    }

    async fn redirect_home(&self) {
        let mut state = self.inner.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.poller = None;
        self.sequencer.invalidate();
        let _ = self
            .events
            .send(TrackerEvent::Navigate(Route::RegistrationStart));
    }

    pub async fn check_in(self: &Arc<Self>) -> Result<(), TrackerError> {
        {
            let mut state = self.inner.lock().await;
            if state.closed {
                return Err(TrackerError::Closed);
            }
            if state.checking_in {
                return Err(TrackerError::Busy);
            }
            let status = state.snapshot.as_ref().map(|snapshot| snapshot.status);
            if status != Some(QueueStatus::Waiting) {
                return Err(TrackerError::CheckInUnavailable);
            }
            state.checking_in = true;
            state.error = None;
            let _ = self.events.send(TrackerEvent::CheckingInChanged(true));
        }

        let result = self
            .api
            .check_in(&CheckInRequest {
                visit_id: self.context.visit_id,
                queue_date: self.context.queue_date,
            })
            .await;

        {
            let mut state = self.inner.lock().await;
            state.checking_in = false;
            let _ = self.events.send(TrackerEvent::CheckingInChanged(false));
            if let Err(source) = result {
                let message = source.user_message(CHECK_IN_ERROR);
                warn!(visit_id = %self.context.visit_id, "queue: check-in failed: {source}");
                state.error = Some(message.clone());
                let _ = self.events.send(TrackerEvent::Error(message.clone()));
                return Err(TrackerError::Service { message, source });
            }
        }

        info!(visit_id = %self.context.visit_id, "queue: checked in");
        // Refresh failures are recorded on the tracker like any other fetch.
        let _ = self.fetch(FetchMode::Background).await;
        Ok(())
    }

    pub async fn set_alerts(&self, enabled: bool) {
        self.inner.lock().await.alerts_enabled = enabled;
    }

    pub async fn alerts_enabled(&self) -> bool {
        self.inner.lock().await.alerts_enabled
    }

    /// Stops tracking and sends the patient back to the start of registration.
    pub async fn leave(&self) {
        self.teardown().await;
        let _ = self
            .events
            .send(TrackerEvent::Navigate(Route::RegistrationStart));
    }

    /// Cancels polling and any pending redirect; responses still in flight are dropped.
    pub async fn teardown(&self) {
        let mut state = self.inner.lock().await;
        state.closed = true;
        state.poller = None;
        state.redirect = None;
        state.indicator_ticket = None;
        self.sequencer.invalidate();
    }

    pub async fn snapshot(&self) -> Option<QueueStatusSnapshot> {
        self.inner.lock().await.snapshot.clone()
    }

    pub async fn progress(&self) -> ProgressProjection {
        let state = self.inner.lock().await;
        project_progress(state.snapshot.as_ref().map(|snapshot| snapshot.status))
    }

    pub async fn guidance(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .snapshot
            .as_ref()
            .and_then(QueueStatusSnapshot::guidance)
    }

    pub async fn error(&self) -> Option<String> {
        self.inner.lock().await.error.clone()
    }

    pub async fn is_refreshing(&self) -> bool {
        self.inner.lock().await.indicator_ticket.is_some()
    }

    pub async fn is_checking_in(&self) -> bool {
        self.inner.lock().await.checking_in
    }

    pub async fn can_check_in(&self) -> bool {
        let state = self.inner.lock().await;
        !state.checking_in
            && state
                .snapshot
                .as_ref()
                .is_some_and(|snapshot| snapshot.status == QueueStatus::Waiting)
    }
}

#[cfg(test)]
#[path = "tests/queue_tracker_tests.rs"]
mod tests;
