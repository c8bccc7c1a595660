use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use shared::{
    domain::DoctorId,
    protocol::{
        ActionAck, CallNextRequest, CalledPatient, CheckInRequest, ConsultationRequest,
        DoctorProfile, DoctorQueueStats, QueueStatusQuery, QueueStatusSnapshot,
        RegistrationMessageResponse,
    },
};

pub mod doctor_console;
pub mod error;
pub mod navigation;
pub mod queue_tracker;
pub mod registration;
pub mod scheduling;
pub mod session_store;
pub mod transport;

pub use doctor_console::{
    sign_in, ConsoleError, ConsoleEvent, ConsoleState, CurrentPatient, DoctorConsole,
};
pub use error::{ApiResult, HospitalApiError};
pub use navigation::{HandoffBundle, Route};
pub use queue_tracker::{QueueTracker, QueueTrackingContext, TrackerError, TrackerEvent};
pub use registration::{
    RegistrationError, RegistrationEvent, RegistrationFlow, StepInput, StepView,
};
pub use session_store::{DoctorIdentity, DoctorSessionStore, MemorySessionStore};
pub use transport::HospitalClient;

/// Delays and intervals the controllers run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub queue_poll: Duration,
    pub completion_redirect: Duration,
    pub handoff_animation: Duration,
    pub handoff_navigation: Duration,
    pub doctor_stats_poll: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            queue_poll: Duration::from_secs(10),
            completion_redirect: Duration::from_secs(3),
            handoff_animation: Duration::from_millis(1800),
            handoff_navigation: Duration::from_millis(2500),
            doctor_stats_poll: Duration::from_secs(10),
        }
    }
}

/// Queue date used when navigation state does not carry one.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[async_trait]
pub trait RegistrationApi: Send + Sync {
    async fn start_registration(
        &self,
        phone_number: &str,
    ) -> ApiResult<RegistrationMessageResponse>;
    async fn continue_registration(
        &self,
        session_id: &str,
        input: Map<String, Value>,
    ) -> ApiResult<RegistrationMessageResponse>;
}

#[async_trait]
pub trait QueueApi: Send + Sync {
    async fn queue_status(&self, query: &QueueStatusQuery) -> ApiResult<QueueStatusSnapshot>;
    async fn check_in(&self, request: &CheckInRequest) -> ApiResult<ActionAck>;
}

#[async_trait]
pub trait DoctorApi: Send + Sync {
    async fn login(&self, name: &str) -> ApiResult<DoctorProfile>;
    async fn queue_stats(
        &self,
        doctor_id: DoctorId,
        queue_date: NaiveDate,
    ) -> ApiResult<DoctorQueueStats>;
    async fn call_next(&self, request: &CallNextRequest) -> ApiResult<CalledPatient>;
    async fn start_consultation(&self, request: &ConsultationRequest) -> ApiResult<ActionAck>;
    async fn end_consultation(&self, request: &ConsultationRequest) -> ApiResult<ActionAck>;
    async fn skip_patient(&self, request: &ConsultationRequest) -> ApiResult<ActionAck>;
}
