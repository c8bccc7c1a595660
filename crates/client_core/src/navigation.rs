use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::domain::{DoctorId, TokenNumber, VisitId};

/// Where a controller asks the front end to go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    RegistrationStart,
    QueueTracker(HandoffBundle),
    DoctorLogin,
    DoctorConsole,
}

/// Everything the registration flow knows about a visit when it hands over to the tracker.
///
/// Fields are optional because the tracker, not the sender, decides what is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffBundle {
    #[serde(default)]
    pub token_number: Option<TokenNumber>,
    #[serde(default)]
    pub visit_id: Option<VisitId>,
    #[serde(default)]
    pub doctor_id: Option<DoctorId>,
    #[serde(default)]
    pub queue_date: Option<NaiveDate>,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
}
