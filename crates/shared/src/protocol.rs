use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::domain::{
    DoctorId, PatientId, QueueRole, QueueStatus, RegistrationStep, TokenNumber, VisitId,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub input: Map<String, Value>,
}

/// Reply of `POST /agents/registration/message`. Every part is optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistrationMessageResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<AgentState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AgentReply>,
}

/// Fields the registration agent has accumulated so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<RegistrationStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<PatientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_final: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<DoctorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_id: Option<VisitId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_number: Option<TokenNumber>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    Ok,
    ValidationError,
    ServerError,
}

/// Render hints the registration agent returns alongside the state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ResponseOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub departments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doctors: Vec<DoctorOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub reasoning: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_status: Option<QueueInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_number: Option<TokenNumber>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentReply {
    /// Outcome of the step. Agents that predate the `outcome` field only signal rejected
    /// input through a message mentioning "Invalid".
    pub fn classify(&self) -> ResponseOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        match self.message.as_deref() {
            Some(message) if message.contains("Invalid") => ResponseOutcome::ValidationError,
            _ => ResponseOutcome::Ok,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(item) => vec![item],
        OneOrMany::Many(items) => items,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorOption {
    pub id: DoctorId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
}

/// Queue placement returned once a visit has been created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_number: Option<TokenNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_wait_minutes: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatusQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_id: Option<VisitId>,
    pub doctor_id: DoctorId,
    pub queue_date: NaiveDate,
    pub role: QueueRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueStatusSnapshot {
    pub status: QueueStatus,
    #[serde(default)]
    pub current_token: Option<TokenNumber>,
    #[serde(default)]
    pub present_ahead: Option<u32>,
    #[serde(default)]
    pub patients_ahead: Option<u32>,
    #[serde(default)]
    pub waiting_ahead: Option<u32>,
    #[serde(default)]
    pub estimated_wait_minutes: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl QueueStatusSnapshot {
    /// Checked-in patients ahead; older backends only report `patients_ahead`.
    pub fn ahead(&self) -> Option<u32> {
        self.present_ahead.or(self.patients_ahead)
    }

    /// Explanation shown under the status badge, if the status has one.
    pub fn guidance(&self) -> Option<String> {
        match self.status {
            QueueStatus::Waiting => {
                Some("Please check in when you arrive at the hospital".to_string())
            }
            QueueStatus::Present => Some(match self.estimated_wait_minutes {
                Some(minutes) if minutes > 0 => {
                    format!("I estimate ~{minutes} minutes until you're called.")
                }
                _ => "You'll be called after those checked in before you.".to_string(),
            }),
            QueueStatus::Called => Some(
                "You've been called! Please proceed to the consultation room".to_string(),
            ),
            QueueStatus::Completed => Some(
                "Consultation Complete! Thank you for your visit. Redirecting to home..."
                    .to_string(),
            ),
            QueueStatus::InConsultation | QueueStatus::Skipped | QueueStatus::Unrecognized => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckInRequest {
    pub visit_id: VisitId,
    pub queue_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoctorLoginRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoctorProfile {
    pub doctor_id: DoctorId,
    pub name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub department_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueCounts {
    #[serde(default)]
    pub waiting: u32,
    #[serde(default)]
    pub present: u32,
    #[serde(default)]
    pub skipped: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextWaiting {
    pub token_number: TokenNumber,
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoctorQueueStats {
    #[serde(default)]
    pub counts: QueueCounts,
    #[serde(default)]
    pub next_waiting: Vec<NextWaiting>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallNextRequest {
    pub doctor_id: DoctorId,
    pub queue_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalledPatient {
    pub visit_id: VisitId,
    pub patient_id: PatientId,
    pub token_number: TokenNumber,
    pub patient_name: String,
    #[serde(default)]
    pub patient_age: Option<u32>,
    #[serde(default)]
    pub patient_contact: Option<String>,
    #[serde(default)]
    pub symptoms_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsultationRequest {
    pub doctor_id: DoctorId,
    pub visit_id: VisitId,
    pub queue_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Acknowledgement of a queue mutation. Only `success == Some(false)` is treated as a refusal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionAck {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub status: Option<QueueStatus>,
    #[serde(default)]
    pub message: Option<String>,
}
