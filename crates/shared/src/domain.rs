use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(VisitId);
id_newtype!(DoctorId);
id_newtype!(PatientId);

/// Queue token handed to a patient when a visit is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenNumber(pub u32);

impl fmt::Display for TokenNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueRole {
    Patient,
    Doctor,
}

impl QueueRole {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueRole::Patient => "patient",
            QueueRole::Doctor => "doctor",
        }
    }
}

/// Visit status as reported by the queue service. Tokens outside the known set decode as
/// [`QueueStatus::Unrecognized`] instead of failing the whole snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueueStatus {
    Waiting,
    Present,
    Called,
    InConsultation,
    Completed,
    Skipped,
    Unrecognized,
}

/// Progress order of a visit. `Skipped` is deliberately absent.
pub const CANONICAL_STATUS_ORDER: [QueueStatus; 5] = [
    QueueStatus::Waiting,
    QueueStatus::Present,
    QueueStatus::Called,
    QueueStatus::InConsultation,
    QueueStatus::Completed,
];

impl QueueStatus {
    /// Position in [`CANONICAL_STATUS_ORDER`], `None` for statuses outside it.
    pub fn rank(self) -> Option<usize> {
        CANONICAL_STATUS_ORDER
            .iter()
            .position(|status| *status == self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Present => "present",
            QueueStatus::Called => "called",
            QueueStatus::InConsultation => "in_consultation",
            QueueStatus::Completed => "completed",
            QueueStatus::Skipped => "skipped",
            QueueStatus::Unrecognized => "unrecognized",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "Waiting",
            QueueStatus::Present => "Present",
            QueueStatus::Called => "Called",
            QueueStatus::InConsultation => "In Consultation",
            QueueStatus::Completed => "Completed",
            QueueStatus::Skipped => "Skipped",
            QueueStatus::Unrecognized => "Unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed)
    }
}

impl From<String> for QueueStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "waiting" => QueueStatus::Waiting,
            "present" => QueueStatus::Present,
            "called" => QueueStatus::Called,
            "in_consultation" => QueueStatus::InConsultation,
            "completed" => QueueStatus::Completed,
            "skipped" => QueueStatus::Skipped,
            _ => QueueStatus::Unrecognized,
        }
    }
}

impl From<QueueStatus> for String {
    fn from(value: QueueStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step token reported by the registration agent.
///
/// Tokens the client does not know are kept verbatim in [`RegistrationStep::Unknown`] so the
/// view layer can still say which step it could not render.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RegistrationStep {
    #[default]
    CollectPhone,
    PatientLookup,
    CollectPatientDetails,
    CollectSymptoms,
    ResolveDepartment,
    SelectDoctor,
    CreateVisit,
    HandoffComplete,
    Unknown(String),
}

impl RegistrationStep {
    pub fn as_str(&self) -> &str {
        match self {
            RegistrationStep::CollectPhone => "collect_phone",
            RegistrationStep::PatientLookup => "patient_lookup",
            RegistrationStep::CollectPatientDetails => "collect_patient_details",
            RegistrationStep::CollectSymptoms => "collect_symptoms",
            RegistrationStep::ResolveDepartment => "resolve_department",
            RegistrationStep::SelectDoctor => "select_doctor",
            RegistrationStep::CreateVisit => "create_visit",
            RegistrationStep::HandoffComplete => "handoff_complete",
            RegistrationStep::Unknown(raw) => raw,
        }
    }

    /// Stage shown by the step indicator: phone, details, symptoms, department, doctor, done.
    pub fn progress_index(&self) -> Option<usize> {
        match self {
            RegistrationStep::CollectPhone | RegistrationStep::PatientLookup => Some(0),
            RegistrationStep::CollectPatientDetails => Some(1),
            RegistrationStep::CollectSymptoms => Some(2),
            RegistrationStep::ResolveDepartment => Some(3),
            RegistrationStep::SelectDoctor | RegistrationStep::CreateVisit => Some(4),
            RegistrationStep::HandoffComplete => Some(5),
            RegistrationStep::Unknown(_) => None,
        }
    }
}

impl From<String> for RegistrationStep {
    fn from(value: String) -> Self {
        match value.as_str() {
            "collect_phone" => RegistrationStep::CollectPhone,
            "patient_lookup" => RegistrationStep::PatientLookup,
            "collect_patient_details" => RegistrationStep::CollectPatientDetails,
            "collect_symptoms" => RegistrationStep::CollectSymptoms,
            "resolve_department" => RegistrationStep::ResolveDepartment,
            "select_doctor" => RegistrationStep::SelectDoctor,
            "create_visit" => RegistrationStep::CreateVisit,
            "handoff_complete" => RegistrationStep::HandoffComplete,
            _ => RegistrationStep::Unknown(value),
        }
    }
}

impl From<RegistrationStep> for String {
    fn from(value: RegistrationStep) -> Self {
        match value {
            RegistrationStep::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
