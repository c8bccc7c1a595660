use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, HospitalApiError>;

#[derive(Debug, Error)]
pub enum HospitalApiError {
    #[error("invalid hospital api url: {0}")]
    InvalidUrl(String),
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(
        "{endpoint} rejected the request with status {status}: {}",
        .message.as_deref().unwrap_or("no details")
    )]
    Rejected {
        endpoint: String,
        status: u16,
        message: Option<String>,
    },
    #[error("{endpoint} refused the action: {}", .message.as_deref().unwrap_or("no details"))]
    Refused {
        endpoint: String,
        message: Option<String>,
    },
    #[error("unexpected response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },
}

impl HospitalApiError {
    /// Message written by the service itself, if the failure carried one.
    pub fn service_message(&self) -> Option<&str> {
        match self {
            HospitalApiError::Rejected { message, .. }
            | HospitalApiError::Refused { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// Text to show the user: the service's own message, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        self.service_message()
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HospitalApiError::Rejected { status: 404, .. })
    }
}
