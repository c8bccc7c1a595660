use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use shared::{
    domain::{DoctorId, QueueRole},
    error::ErrorBody,
    protocol::{
        ActionAck, CallNextRequest, CalledPatient, CheckInRequest, ConsultationRequest,
        DoctorLoginRequest, DoctorProfile, DoctorQueueStats, QueueStatusQuery,
        QueueStatusSnapshot, RegistrationMessageRequest, RegistrationMessageResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::{ApiResult, DoctorApi, HospitalApiError, QueueApi, RegistrationApi};

const REGISTRATION_MESSAGE_PATH: &str = "agents/registration/message";
const QUEUE_STATUS_PATH: &str = "agents/queue/status";
const CHECK_IN_PATH: &str = "agents/queue/check-in";
const CALL_NEXT_PATH: &str = "agents/queue/call-next";
const START_CONSULTATION_PATH: &str = "agents/queue/start-consultation";
const END_CONSULTATION_PATH: &str = "agents/queue/end-consultation";
const SKIP_PATH: &str = "agents/queue/skip";
const DOCTOR_LOGIN_PATH: &str = "doctors/login";

#[derive(Clone)]
pub struct HospitalClient {
    http: Client,
    base_url: Url,
}

impl HospitalClient {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> ApiResult<Self> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|err| HospitalApiError::InvalidUrl(format!("{base_url}: {err}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(HospitalApiError::InvalidUrl(format!(
                "{base_url}: scheme must be http or https"
            )));
        }
        // Relative joins replace the last path segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.base_url
            .join(path)
            .map_err(|err| HospitalApiError::InvalidUrl(format!("{path}: {err}")))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(endpoint = path, "hospital api: POST");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| HospitalApiError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        decode(path, response).await
    }

    async fn get_json<Q, T>(&self, path: &str, query: &Q) -> ApiResult<T>
    where
        Q: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(endpoint = path, "hospital api: GET");
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|source| HospitalApiError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        decode(path, response).await
    }

    async fn post_action<B>(&self, path: &str, body: &B) -> ApiResult<ActionAck>
    where
        B: Serialize + ?Sized + Sync,
    {
        let ack: Option<ActionAck> = self.post_json(path, body).await?;
        let ack = ack.unwrap_or_default();
        if ack.success == Some(false) {
            return Err(HospitalApiError::Refused {
                endpoint: path.to_string(),
                message: ack.message,
            });
        }
        Ok(ack)
    }
}

async fn decode<T: DeserializeOwned>(endpoint: &str, response: Response) -> ApiResult<T> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|source| HospitalApiError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&body)
            .ok()
            .and_then(|body| body.message());
        return Err(HospitalApiError::Rejected {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    // Acks may come back with an empty body; `Option<T>` targets read that as `null`.
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &body
    };
    serde_json::from_slice(body).map_err(|err| HospitalApiError::Decode {
        endpoint: endpoint.to_string(),
        detail: err.to_string(),
    })
}

#[async_trait]
impl RegistrationApi for HospitalClient {
    async fn start_registration(
        &self,
        phone_number: &str,
    ) -> ApiResult<RegistrationMessageResponse> {
        let mut input = Map::new();
        input.insert(
            "phone_number".to_string(),
            Value::String(phone_number.to_string()),
        );
        self.post_json(
            REGISTRATION_MESSAGE_PATH,
            &RegistrationMessageRequest {
                session_id: None,
                input,
            },
        )
        .await
    }

    async fn continue_registration(
        &self,
        session_id: &str,
        input: Map<String, Value>,
    ) -> ApiResult<RegistrationMessageResponse> {
        self.post_json(
            REGISTRATION_MESSAGE_PATH,
            &RegistrationMessageRequest {
                session_id: Some(session_id.to_string()),
                input,
            },
        )
        .await
    }
}

#[async_trait]
impl QueueApi for HospitalClient {
    async fn queue_status(&self, query: &QueueStatusQuery) -> ApiResult<QueueStatusSnapshot> {
        self.get_json(QUEUE_STATUS_PATH, query).await
    }

    async fn check_in(&self, request: &CheckInRequest) -> ApiResult<ActionAck> {
        self.post_action(CHECK_IN_PATH, request).await
    }
}

#[async_trait]
impl DoctorApi for HospitalClient {
    async fn login(&self, name: &str) -> ApiResult<DoctorProfile> {
        self.post_json(
            DOCTOR_LOGIN_PATH,
            &DoctorLoginRequest {
                name: name.to_string(),
            },
        )
        .await
    }

    async fn queue_stats(
        &self,
        doctor_id: DoctorId,
        queue_date: NaiveDate,
    ) -> ApiResult<DoctorQueueStats> {
        self.get_json(
            QUEUE_STATUS_PATH,
            &QueueStatusQuery {
                visit_id: None,
                doctor_id,
                queue_date,
                role: QueueRole::Doctor,
            },
        )
        .await
    }

    async fn call_next(&self, request: &CallNextRequest) -> ApiResult<CalledPatient> {
        self.post_json(CALL_NEXT_PATH, request).await
    }

    async fn start_consultation(&self, request: &ConsultationRequest) -> ApiResult<ActionAck> {
        self.post_action(START_CONSULTATION_PATH, request).await
    }

    async fn end_consultation(&self, request: &ConsultationRequest) -> ApiResult<ActionAck> {
        self.post_action(END_CONSULTATION_PATH, request).await
    }

    async fn skip_patient(&self, request: &ConsultationRequest) -> ApiResult<ActionAck> {
        self.post_action(SKIP_PATH, request).await
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
