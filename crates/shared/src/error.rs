use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error payloads the hospital API is known to send on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Structured(ApiError),
    Detail { detail: Value },
    Message { message: String },
}

impl ErrorBody {
    /// Human-readable message carried by the body, if any.
    pub fn message(&self) -> Option<String> {
        match self {
            ErrorBody::Structured(err) => non_blank(&err.message),
            ErrorBody::Message { message } => non_blank(message),
            ErrorBody::Detail { detail } => detail_message(detail),
        }
    }
}

fn non_blank(message: &str) -> Option<String> {
    let trimmed = message.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// `detail` is a string for handled errors and a list of `{msg, loc, ..}` for request
// validation failures.
fn detail_message(detail: &Value) -> Option<String> {
    match detail {
        Value::String(text) => non_blank(text),
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_plain_detail() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"detail":"No doctor found with name containing 'x'"}"#)
                .expect("body");
        assert_eq!(
            body.message().as_deref(),
            Some("No doctor found with name containing 'x'")
        );
    }

    #[test]
    fn joins_validation_detail_list() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"detail":[{"loc":["body","visit_id"],"msg":"field required"},{"msg":"bad date"}]}"#,
        )
        .expect("body");
        assert_eq!(body.message().as_deref(), Some("field required; bad date"));
    }

    #[test]
    fn prefers_structured_error() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"code":"conflict","message":"already checked in"}"#)
                .expect("body");
        match &body {
            ErrorBody::Structured(err) => {
                assert_eq!(err, &ApiError::new(ErrorCode::Conflict, "already checked in"))
            }
            other => panic!("expected structured error, got {other:?}"),
        }
        assert_eq!(body.message().as_deref(), Some("already checked in"));
    }
}
