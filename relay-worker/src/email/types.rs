//! Request and response shapes of the email API.

use serde::{Deserialize, Serialize};

/// Body of a send-email call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendEmailRequest {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Identifier the provider assigns to an accepted email.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SentEmail {
    pub id: String,
}

/// Error reported by the provider for a request it refused.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub message: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status_code: Option<u16>,
}

/// Outcome of a call that reached the provider.
///
/// `error` is `None` on success.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendEmailResponse {
    pub data: Option<SentEmail>,
    pub error: Option<ApiError>,
}

impl SendEmailResponse {
    pub fn sent(id: impl Into<String>) -> Self {
        Self {
            data: Some(SentEmail { id: id.into() }),
            error: None,
        }
    }

    pub fn failed(error: ApiError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = SendEmailRequest {
            from: "onboarding@resend.dev".to_string(),
            to: vec!["delivered@resend.dev".to_string()],
            subject: "Hello World".to_string(),
            html: "<p>Hi 1, Hello Resend</p>".to_string(),
        };

        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["to"], serde_json::json!(["delivered@resend.dev"]));
        assert_eq!(json["subject"], "Hello World");
    }

    #[test]
    fn test_api_error_deserialization() {
        let json = r#"{
            "statusCode": 429,
            "message": "Too many requests. You can only make 2 requests per second.",
            "name": "rate_limit_exceeded"
        }"#;

        let error: ApiError = serde_json::from_str(json).unwrap();

        assert_eq!(error.status_code, Some(429));
        assert_eq!(error.name, "rate_limit_exceeded");
    }
}
