//! Resend HTTP API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{info, warn};

use super::types::{ApiError, SendEmailRequest, SendEmailResponse, SentEmail};
use super::{EmailError, EmailSender};

/// Client for `POST /emails` on the Resend API.
#[derive(Clone)]
pub struct ResendClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl ResendClient {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, EmailError> {
        let client = Client::builder().pool_max_idle_per_host(10).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    fn emails_url(&self) -> String {
        format!("{}/emails", self.base_url)
    }
}

#[async_trait]
impl EmailSender for ResendClient {
    async fn send(&self, request: &SendEmailRequest) -> Result<SendEmailResponse, EmailError> {
        let response = self
            .client
            .post(self.emails_url())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(timeout_ms = self.timeout.as_millis() as u64, error = %e, "resend_request_timeout");
                } else {
                    warn!(error = %e, "resend_request_error");
                }
                e
            })?;

        let status = response.status();

        if status.is_success() {
            // The email was accepted even if the body turns out unreadable
            let data = match response.json::<SentEmail>().await {
                Ok(sent) => Some(sent),
                Err(e) => {
                    warn!(status_code = status.as_u16(), error = %e, "resend_response_unreadable");
                    None
                }
            };

            info!(
                status_code = status.as_u16(),
                email_id = data.as_ref().map(|d| d.id.as_str()).unwrap_or(""),
                "resend_email_accepted"
            );

            return Ok(SendEmailResponse { data, error: None });
        }

        let text = response.text().await.unwrap_or_default();
        let error = parse_error_body(status, &text);

        warn!(
            status_code = status.as_u16(),
            error_name = %error.name,
            error_message = %error.message,
            "resend_email_refused"
        );

        Ok(SendEmailResponse::failed(error))
    }
}

/// Build an `ApiError` from a non-success response body.
///
/// Falls back to the HTTP status when the body is not the provider's error
/// JSON, e.g. an HTML page from a proxy.
fn parse_error_body(status: StatusCode, text: &str) -> ApiError {
    match serde_json::from_str::<ApiError>(text) {
        Ok(mut error) => {
            if error.status_code.is_none() {
                error.status_code = Some(status.as_u16());
            }
            error
        }
        Err(_) => ApiError {
            message: status
                .canonical_reason()
                .unwrap_or("Unexpected response from email API")
                .to_string(),
            name: "application_error".to_string(),
            status_code: Some(status.as_u16()),
        },
    }
}
