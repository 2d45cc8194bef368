//! Wire access to the batch-action endpoints.
//!
//! The controller only talks to [`OperationTransport`]; [`HttpTransport`] is
//! the production implementation speaking the submit/poll JSON contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shared::{
    domain::{OperationHandle, OperationRequest, ProgressReport},
    error::ApiError,
    protocol::{PollResponse, SubmitResponse},
};
use tracing::debug;
use url::Url;

use crate::error::{PollError, SubmissionError};

const MAX_ERROR_BODY_CHARS: usize = 200;
/// Upper bound for a single submit or poll request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait OperationTransport: Send + Sync {
    async fn submit(&self, request: &OperationRequest) -> Result<OperationHandle, SubmissionError>;
    async fn poll(&self, handle: &OperationHandle) -> Result<ProgressReport, PollError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    server_url: Url,
    submit_url: Url,
}

impl HttpTransport {
    pub fn new(server_url: &str, submit_path: &str) -> Result<Self, SubmissionError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| SubmissionError::Transport(err.to_string()))?;
        Self::with_client(http, server_url, submit_path)
    }

    pub fn with_client(
        http: Client,
        server_url: &str,
        submit_path: &str,
    ) -> Result<Self, SubmissionError> {
        let server_url = parse_base_url(server_url)?;
        let submit_url = server_url
            .join(submit_path)
            .map_err(|err| SubmissionError::InvalidUrl(format!("{submit_path}: {err}")))?;
        Ok(Self {
            http,
            server_url,
            submit_url,
        })
    }

    pub fn submit_url(&self) -> &Url {
        &self.submit_url
    }
}

#[async_trait]
impl OperationTransport for HttpTransport {
    async fn submit(&self, request: &OperationRequest) -> Result<OperationHandle, SubmissionError> {
        debug!(url = %self.submit_url, items = request.item_ids.len(), "submitting batch action");
        let response = self
            .http
            .post(self.submit_url.clone())
            .form(&request.form_pairs())
            .send()
            .await
            .map_err(|err| SubmissionError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SubmissionError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let parsed: SubmitResponse = serde_json::from_str(&body)
            .map_err(|err| SubmissionError::MalformedResponse(err.to_string()))?;
        let poll_url = self
            .server_url
            .join(&parsed.poll_url)
            .map_err(|err| SubmissionError::InvalidUrl(format!("{}: {err}", parsed.poll_url)))?;
        Ok(OperationHandle::new(poll_url.to_string()))
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<ProgressReport, PollError> {
        let response = self
            .http
            .get(handle.as_str())
            .send()
            .await
            .map_err(|err| PollError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| PollError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(PollError::Status {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let parsed: PollResponse = serde_json::from_str(&body)
            .map_err(|err| PollError::MalformedResponse(err.to_string()))?;
        Ok(parsed.into())
    }
}

fn parse_base_url(server_url: &str) -> Result<Url, SubmissionError> {
    let trimmed = server_url.trim();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(SubmissionError::InvalidUrl(format!(
            "{trimmed}: server_url must start with http:// or https://"
        )));
    }
    // Keep any path prefix when joining relative submit and poll paths.
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|err| SubmissionError::InvalidUrl(format!("{trimmed}: {err}")))
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Some(api_error) = ApiError::from_body(body) {
        return api_error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status.canonical_reason().unwrap_or("no response body").to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
