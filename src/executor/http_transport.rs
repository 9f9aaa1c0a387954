//! HTTP transport posting messages to the provider endpoint.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::TransportConfig;
use crate::{AppError, Result};

use super::{BoxFuture, SendReceipt, Transport};

#[derive(Serialize)]
struct SendRequest<'a> {
    account_id: i64,
    prospect_id: Option<i64>,
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct SendResponse {
    #[serde(default, alias = "id")]
    message_id: Option<String>,
    #[serde(default)]
    duplicate: bool,
}

/// Sends messages as JSON `POST` requests with bearer authentication.
///
/// `409 Conflict` is the provider's duplicate signal and counts as success.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    /// Build a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new(config: &TransportConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }

    async fn post(
        &self,
        account_id: i64,
        prospect_id: Option<i64>,
        text: &str,
    ) -> Result<SendReceipt> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SendRequest {
                account_id,
                prospect_id,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => {
                let body = parse_body(response, account_id).await;
                Ok(SendReceipt {
                    external_message_id: body.message_id,
                    success: true,
                    duplicate: body.duplicate,
                    error: None,
                })
            }
            StatusCode::CONFLICT => {
                let body = parse_body(response, account_id).await;
                Ok(SendReceipt {
                    external_message_id: body.message_id,
                    success: true,
                    duplicate: true,
                    error: None,
                })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(account_id, "provider rate limit hit");
                Err(AppError::Transport("rate limit exceeded".into()))
            }
            s if s.is_client_error() => {
                let detail = response.text().await.unwrap_or_default();
                Ok(SendReceipt {
                    external_message_id: None,
                    success: false,
                    duplicate: false,
                    error: Some(format!("{s}: {detail}")),
                })
            }
            s => Err(AppError::Transport(format!("provider returned {s}"))),
        }
    }
}

/// Decode an accepted-send body. A malformed body still means the send
/// happened, but without an id the message escapes deduplication.
async fn parse_body(response: reqwest::Response, account_id: i64) -> SendResponse {
    match response.json::<SendResponse>().await {
        Ok(body) => body,
        Err(err) => {
            warn!(
                account_id,
                %err,
                "provider accepted message but body was unreadable, external id lost"
            );
            SendResponse::default()
        }
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        account_id: i64,
        prospect_id: Option<i64>,
        content: &'a str,
    ) -> BoxFuture<'a, Result<SendReceipt>> {
        Box::pin(self.post(account_id, prospect_id, content))
    }
}

/// Transport used when no `[transport]` section is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTransport;

impl Transport for UnconfiguredTransport {
    fn send<'a>(
        &'a self,
        _account_id: i64,
        _prospect_id: Option<i64>,
        _content: &'a str,
    ) -> BoxFuture<'a, Result<SendReceipt>> {
        Box::pin(async { Err(AppError::Transport("no transport configured".into())) })
    }
}
