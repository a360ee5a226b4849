//! HTTP client for the remote escrow facility.
//!
//! Speaks the facility's REST surface (`/escrow/lock`, `/escrow/release`,
//! `/escrow/split`) with bearer-token auth. Transport failures and 5xx
//! responses are retried with bounded exponential backoff; 4xx responses
//! are surfaced immediately as facility errors.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use warden_core::sink::EscrowSink;
use warden_types::error::SinkError;
use warden_types::escrow::PaymentSplit;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote escrow facility client.
#[derive(Debug, Clone)]
pub struct HttpEscrowClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

#[derive(Debug, Serialize)]
struct LockRequest<'a> {
    workflow_id: &'a str,
    amount: f64,
    poster_id: &'a str,
    executor_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LockResponse {
    escrow_id: String,
}

#[derive(Debug, Serialize)]
struct ReleaseRequest<'a> {
    escrow_id: &'a str,
    amount: f64,
    recipient_id: &'a str,
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct SplitRequest<'a> {
    escrow_id: &'a str,
    splits: &'a [PaymentSplit],
}

impl HttpEscrowClient {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!(base_url = base_url.as_str(), "escrow facility client initialized");

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// POST with bounded retry. Retries transport errors and 5xx; a 4xx is
    /// final and mapped to a facility error with the response body.
    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, SinkError> {
        let url = format!("{}{path}", self.base_url);
        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            let result = self
                .client
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().is_server_error() => {
                    last_error = Some(SinkError::Escrow(format!(
                        "{path} returned {}",
                        response.status()
                    )));
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    return Err(SinkError::Escrow(format!("{path} returned {status}: {detail}")));
                }
                Err(err) => {
                    last_error = Some(SinkError::Transport(err.to_string()));
                }
            }

            if attempt < MAX_RETRIES {
                tracing::warn!(
                    path,
                    attempt = attempt + 1,
                    backoff_secs = backoff.as_secs(),
                    "escrow request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(last_error.unwrap_or_else(|| SinkError::Transport("request never sent".to_string())))
    }
}

impl EscrowSink for HttpEscrowClient {
    async fn lock(
        &self,
        workflow_id: &str,
        amount: f64,
        poster_id: &str,
        executor_id: &str,
    ) -> Result<String, SinkError> {
        tracing::info!(workflow_id, amount, "locking escrow");
        let response = self
            .post_json(
                "/escrow/lock",
                &LockRequest {
                    workflow_id,
                    amount,
                    poster_id,
                    executor_id,
                },
            )
            .await?;

        let lock: LockResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Escrow(format!("malformed lock response: {e}")))?;
        tracing::info!(escrow_id = lock.escrow_id.as_str(), "escrow locked");
        Ok(lock.escrow_id)
    }

    async fn release(
        &self,
        escrow_id: &str,
        amount: f64,
        recipient_id: &str,
        reason: &str,
    ) -> Result<(), SinkError> {
        tracing::info!(escrow_id, recipient_id, amount, "releasing escrow");
        self.post_json(
            "/escrow/release",
            &ReleaseRequest {
                escrow_id,
                amount,
                recipient_id,
                reason,
            },
        )
        .await?;
        Ok(())
    }

    async fn split(&self, escrow_id: &str, splits: &[PaymentSplit]) -> Result<(), SinkError> {
        let total: f64 = splits.iter().map(|s| s.amount).sum();
        tracing::info!(escrow_id, recipients = splits.len(), total, "splitting escrow");
        self.post_json("/escrow/split", &SplitRequest { escrow_id, splits })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_normalized() {
        let client =
            HttpEscrowClient::new("https://escrow.example.com/", SecretString::from("key"))
                .unwrap();
        assert_eq!(client.base_url, "https://escrow.example.com");
    }

    #[test]
    fn api_key_is_not_debug_printed() {
        let client =
            HttpEscrowClient::new("https://escrow.example.com", SecretString::from("sk-secret"))
                .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("sk-secret"));
    }
}
