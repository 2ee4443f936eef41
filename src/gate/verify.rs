//! Owner password check against `POST /api/verify`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::LocalUsageGate;
use crate::config::ServiceConfig;
use crate::http;

#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("password check failed: {0}")]
    Request(String),

    #[error("password check timed out")]
    Timeout,

    #[error("password service error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("failed to parse password check response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for GateError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GateError::Timeout
        } else {
            GateError::Request(e.to_string())
        }
    }
}

#[async_trait]
pub trait PasswordVerifier: Send + Sync {
    /// `Ok(true)` when the password is the owner's.
    async fn verify(&self, password: &str) -> Result<bool, GateError>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    password: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpPasswordVerifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPasswordVerifier {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            client: http::build_client(config),
            endpoint: config.endpoint("/api/verify"),
        }
    }
}

#[async_trait]
impl PasswordVerifier for HttpPasswordVerifier {
    async fn verify(&self, password: &str) -> Result<bool, GateError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&VerifyRequest { password })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::Status {
                status: status.as_u16(),
                message: http::error_message(response).await,
            });
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| GateError::Parse(e.to_string()))?;
        if let Some(message) = &body.message {
            log::debug!("gate: verify says {message:?}");
        }
        Ok(body.valid)
    }
}

/// Verify `password` and, when it is valid, authenticate `gate`.
pub async fn unlock_gate(
    gate: &LocalUsageGate,
    verifier: &dyn PasswordVerifier,
    password: &str,
) -> Result<bool, GateError> {
    let valid = verifier.verify(password).await?;
    if valid {
        gate.authenticate();
    } else {
        log::warn!("gate: owner password rejected");
    }
    Ok(valid)
}
