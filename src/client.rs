//! Scanner-side client: turns badge text into a check-in request and submits it.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    checkin::CheckInRequest,
    qr::{QrError, parse_payload},
    registration::Registration,
};

const FALLBACK_REJECTION: &str = "Scan processing failed";

/// Failure modes a scanner distinguishes when submitting a badge.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Badge text could not be interpreted; nothing was sent.
    #[error("Scan Error: {0}")]
    Payload(#[from] QrError),
    /// HTTP client could not be constructed.
    #[error("building http client: {0}")]
    Setup(#[source] reqwest::Error),
    /// Connection failed or timed out.
    #[error("check-in server unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    /// Server answered with a failure.
    #[error("check-in rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Server-provided message, or a generic fallback.
        message: String,
    },
    /// Response body was not the expected JSON.
    #[error("unreadable check-in response: {0}")]
    Decode(String),
}

impl ClientError {
    /// True when the request never reached the server.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// True when showing a retry affordance makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Rejected { .. } | Self::Decode(_))
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    success: bool,
    data: Option<Registration>,
    message: Option<String>,
    error: Option<String>,
}

/// HTTP client for `POST /checkin`.
#[derive(Debug, Clone)]
pub struct CheckInClient {
    http: reqwest::Client,
    base_url: String,
}

impl CheckInClient {
    /// Client for the server at `base_url`; every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Setup)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Parses `payload` and submits it; nothing is sent when parsing fails.
    pub async fn scan_and_submit(&self, payload: &str) -> Result<Registration, ClientError> {
        let identity = parse_payload(payload)?;
        self.submit(&identity.into_request()).await
    }

    /// Submits `request` and returns the updated registration on success.
    pub async fn submit(&self, request: &CheckInRequest) -> Result<Registration, ClientError> {
        let url = format!("{}/checkin", self.base_url);
        debug!(%url, "submitting check-in");

        let resp = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(ClientError::Unreachable)?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let reply = match serde_json::from_str::<Reply>(&text) {
            Ok(reply) => reply,
            Err(_) if !status.is_success() => {
                return Err(ClientError::Rejected {
                    status: status.as_u16(),
                    message: FALLBACK_REJECTION.to_string(),
                });
            }
            Err(e) => return Err(ClientError::Decode(e.to_string())),
        };

        match reply {
            Reply {
                success: true,
                data: Some(registration),
                ..
            } if status.is_success() => Ok(registration),
            Reply { message, error, .. } => Err(ClientError::Rejected {
                status: status.as_u16(),
                message: message
                    .or(error)
                    .unwrap_or_else(|| FALLBACK_REJECTION.to_string()),
            }),
        }
    }
}
