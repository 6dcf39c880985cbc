//! # Remote Notifier
//!
//! Delivers stage-completion payloads to a remote parent's callback URL.
//! Delivery is best-effort: a bounded number of back-to-back retries,
//! then a logged give-up. Callers must tolerate silent notification loss.

use crate::error::{EngineError, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Header carrying the sending task's id.
pub const TASK_ID_HEADER: &str = "X-Task-Id";

/// Outcome of one notification delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// HTTP attempts made, including the first.
    pub attempts: u32,
    pub delivered: bool,
}

/// Best-effort JSON POST client for parent callbacks.
#[derive(Clone)]
pub struct RemoteNotifier {
    client: reqwest::Client,
    max_retries: u32,
}

impl RemoteNotifier {
    pub fn new(max_retries: u32, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| EngineError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            max_retries,
        })
    }

    /// POST `body` to `url` with the task-id header, retrying on any
    /// transport error or non-2xx response. There is no backoff between
    /// attempts.
    pub async fn notify(&self, url: &str, task_id: &str, body: &Value) -> DeliveryReport {
        let total_attempts = self.max_retries + 1;
        for attempt in 1..=total_attempts {
            match self
                .client
                .post(url)
                .header(TASK_ID_HEADER, task_id)
                .json(body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    debug!(task_id, url, attempt, "remote notification delivered");
                    return DeliveryReport {
                        attempts: attempt,
                        delivered: true,
                    };
                }
                Ok(response) => {
                    warn!(
                        task_id,
                        url,
                        attempt,
                        status = %response.status(),
                        "remote notification rejected"
                    );
                }
                Err(e) => {
                    warn!(task_id, url, attempt, error = %e, "remote notification failed");
                }
            }
        }
        error!(
            task_id,
            url, total_attempts, "giving up on remote notification"
        );
        DeliveryReport {
            attempts: total_attempts,
            delivered: false,
        }
    }
}
