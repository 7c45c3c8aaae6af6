//! Patch Task Client
//!
//! Asks the patch-management backend whether a patch job is running on this
//! asset. The answer gates an immediate reboot.
//!
//! Fail-open: any transport error, non-200 status or undecodable body is
//! reported as "not running" so an unreachable backend never blocks the
//! reboot workflow.

use std::time::Duration;

use secops_common::obfuscation::{decode_identifier, ObfuscationError, IDENTIFIER_KEY};
use secops_common::NotifierConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Backend route, relative to `base_url`
pub const ONGOING_PATCH_TASK_PATH: &str = "/patch_management/fetch_ongoing_patch_task";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct PatchTaskQuery<'a> {
    asset: &'a str,
    asset_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct PatchTaskStatus {
    running_patch_status: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchCheckError {
    #[error("missing {0} in config")]
    MissingField(&'static str),

    #[error("cannot decode identifier: {0}")]
    Identifier(#[from] ObfuscationError),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("backend returned HTTP {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    Body(#[source] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct PatchTaskClient {
    timeout: Duration,
    key: String,
}

impl Default for PatchTaskClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl PatchTaskClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            key: IDENTIFIER_KEY.to_string(),
        }
    }

    /// Whether the backend reports a running patch task; `false` on any failure
    pub async fn is_patch_task_running(&self, config: &NotifierConfig) -> bool {
        match self.fetch_status(config).await {
            Ok(running) => {
                debug!("[PATCH] running_patch_status={}", running);
                running
            }
            Err(PatchCheckError::MissingField(field)) => {
                debug!("[PATCH] Skipping patch task check: missing {}", field);
                false
            }
            Err(e) => {
                warn!("[PATCH] Patch task check failed, assuming none running: {}", e);
                false
            }
        }
    }

    /// The same query with failures surfaced
    pub async fn fetch_status(&self, config: &NotifierConfig) -> Result<bool, PatchCheckError> {
        if config.base_url.is_empty() {
            return Err(PatchCheckError::MissingField("base_url"));
        }
        if config.asset.is_empty() {
            return Err(PatchCheckError::MissingField("asset"));
        }
        if config.asset_type.is_empty() {
            return Err(PatchCheckError::MissingField("asset_type"));
        }

        let token = if config.identifier.is_empty() {
            None
        } else {
            Some(decode_identifier(&config.identifier, &self.key)?)
        };

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(PatchCheckError::Transport)?;

        let url = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            ONGOING_PATCH_TASK_PATH
        );
        let mut request = client.post(&url).json(&PatchTaskQuery {
            asset: &config.asset,
            asset_type: &config.asset_type,
        });
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        debug!("[PATCH] POST {}", url);
        let resp = request.send().await.map_err(PatchCheckError::Transport)?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(PatchCheckError::Status(status.as_u16()));
        }

        let body: PatchTaskStatus = resp.json().await.map_err(PatchCheckError::Body)?;
        Ok(body.running_patch_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incomplete_config_skips_request() {
        let client = PatchTaskClient::default();
        let mut config = NotifierConfig::initial("2.0.0");
        config.base_url = "http://127.0.0.1:9".to_string();
        config.asset = "web-1".to_string();

        assert!(matches!(
            client.fetch_status(&config).await,
            Err(PatchCheckError::MissingField("asset_type"))
        ));
        assert!(!client.is_patch_task_running(&config).await);
    }

    #[tokio::test]
    async fn test_undecodable_identifier_fails_open() {
        let client = PatchTaskClient::default();
        let mut config = NotifierConfig::initial("2.0.0");
        config.base_url = "http://127.0.0.1:9".to_string();
        config.asset = "web-1".to_string();
        config.asset_type = "server".to_string();
        config.identifier = "%%%".to_string();

        assert!(matches!(
            client.fetch_status(&config).await,
            Err(PatchCheckError::Identifier(_))
        ));
        assert!(!client.is_patch_task_running(&config).await);
    }
}
