//! Whole-resource fetch — the last local strategy.
//!
//! One GET, no local retries: any failure here means the same-context
//! network path is blocked (cross-origin, auth, plain network error), and
//! the right move is escalation to a privileged collaborator, not hammering
//! the same blocked path. `FetchBlocked` carries exactly what that
//! collaborator needs.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::descriptor::SourceLocator;
use crate::errors::AcquireError;
use crate::sink::Artifact;

/// Direct fetch client.
pub struct DirectFetchClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl DirectFetchClient {
    pub fn new(config: &EngineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            timeout: config.fetch_timeout,
        }
    }

    /// Retrieve the whole resource behind `source` in one request.
    ///
    /// `filename` is threaded into the error so a blocked fetch can be
    /// escalated as-is.
    pub async fn fetch(
        &self,
        source: &SourceLocator,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, AcquireError> {
        let Some(url) = source.as_url() else {
            // An element reference has nothing we can address over HTTP.
            return Err(AcquireError::FetchBlocked {
                url: String::new(),
                filename: filename.to_string(),
            });
        };
        let blocked = |reason: &str| {
            tracing::debug!(url, reason, "direct fetch blocked");
            AcquireError::FetchBlocked {
                url: url.to_string(),
                filename: filename.to_string(),
            }
        };
        let target = url::Url::parse(url).map_err(|e| blocked(&format!("unparseable url: {e}")))?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
            r = self
                .client
                .get(target)
                .timeout(self.timeout)
                .send() => r.map_err(|e| blocked(&e.to_string()))?,
        };

        if !response.status().is_success() {
            return Err(blocked(&format!("status {}", response.status())));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
            b = response.bytes() => b.map_err(|e| blocked(&e.to_string()))?,
        };

        Ok(Artifact {
            bytes,
            mime_type,
            partial: false,
        })
    }
}
