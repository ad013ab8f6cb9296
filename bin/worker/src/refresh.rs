//! Forwards view refresh requests to the UI layer.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tidewater_workflow::{ViewRefresh, ViewRefresher};
use tracing::{debug, warn};

/// POSTs refresh requests as JSON to a configured URL, or logs them when no
/// URL is set.
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    http: reqwest::Client,
    url: Option<String>,
}

/// Upper bound on a single refresh POST.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

impl HttpRefresher {
    /// Creates a refresher whose requests give up after ten seconds.
    ///
    /// # Errors
    ///
    /// Returns the client build error when the TLS backend cannot start.
    pub fn new(url: Option<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REFRESH_TIMEOUT).build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl ViewRefresher for HttpRefresher {
    async fn refresh(&self, request: ViewRefresh) {
        let Some(url) = &self.url else {
            debug!(workflow_id = %request.workflow_id, user_id = %request.user_id, "view refresh requested");
            return;
        };
        let body = json!({
            "workflow_id": request.workflow_id.to_string(),
            "user_id": request.user_id,
        });
        let sent = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        if let Err(e) = sent {
            warn!(workflow_id = %request.workflow_id, error = %e, "view refresh failed");
        }
    }
}
