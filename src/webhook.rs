use serde_json::Value as JsonValue;
use std::time::Duration;

const PROVISION_PATH: &str = "/webhook/provision-agent";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget notification to the n8n provisioning workflow
#[derive(Clone)]
pub struct ProvisionWebhook {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl ProvisionWebhook {
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client, base_url }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn endpoint(&self) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}{}", base, PROVISION_PATH))
    }

    /// Post `payload` in the background. Returns whether a request was started.
    ///
    /// Delivery failures are logged and never surface to the caller.
    pub fn trigger(&self, payload: JsonValue) -> bool {
        let Some(url) = self.endpoint() else {
            return false;
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!("Provisioning webhook accepted by {}", url);
                }
                Ok(response) => {
                    tracing::warn!("Provisioning webhook {} returned {}", url, response.status());
                }
                Err(e) => {
                    tracing::warn!("Provisioning webhook {} failed: {}", url, e);
                }
            }
        });
        true
    }
}
