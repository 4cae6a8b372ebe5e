//! Webhook dispatch (§4.7). Up to 3 attempts, backoff `1s * 2^(n-1)`,
//! retrying only on a network error or a 5xx response; a 4xx is a
//! terminal rejection and any 2xx is success.

use std::time::Duration;

use tracing::{debug, warn};

use nc_common::WebhookPayload;

#[derive(Debug, Clone)]
pub struct WebhookDispatcherConfig {
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
}

impl Default for WebhookDispatcherConfig {
    fn default() -> Self {
        Self { max_attempts: 3, per_attempt_timeout: Duration::from_secs(30) }
    }
}

pub struct WebhookDispatcher {
    client: reqwest::Client,
    config: WebhookDispatcherConfig,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookDispatcherConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.per_attempt_timeout).build()?;
        Ok(Self { client, config })
    }

    /// Attempts delivery up to `max_attempts` times. Returns `Ok(())` once
    /// any attempt gets a 2xx; returns the last error otherwise. Never
    /// propagates failure back into the store-update path — the caller
    /// logs and moves on.
    pub async fn dispatch(&self, url: &str, payload: &WebhookPayload) -> anyhow::Result<()> {
        let mut attempt = 1;
        loop {
            let result = self.client.post(url).header("X-Attempt", attempt.to_string()).json(payload).send().await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!(url, attempt, "webhook delivered");
                    return Ok(());
                }
                Ok(response) if response.status().as_u16() < 500 => {
                    let status = response.status();
                    anyhow::bail!("webhook rejected with non-retryable status {status}");
                }
                Ok(response) => {
                    warn!(url, attempt, status = %response.status(), "webhook returned a server error");
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "webhook request failed");
                }
            }

            if attempt >= self.config.max_attempts {
                anyhow::bail!("webhook delivery exhausted {attempt} attempts");
            }
            let backoff = Duration::from_secs(1u64 << (attempt - 1));
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nc_common::StatusOutcome;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_payload() -> WebhookPayload {
        WebhookPayload {
            request_id: "req-1".to_string(),
            client_id: "client-1".to_string(),
            notification_id: Uuid::new_v4(),
            status: StatusOutcome::Delivered,
            channel: "email".to_string(),
            message: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatch_succeeds_on_first_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let dispatcher = WebhookDispatcher::new(WebhookDispatcherConfig::default()).unwrap();
        let url = format!("{}/hook", server.uri());
        dispatcher.dispatch(&url, &sample_payload()).await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_does_not_retry_on_4xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(400)).mount(&server).await;

        let dispatcher = WebhookDispatcher::new(WebhookDispatcherConfig::default()).unwrap();
        let url = format!("{}/hook", server.uri());
        let result = dispatcher.dispatch(&url, &sample_payload()).await;
        assert!(result.is_err());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_retries_on_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(503)).up_to_n_times(1).mount(&server).await;
        Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let dispatcher = WebhookDispatcher::new(WebhookDispatcherConfig::default()).unwrap();
        let url = format!("{}/hook", server.uri());
        dispatcher.dispatch(&url, &sample_payload()).await.unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
