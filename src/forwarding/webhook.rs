//! Webhook sink posting each audit event as JSON

use async_trait::async_trait;
use std::time::Duration;

use crate::audit::entry::AuditEvent;
use crate::error::{AuditError, AuditResult};
use crate::forwarding::EventSink;

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AuditResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuditError::ForwardingError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &str {
        &self.url
    }

    async fn forward(&self, event: &AuditEvent) -> AuditResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| AuditError::ForwardingError(format!("Request to {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(AuditError::ForwardingError(format!(
                "{} responded with {}",
                self.url,
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{EventFields, GENESIS_HASH};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> AuditEvent {
        EventFields::new("alice", "export", "employee/7/data")
            .seal(GENESIS_HASH)
            .unwrap()
    }

    #[tokio::test]
    async fn test_posts_event_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audit"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookSink::new(format!("{}/audit", server.uri()), Duration::from_secs(5)).unwrap();
        sink.forward(&event()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["action"], "export");
        assert_eq!(body["prev_hash"], GENESIS_HASH);
    }

    #[tokio::test]
    async fn test_error_status_is_forwarding_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = WebhookSink::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = sink.forward(&event()).await.unwrap_err();
        assert!(matches!(err, AuditError::ForwardingError(_)));
        assert!(err.to_string().contains("503"));
    }
}
