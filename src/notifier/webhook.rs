//! Slack-compatible incoming-webhook transport.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{AlertMessage, AlertTransport, TransportError};

/// Default request timeout for webhook calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON body accepted by Slack-style incoming webhooks.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: String,
    username: &'a str,
    icon_emoji: &'a str,
}

/// Posts alerts as JSON to a webhook URL.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
    username: String,
    icon_emoji: String,
}

impl WebhookTransport {
    /// Create a transport for `url` with a bounded request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        icon_emoji: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            username: username.into(),
            icon_emoji: icon_emoji.into(),
        })
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    async fn deliver(&self, message: &AlertMessage) -> Result<(), TransportError> {
        let payload = WebhookPayload {
            text: message.text(),
            username: &self.username,
            icon_emoji: &self.icon_emoji,
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), "webhook responded");

        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
            })
        }
    }
}
