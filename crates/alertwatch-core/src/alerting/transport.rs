//! HTTP delivery for notification channels

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::models::NotificationChannel;

use super::notifier::{NotificationError, NotificationTransport, OutboundMessage, Payload};

/// Sends notifications over HTTP.
///
/// Slack and generic webhooks are posted directly, PagerDuty goes to the
/// Events v2 endpoint, and email/SMS are handed to a relay when the target
/// names one.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    pagerduty_url: String,
}

impl HttpTransport {
    /// Build a transport from notification settings
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.send_timeout)
            .user_agent(concat!("alertwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            pagerduty_url: config.pagerduty_events_url.clone(),
        })
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: &[(&String, &String)],
    ) -> std::result::Result<(), NotificationError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(url, status = status.as_u16(), "Delivered");
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(NotificationError::HttpError(format!("{status}: {text}")))
        }
    }
}

#[async_trait]
impl NotificationTransport for HttpTransport {
    async fn send(&self, message: &OutboundMessage) -> std::result::Result<(), NotificationError> {
        let body = serde_json::to_value(&message.payload)
            .map_err(|e| NotificationError::SerializationError(e.to_string()))?;

        match &message.channel {
            NotificationChannel::Slack { webhook_url, .. } => {
                self.post(webhook_url, &body, &[]).await
            }
            NotificationChannel::Webhook { url, headers } => {
                let mut headers: Vec<(&String, &String)> = headers.iter().collect();
                headers.sort();
                self.post(url, &body, &headers).await
            }
            NotificationChannel::PagerDuty { .. } => {
                self.post(&self.pagerduty_url, &body, &[]).await
            }
            NotificationChannel::Email { to, relay_url }
            | NotificationChannel::Sms { to, relay_url } => {
                let channel = message.channel.channel_type();
                let Some(relay_url) = relay_url else {
                    return Err(NotificationError::NotConfigured(format!(
                        "{channel} target has no relay_url"
                    )));
                };
                let Payload::Text(text) = &message.payload else {
                    return Err(NotificationError::SerializationError(format!(
                        "{channel} requires a text payload"
                    )));
                };

                let relay_body = json!({
                    "channel": channel.as_str(),
                    "to": to,
                    "subject": text.subject,
                    "body": text.body,
                    "alert_id": message.alert_id,
                    "rule_id": message.rule_id,
                });
                self.post(relay_url, &relay_body, &[]).await
            }
        }
    }
}
