use crate::DispatchError;
use models::{AlertEvent, NotificationChannel};
use url::Url;

/// NotificationSink delivers alerts over one channel kind.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, alert: &AlertEvent) -> Result<(), DispatchError>;
}

/// Classify an HTTP delivery failure. Client errors other than 429 are
/// permanent: the receiver understood the request and refused it.
fn classify(channel: &'static str, error: reqwest::Error) -> DispatchError {
    match error.status() {
        Some(status) if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS => {
            DispatchError::PermanentChannelFailure {
                channel,
                reason: format!("receiver refused the delivery: {status}"),
            }
        }
        _ => DispatchError::Transient {
            channel,
            source: error.into(),
        },
    }
}

/// WebhookSink POSTs the alert as JSON to the URL carried by its channel.
pub struct WebhookSink {
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, alert: &AlertEvent) -> Result<(), DispatchError> {
        let NotificationChannel::Webhook { url } = &alert.channel else {
            return Err(DispatchError::PermanentChannelFailure {
                channel: "webhook",
                reason: format!("alert routed a {} channel to the webhook sink", alert.channel.kind()),
            });
        };

        self.client
            .post(url.clone())
            .json(alert)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|error| classify("webhook", error))?;

        tracing::debug!(alert = %alert.id, %url, "delivered webhook alert");
        Ok(())
    }
}

/// The message handed to the email relay.
#[derive(Debug, PartialEq, serde::Serialize)]
struct EmailMessage {
    to: String,
    subject: String,
    body: String,
}

impl EmailMessage {
    fn render(to: &str, alert: &AlertEvent) -> Self {
        let direction = match alert.comparison {
            models::Comparison::Above => "reached",
            models::Comparison::Below => "dropped to",
        };
        let subject = match alert.scale {
            Some(scale) => format!(
                "Solar activity alert: {} {} {} ({scale} storm)",
                alert.category, direction, alert.value
            ),
            None => format!(
                "Solar activity alert: {} {} {}",
                alert.category, direction, alert.value
            ),
        };
        let body = format!(
            "Your alert threshold of {} was crossed by a {} reading of {}, observed at {}.",
            alert.threshold, alert.category, alert.value, alert.observed_at
        );

        Self {
            to: to.to_string(),
            subject,
            body,
        }
    }
}

/// EmailRelaySink hands alerts to an HTTP relay which performs the
/// actual email delivery.
pub struct EmailRelaySink {
    relay: Url,
    client: reqwest::Client,
}

impl EmailRelaySink {
    pub fn new(relay: Url, client: reqwest::Client) -> Self {
        Self { relay, client }
    }
}

#[async_trait::async_trait]
impl NotificationSink for EmailRelaySink {
    async fn send(&self, alert: &AlertEvent) -> Result<(), DispatchError> {
        let NotificationChannel::Email { address } = &alert.channel else {
            return Err(DispatchError::PermanentChannelFailure {
                channel: "email",
                reason: format!("alert routed a {} channel to the email sink", alert.channel.kind()),
            });
        };
        let message = EmailMessage::render(address, alert);

        self.client
            .post(self.relay.clone())
            .json(&message)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|error| classify("email", error))?;

        tracing::debug!(alert = %alert.id, to = %address, "relayed email alert");
        Ok(())
    }
}

/// DisabledSink acknowledges alerts without delivering them, logging
/// each one. Stands in for channels with no configured transport.
pub struct DisabledSink {
    channel: &'static str,
}

impl DisabledSink {
    pub fn new(channel: &'static str) -> Self {
        Self { channel }
    }
}

#[async_trait::async_trait]
impl NotificationSink for DisabledSink {
    async fn send(&self, alert: &AlertEvent) -> Result<(), DispatchError> {
        tracing::warn!(
            alert = %alert.id,
            user = %alert.user_id,
            channel = self.channel,
            "skipping alert delivery (channel is disabled)"
        );
        Ok(())
    }
}
