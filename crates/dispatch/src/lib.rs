//! Delivery of triggered alerts to their notification channels.
//!
//! A Dispatcher routes each alert to the sink of its channel kind and
//! retries transient delivery failures under a bounded exponential
//! backoff. Alerts whose retry budget is exhausted are surfaced to a
//! DeliveryAudit, never silently dropped.

mod sinks;

pub use sinks::{DisabledSink, EmailRelaySink, NotificationSink, WebhookSink};

use chrono::{DateTime, Utc};
use exponential_backoff::Backoff;
use models::{AlertEvent, DispatchConfig};
use std::collections::BTreeMap;

/// DispatchError is the failure of a delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The channel failed in a way a later attempt may recover from:
    /// a network error, a timeout, or an overloaded receiver.
    #[error("transient failure delivering over {channel}")]
    Transient {
        channel: &'static str,
        #[source]
        source: anyhow::Error,
    },
    /// The channel rejected the delivery outright.
    /// Retries won't help until the channel configuration changes.
    #[error("{channel} channel failed permanently: {reason}")]
    PermanentChannelFailure {
        channel: &'static str,
        reason: String,
    },
}

impl DispatchError {
    /// Whether a retry of the same delivery may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Transient { .. })
    }

    pub fn channel(&self) -> &'static str {
        match self {
            DispatchError::Transient { channel, .. } => channel,
            DispatchError::PermanentChannelFailure { channel, .. } => channel,
        }
    }
}

/// Ack records a completed delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub alert_id: uuid::Uuid,
    pub channel: &'static str,
    /// Attempts taken, including the successful one.
    pub attempts: u32,
    pub delivered_at: DateTime<Utc>,
}

/// DeliveryAudit receives alerts whose delivery was abandoned, so an
/// external collaborator can surface "alert undeliverable" to the user.
pub trait DeliveryAudit: Send + Sync {
    fn undeliverable(&self, alert: &AlertEvent, error: &DispatchError);
}

/// LogAudit reports abandoned deliveries as structured log events.
pub struct LogAudit;

impl DeliveryAudit for LogAudit {
    fn undeliverable(&self, alert: &AlertEvent, error: &DispatchError) {
        tracing::error!(
            alert = %alert.id,
            user = %alert.user_id,
            channel = alert.channel.kind(),
            %error,
            "alert is undeliverable"
        );
    }
}

/// Dispatcher delivers alerts over their configured channels.
pub struct Dispatcher {
    sinks: BTreeMap<&'static str, Box<dyn NotificationSink>>,
    max_attempts: u32,
    backoff_min: std::time::Duration,
    backoff_max: std::time::Duration,
}

impl Dispatcher {
    /// A Dispatcher over an explicit set of channel sinks.
    pub fn new(
        sinks: Vec<(&'static str, Box<dyn NotificationSink>)>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            sinks: sinks.into_iter().collect(),
            max_attempts: config.max_attempts.max(1),
            backoff_min: config.backoff_min,
            backoff_max: config.backoff_max,
        }
    }

    /// A Dispatcher with the standard sinks: webhook delivery over HTTP,
    /// email through the configured relay, and a disabled push sink.
    pub fn from_config(config: &DispatchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        let email: Box<dyn NotificationSink> = match &config.email_relay {
            Some(relay) => Box::new(EmailRelaySink::new(relay.clone(), client.clone())),
            None => Box::new(DisabledSink::new("email")),
        };

        Ok(Self::new(
            vec![
                ("webhook", Box::new(WebhookSink::new(client))),
                ("email", email),
                ("push", Box::new(DisabledSink::new("push"))),
            ],
            config,
        ))
    }

    /// Deliver one alert, retrying transient failures until the attempt
    /// budget is exhausted. The terminal error is returned to the caller,
    /// which surfaces it to the delivery audit.
    #[tracing::instrument(skip_all, fields(alert = %alert.id, channel = alert.channel.kind()))]
    pub async fn dispatch(&self, alert: &AlertEvent) -> Result<Ack, DispatchError> {
        let kind = alert.channel.kind();
        let sink = self
            .sinks
            .get(kind)
            .ok_or_else(|| DispatchError::PermanentChannelFailure {
                channel: kind,
                reason: "no sink is configured for this channel".to_string(),
            })?;

        // The attempt budget is enforced by the loop below; Backoff only
        // shapes the pause between attempts.
        let mut backoff = Backoff::new(u32::MAX, self.backoff_min, Some(self.backoff_max));
        backoff.set_jitter(0.3);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match sink.send(alert).await {
                Ok(()) => {
                    metrics::counter!("alerts_delivered", "channel" => kind).increment(1);
                    return Ok(Ack {
                        alert_id: alert.id,
                        channel: kind,
                        attempts: attempt,
                        delivered_at: Utc::now(),
                    });
                }
                Err(error) => error,
            };

            let pause = match &error {
                DispatchError::Transient { .. } if attempt < self.max_attempts => {
                    backoff.next(attempt)
                }
                _ => None,
            };
            let Some(pause) = pause else {
                metrics::counter!("alerts_undeliverable", "channel" => kind).increment(1);
                return Err(error);
            };

            tracing::warn!(%error, attempt, pause = ?pause, "delivery attempt failed, backing off");
            tokio::time::sleep(pause).await;
        }
    }
}
