use super::{Category, StormScale};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Comparison relates an observed value to a rule threshold.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
}

impl Comparison {
    /// Whether `value` satisfies this comparison against `threshold`.
    /// Both directions are inclusive of the threshold itself.
    pub fn is_satisfied(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Above => value >= threshold,
            Comparison::Below => value <= threshold,
        }
    }
}

/// NotificationChannel is the means by which an alert reaches its user.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub enum NotificationChannel {
    /// # Deliver by email.
    Email { address: String },
    /// # Deliver to a webhook endpoint.
    Webhook { url: Url },
    /// # Deliver as a mobile push notification.
    #[serde(rename_all = "camelCase")]
    Push { device_token: String },
}

impl NotificationChannel {
    /// Stable name of the channel kind, used for sink routing and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationChannel::Email { .. } => "email",
            NotificationChannel::Webhook { .. } => "webhook",
            NotificationChannel::Push { .. } => "push",
        }
    }
}

/// TriggerPolicy controls when a rule whose comparison still holds may
/// fire again after its cooldown has elapsed.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// # Fire only when the comparison transitions from unsatisfied to satisfied.
    #[default]
    Edge,
    /// # Fire whenever the comparison holds and the rule is out of cooldown.
    Level,
}

/// AlertPreference is one user's registered alerting rule: notify over a
/// channel when events of a category cross a threshold. A user holds at
/// most one rule per category.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AlertPreference {
    /// # User which owns this rule.
    pub user_id: uuid::Uuid,
    /// # Category of events the rule evaluates.
    pub category: Category,
    /// # Threshold against which event values are compared.
    pub threshold: f64,
    /// # Direction of the comparison.
    pub comparison: Comparison,
    /// # Minimum interval between consecutive alerts of this rule.
    #[serde(default = "AlertPreference::default_cooldown", with = "humantime_serde")]
    #[schemars(schema_with = "crate::duration_schema")]
    pub cooldown: Duration,
    /// # Channel to which alerts are delivered.
    pub channel: NotificationChannel,
}

impl AlertPreference {
    pub fn default_cooldown() -> Duration {
        Duration::from_secs(3600)
    }

    pub fn example() -> Self {
        Self {
            user_id: uuid::Uuid::nil(),
            category: Category::GeomagneticIndex,
            threshold: 5.0,
            comparison: Comparison::Above,
            cooldown: Self::default_cooldown(),
            channel: NotificationChannel::Email {
                address: "skywatcher@example.com".to_string(),
            },
        }
    }
}

/// AlertEvent is the outcome of a rule firing: a single notification to
/// be delivered to its user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlertEvent {
    /// Unique id of this alert, assigned when the rule fires.
    pub id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub category: Category,
    /// Value which satisfied the rule.
    pub value: f64,
    /// Threshold the rule compares against.
    pub threshold: f64,
    pub comparison: Comparison,
    /// Severity band of the triggering value, for Kp-valued categories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<StormScale>,
    /// Moment the triggering event was observed.
    pub observed_at: DateTime<Utc>,
    /// Moment the rule fired.
    pub triggered_at: DateTime<Utc>,
    /// Channel over which to deliver.
    pub channel: NotificationChannel,
}
