use super::Category;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// SourceId names a configured upstream source, like "noaa_kp" or "sdo_aia".
#[derive(
    Serialize, Deserialize, Debug, JsonSchema, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observation is a single raw reading produced by a source adapter,
/// prior to normalization.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Observation {
    /// Source which produced this reading.
    pub source_id: SourceId,
    /// Category of activity being reported.
    pub category: Category,
    /// Moment at which the reading was observed upstream.
    pub observed_at: DateTime<Utc>,
    /// Moment at which the adapter fetched the reading.
    pub fetched_at: DateTime<Utc>,
    /// Reported value, expressed in `unit`.
    pub value: f64,
    /// Unit of `value` as reported by the source.
    pub unit: String,
    /// Additional source-specific fields carried through to the event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Observation {
    pub fn example() -> Self {
        Self {
            source_id: SourceId::new("noaa_kp"),
            category: Category::GeomagneticIndex,
            observed_at: "2024-01-05T03:00:00Z".parse().unwrap(),
            fetched_at: "2024-01-05T03:04:10Z".parse().unwrap(),
            value: 5.33,
            unit: "kp".to_string(),
            attributes: BTreeMap::new(),
        }
    }
}

/// SolarEvent is a normalized reading in the canonical unit of its
/// category, ready for storage and alert evaluation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SolarEvent {
    pub category: Category,
    /// Moment at which the reading was observed upstream.
    pub observed_at: DateTime<Utc>,
    /// Value converted into the category's canonical unit.
    pub value: f64,
    /// Sources whose readings contributed to this event.
    pub sources: Vec<SourceId>,
    /// Source-specific fields carried over from the contributing observations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl SolarEvent {
    pub fn example() -> Self {
        Self {
            category: Category::GeomagneticIndex,
            observed_at: "2024-01-05T03:00:00Z".parse().unwrap(),
            value: 5.33,
            sources: vec![SourceId::new("noaa_kp")],
            attributes: BTreeMap::new(),
        }
    }
}
