use super::{Category, SourceId, TriggerPolicy};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Config is the root configuration of the aurora-watch agent,
/// typically loaded from a YAML file.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    /// # Sources to poll for observations.
    pub sources: Vec<SourceDef>,
    /// # Normalization of raw observations into events.
    #[serde(default)]
    pub normalize: NormalizeConfig,
    /// # Retention of recent events, per category.
    #[serde(default)]
    pub store: StoreConfig,
    /// # Alert rule evaluation.
    #[serde(default)]
    pub alerts: AlertConfig,
    /// # Delivery of triggered alerts.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// # Source health tracking.
    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    pub fn example() -> Self {
        Self {
            sources: vec![
                SourceDef {
                    id: SourceId::new("noaa_kp"),
                    provider: AdapterProvider::NoaaKIndex,
                    endpoint: None,
                    interval: SourceDef::default_interval(),
                    timeout: SourceDef::default_timeout(),
                    min_latitude: None,
                    channel: None,
                },
                SourceDef {
                    id: SourceId::new("noaa_kp_forecast"),
                    provider: AdapterProvider::NoaaKForecast,
                    endpoint: None,
                    interval: Duration::from_secs(300),
                    timeout: SourceDef::default_timeout(),
                    min_latitude: None,
                    channel: None,
                },
            ],
            normalize: NormalizeConfig::default(),
            store: StoreConfig::default(),
            alerts: AlertConfig::default(),
            dispatch: DispatchConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// SourceDef is one configured upstream source and its fetch schedule.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SourceDef {
    /// # Unique name of this source.
    pub id: SourceId,
    /// # Adapter which fetches and decodes this source.
    pub provider: AdapterProvider,
    /// # Endpoint to fetch, overriding the provider default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,
    /// # Interval between fetches.
    /// Intervals are relative to the start of a fetch and not its completion,
    /// and a fetch which is still running when its next interval arrives is
    /// not run twice.
    #[serde(default = "SourceDef::default_interval", with = "humantime_serde")]
    #[schemars(schema_with = "crate::duration_schema")]
    pub interval: Duration,
    /// # Timeout applied to each fetch.
    #[serde(default = "SourceDef::default_timeout", with = "humantime_serde")]
    #[schemars(schema_with = "crate::duration_schema")]
    pub timeout: Duration,
    /// # Lowest latitude (degrees north) reduced from the OVATION grid.
    /// Only meaningful for the noaa_ovation provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_latitude: Option<f64>,
    /// # AIA wavelength channel (angstrom) to monitor.
    /// Only meaningful for the sdo_imagery provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
}

impl SourceDef {
    pub fn default_interval() -> Duration {
        Duration::from_secs(60)
    }
    pub fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }
}

/// AdapterProvider selects the concrete adapter implementation for a source.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterProvider {
    /// # NOAA SWPC planetary K-index observations.
    NoaaKIndex,
    /// # NOAA SWPC planetary K-index forecast.
    NoaaKForecast,
    /// # NOAA SWPC OVATION aurora probability grid.
    NoaaOvation,
    /// # SDO AIA imagery index.
    SdoImagery,
}

impl AdapterProvider {
    /// Category of the observations this provider produces.
    pub fn category(&self) -> Category {
        match self {
            AdapterProvider::NoaaKIndex => Category::GeomagneticIndex,
            AdapterProvider::NoaaKForecast => Category::GeomagneticForecast,
            AdapterProvider::NoaaOvation => Category::AuroraProbability,
            AdapterProvider::SdoImagery => Category::SolarImagery,
        }
    }
}

/// NormalizeConfig controls conversion and merging of raw observations.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct NormalizeConfig {
    /// # Staleness limit for accepted observations.
    /// An observation older than the most recently accepted event of its
    /// category by more than this limit is rejected.
    #[serde(default = "NormalizeConfig::default_stale_after", with = "humantime_serde")]
    #[schemars(schema_with = "crate::duration_schema")]
    pub stale_after: Duration,
    /// # Policy for combining same-timestamp readings from multiple sources.
    #[serde(default)]
    pub merge: MergePolicy,
    /// # Additional unit conversions, as unit name to canonical-unit factor, per category.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conversions: BTreeMap<Category, BTreeMap<String, f64>>,
}

impl NormalizeConfig {
    pub fn default_stale_after() -> Duration {
        Duration::from_secs(6 * 3600)
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            stale_after: Self::default_stale_after(),
            merge: MergePolicy::default(),
            conversions: BTreeMap::new(),
        }
    }
}

/// MergePolicy resolves multiple same-timestamp readings of one category
/// into a single event value.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub enum MergePolicy {
    /// # Average the values of all contributing sources.
    #[default]
    Average,
    /// # Keep the value of the first listed source which reported.
    SourcePriority(Vec<SourceId>),
}

/// StoreConfig bounds the in-memory event window kept per category.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, Copy, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct StoreConfig {
    /// # Retention bound applied to each category window.
    #[serde(default)]
    pub retention: Retention,
}

/// Retention bounds a category window by event count or by age.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub enum Retention {
    /// # Keep at most this many events.
    Count(usize),
    /// # Keep events observed within this duration of the newest event.
    Age(
        #[serde(with = "humantime_serde")]
        #[schemars(schema_with = "crate::duration_schema")]
        Duration,
    ),
}

impl Default for Retention {
    fn default() -> Self {
        Retention::Count(256)
    }
}

/// AlertConfig controls rule evaluation and preference refresh.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AlertConfig {
    /// # When a rule whose comparison still holds may fire again.
    #[serde(default)]
    pub trigger_policy: TriggerPolicy,
    /// # Endpoint from which user preferences are fetched.
    /// When unset, the agent runs with an empty preference set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences_url: Option<Url>,
    /// # Interval between preference refreshes.
    #[serde(
        default = "AlertConfig::default_refresh_interval",
        with = "humantime_serde"
    )]
    #[schemars(schema_with = "crate::duration_schema")]
    pub refresh_interval: Duration,
}

impl AlertConfig {
    pub fn default_refresh_interval() -> Duration {
        Duration::from_secs(60)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            trigger_policy: TriggerPolicy::default(),
            preferences_url: None,
            refresh_interval: Self::default_refresh_interval(),
        }
    }
}

/// DispatchConfig controls alert delivery and its retry behavior.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DispatchConfig {
    /// # Maximum delivery attempts per alert, including the first.
    #[serde(default = "DispatchConfig::default_max_attempts")]
    pub max_attempts: u32,
    /// # Initial backoff between delivery attempts.
    #[serde(default = "DispatchConfig::default_backoff_min", with = "humantime_serde")]
    #[schemars(schema_with = "crate::duration_schema")]
    pub backoff_min: Duration,
    /// # Upper bound on backoff between delivery attempts.
    #[serde(default = "DispatchConfig::default_backoff_max", with = "humantime_serde")]
    #[schemars(schema_with = "crate::duration_schema")]
    pub backoff_max: Duration,
    /// # Maximum alerts being delivered concurrently.
    #[serde(default = "DispatchConfig::default_concurrency")]
    pub concurrency: usize,
    /// # Request timeout for outbound deliveries.
    #[serde(default = "DispatchConfig::default_timeout", with = "humantime_serde")]
    #[schemars(schema_with = "crate::duration_schema")]
    pub timeout: Duration,
    /// # Endpoint of the relay which accepts email notifications.
    /// When unset, email-channel alerts are logged and dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_relay: Option<Url>,
}

impl DispatchConfig {
    pub fn default_max_attempts() -> u32 {
        4
    }
    pub fn default_backoff_min() -> Duration {
        Duration::from_secs(1)
    }
    pub fn default_backoff_max() -> Duration {
        Duration::from_secs(60)
    }
    pub fn default_concurrency() -> usize {
        8
    }
    pub fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            backoff_min: Self::default_backoff_min(),
            backoff_max: Self::default_backoff_max(),
            concurrency: Self::default_concurrency(),
            timeout: Self::default_timeout(),
            email_relay: None,
        }
    }
}

/// HealthConfig controls when a source is considered stale.
#[derive(Serialize, Deserialize, Debug, JsonSchema, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HealthConfig {
    /// # Consecutive fetch failures after which a source's data is marked stale.
    #[serde(default = "HealthConfig::default_stale_after_failures")]
    pub stale_after_failures: u32,
}

impl HealthConfig {
    pub fn default_stale_after_failures() -> u32 {
        5
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after_failures: Self::default_stale_after_failures(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_from_yaml() {
        let config: Config = serde_yaml::from_str(
            r##"
sources:
  - id: noaa_kp
    provider: noaa_k_index
    interval: 60s
  - id: swpc_estimate
    provider: noaa_k_index
    endpoint: https://example.com/planetary-k-index.json
    interval: 2m
    timeout: 5s
normalize:
  staleAfter: 3h
  merge:
    sourcePriority: [noaa_kp, swpc_estimate]
store:
  retention:
    age: 24h
alerts:
  triggerPolicy: level
  preferencesUrl: https://example.com/preferences
  refreshInterval: 30s
dispatch:
  maxAttempts: 3
  backoffMin: 2s
"##,
        )
        .unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].interval, Duration::from_secs(60));
        assert_eq!(config.sources[0].timeout, SourceDef::default_timeout());
        assert_eq!(config.sources[1].timeout, Duration::from_secs(5));
        assert_eq!(config.normalize.stale_after, Duration::from_secs(3 * 3600));
        assert_eq!(
            config.normalize.merge,
            MergePolicy::SourcePriority(vec![
                SourceId::new("noaa_kp"),
                SourceId::new("swpc_estimate")
            ])
        );
        assert_eq!(
            config.store.retention,
            Retention::Age(Duration::from_secs(24 * 3600))
        );
        assert_eq!(config.alerts.trigger_policy, TriggerPolicy::Level);
        assert_eq!(config.alerts.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.dispatch.backoff_min, Duration::from_secs(2));
        // Un-named sections take their defaults.
        assert_eq!(config.health, HealthConfig::default());
        assert_eq!(
            config.dispatch.backoff_max,
            DispatchConfig::default_backoff_max()
        );
    }

    #[test]
    fn test_config_round_trip() {
        let config = Config::example();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = serde_yaml::from_str::<Config>(
            r#"
sources: []
stor:
  retention:
    count: 10
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_provider_categories() {
        assert_eq!(
            AdapterProvider::NoaaKIndex.category(),
            Category::GeomagneticIndex
        );
        assert_eq!(
            AdapterProvider::NoaaKForecast.category(),
            Category::GeomagneticForecast
        );
        assert_eq!(
            AdapterProvider::NoaaOvation.category(),
            Category::AuroraProbability
        );
        assert_eq!(
            AdapterProvider::SdoImagery.category(),
            Category::SolarImagery
        );
    }
}
