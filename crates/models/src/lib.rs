mod alert;
mod category;
mod config;
mod observation;

pub use alert::{AlertEvent, AlertPreference, Comparison, NotificationChannel, TriggerPolicy};
pub use category::{Category, StormScale};
pub use config::{
    AdapterProvider, AlertConfig, Config, DispatchConfig, HealthConfig, MergePolicy,
    NormalizeConfig, Retention, SourceDef, StoreConfig,
};
pub use observation::{Observation, SolarEvent, SourceId};

fn duration_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": ["string", "null"],
        "pattern": "^\\d+(s|m|h)$"
    }))
    .unwrap()
}
