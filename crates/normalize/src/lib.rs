//! Normalization of raw observations into canonical solar events.
//!
//! A Normalizer owns the normalization state of a single category. It
//! converts reported units into the category's canonical unit, rejects
//! observations which trail too far behind the newest accepted event, and
//! merges same-timestamp readings from different sources under a
//! configured policy. Re-processing an identical observation re-merges to
//! an identical event.

use chrono::{DateTime, Utc};
use models::{Category, MergePolicy, NormalizeConfig, Observation, SolarEvent, SourceId};
use std::collections::BTreeMap;

/// RejectReason is why an observation was dropped during normalization.
/// Rejections don't affect normalization state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    /// The observation trails the newest accepted event of its category
    /// by more than the staleness limit.
    #[error("observation at {observed_at} trails the newest accepted event at {newest} beyond the staleness limit")]
    StaleData {
        observed_at: DateTime<Utc>,
        newest: DateTime<Utc>,
    },
    /// The reported unit has no conversion into the canonical unit.
    #[error("no conversion from {unit:?} into canonical {canonical:?}")]
    UnitConversionFailure {
        unit: String,
        canonical: &'static str,
    },
}

/// UnitTable converts reported units into a category's canonical unit by
/// a multiplicative factor. The canonical unit itself always converts.
pub struct UnitTable {
    canonical: &'static str,
    factors: BTreeMap<String, f64>,
}

impl UnitTable {
    pub fn new(category: Category, configured: BTreeMap<String, f64>) -> Self {
        let mut factors = BTreeMap::new();
        match category {
            Category::GeomagneticIndex | Category::GeomagneticForecast => (),
            Category::AuroraProbability => {
                factors.insert("fraction".to_string(), 100.0);
            }
            Category::SolarImagery => {
                factors.insert("nanometer".to_string(), 10.0);
            }
        }
        factors.extend(configured);

        Self {
            canonical: category.canonical_unit(),
            factors,
        }
    }

    pub fn convert(&self, value: f64, unit: &str) -> Result<f64, RejectReason> {
        if unit == self.canonical {
            return Ok(value);
        }
        match self.factors.get(unit) {
            Some(factor) => Ok(value * factor),
            None => Err(RejectReason::UnitConversionFailure {
                unit: unit.to_string(),
                canonical: self.canonical,
            }),
        }
    }
}

/// One source's reading at a particular observed_at.
struct Contribution {
    value: f64,
    attributes: BTreeMap<String, String>,
}

/// Normalizer owns normalization state for one category.
pub struct Normalizer {
    category: Category,
    units: UnitTable,
    merge: MergePolicy,
    stale_after: chrono::Duration,
    /// Contributions per observed_at, keyed by source. An identical
    /// replayed observation replaces its own prior contribution.
    /// Timestamps which fall behind the staleness horizon are pruned,
    /// which bounds the window.
    window: BTreeMap<DateTime<Utc>, BTreeMap<SourceId, Contribution>>,
    /// Newest observed_at accepted so far.
    newest: Option<DateTime<Utc>>,
}

impl Normalizer {
    pub fn new(category: Category, config: &NormalizeConfig) -> Self {
        let configured = config
            .conversions
            .get(&category)
            .cloned()
            .unwrap_or_default();

        Self {
            category,
            units: UnitTable::new(category, configured),
            merge: config.merge.clone(),
            stale_after: chrono::Duration::from_std(config.stale_after)
                .unwrap_or(chrono::Duration::MAX),
            window: BTreeMap::new(),
            newest: None,
        }
    }

    /// Normalize one observation into the merged event at its observed_at.
    ///
    /// The returned event may revise an event previously emitted for the
    /// same observed_at, when another source contributes a reading for a
    /// timestamp already seen. Callers upsert by observed_at.
    pub fn normalize(&mut self, observation: Observation) -> Result<SolarEvent, RejectReason> {
        if let Some(newest) = self.newest {
            if newest - observation.observed_at > self.stale_after {
                return Err(RejectReason::StaleData {
                    observed_at: observation.observed_at,
                    newest,
                });
            }
        }
        let value = self.units.convert(observation.value, &observation.unit)?;

        let observed_at = observation.observed_at;
        self.window.entry(observed_at).or_default().insert(
            observation.source_id,
            Contribution {
                value,
                attributes: observation.attributes,
            },
        );

        self.newest = Some(self.newest.map_or(observed_at, |newest| newest.max(observed_at)));
        if let Some(horizon) = self
            .newest
            .and_then(|newest| newest.checked_sub_signed(self.stale_after))
        {
            self.window = self.window.split_off(&horizon);
        }

        let contributions = &self.window[&observed_at];
        let (value, sources, attributes) = merge_contributions(&self.merge, contributions);

        Ok(SolarEvent {
            category: self.category,
            observed_at,
            value,
            sources,
            attributes,
        })
    }
}

/// Resolve the contributions at one observed_at into a single value under
/// `policy`, along with the contributing sources and merged attributes.
fn merge_contributions(
    policy: &MergePolicy,
    contributions: &BTreeMap<SourceId, Contribution>,
) -> (f64, Vec<SourceId>, BTreeMap<String, String>) {
    let sources: Vec<SourceId> = contributions.keys().cloned().collect();

    match policy {
        MergePolicy::Average => {
            let sum: f64 = contributions.values().map(|c| c.value).sum();
            let mut attributes = BTreeMap::new();
            for contribution in contributions.values() {
                attributes.extend(contribution.attributes.clone());
            }
            (sum / contributions.len() as f64, sources, attributes)
        }
        MergePolicy::SourcePriority(order) => {
            let chosen = order
                .iter()
                .find_map(|id| contributions.get_key_value(id))
                .or_else(|| contributions.first_key_value())
                .unwrap();
            (chosen.1.value, sources, chosen.1.attributes.clone())
        }
    }
}
