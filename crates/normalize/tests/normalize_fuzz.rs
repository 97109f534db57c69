use chrono::{DateTime, TimeZone, Utc};
use models::{Category, NormalizeConfig, Observation, SolarEvent, SourceId};
use normalize::{Normalizer, RejectReason};
use quickcheck::quickcheck;
use std::collections::BTreeMap;
use std::time::Duration;

fn fixture(minutes: u16, value: u8) -> Observation {
    let base = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
    Observation {
        source_id: SourceId::new(format!("source_{}", value % 3)),
        category: Category::GeomagneticIndex,
        observed_at: base + chrono::Duration::minutes(minutes as i64),
        fetched_at: base + chrono::Duration::minutes(minutes as i64),
        value: (value % 10) as f64,
        unit: "kp".to_string(),
        attributes: BTreeMap::new(),
    }
}

quickcheck! {
    // Staleness decisions match a reference model: an observation is
    // rejected exactly when it trails the newest accepted observation by
    // more than the limit.
    fn staleness_matches_reference(steps: Vec<(u16, u8)>) -> bool {
        let config = NormalizeConfig {
            stale_after: Duration::from_secs(3600),
            ..NormalizeConfig::default()
        };
        let mut normalizer = Normalizer::new(Category::GeomagneticIndex, &config);
        let mut newest: Option<DateTime<Utc>> = None;

        for (minutes, value) in steps {
            let observation = fixture(minutes, value);
            let observed_at = observation.observed_at;
            let expect_stale = newest
                .is_some_and(|newest| newest - observed_at > chrono::Duration::hours(1));

            match normalizer.normalize(observation) {
                Ok(event) => {
                    if expect_stale || event.observed_at != observed_at {
                        return false;
                    }
                    newest = Some(newest.map_or(observed_at, |n| n.max(observed_at)));
                }
                Err(RejectReason::StaleData { .. }) => {
                    if !expect_stale {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        true
    }

    // Under the average policy, every emitted event is the mean of the
    // latest contribution of each source at that timestamp.
    fn averages_match_reference(steps: Vec<(u16, u8)>) -> bool {
        let config = NormalizeConfig {
            stale_after: Duration::from_secs(u64::MAX / 4),
            ..NormalizeConfig::default()
        };
        let mut normalizer = Normalizer::new(Category::GeomagneticIndex, &config);
        let mut reference: BTreeMap<DateTime<Utc>, BTreeMap<SourceId, f64>> = BTreeMap::new();

        for (minutes, value) in steps {
            let observation = fixture(minutes, value);
            let slot = reference.entry(observation.observed_at).or_default();
            slot.insert(observation.source_id.clone(), observation.value);
            let expect: f64 = slot.values().sum::<f64>() / slot.len() as f64;

            let SolarEvent { value, sources, .. } = match normalizer.normalize(observation) {
                Ok(event) => event,
                Err(_) => return false,
            };
            if (value - expect).abs() > 1e-9 || sources.len() != slot.len() {
                return false;
            }
        }
        true
    }
}
