use models::{HealthConfig, SourceId};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// SourceHealth is the externally visible health of one source, consumed
/// by the presentation collaborator as its "data stale" indicator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SourceHealth {
    pub source_id: SourceId,
    pub consecutive_failures: u32,
    pub stale: bool,
}

/// HealthBoard tracks consecutive fetch failures per source. A source
/// turns stale after the configured failure count, and one success
/// clears it.
pub struct HealthBoard {
    stale_after_failures: u32,
    failures: Mutex<BTreeMap<SourceId, u32>>,
}

impl HealthBoard {
    pub fn new(config: HealthConfig, sources: impl IntoIterator<Item = SourceId>) -> Self {
        Self {
            stale_after_failures: config.stale_after_failures.max(1),
            failures: Mutex::new(sources.into_iter().map(|id| (id, 0)).collect()),
        }
    }

    pub fn record_success(&self, source_id: &SourceId) {
        let mut failures = self.failures.lock().unwrap();
        if let Some(count) = failures.get_mut(source_id) {
            if *count >= self.stale_after_failures {
                tracing::info!(source = %source_id, "source recovered, clearing stale indicator");
            }
            *count = 0;
        }
        metrics::counter!("source_fetches", "source" => source_id.to_string(), "outcome" => "ok")
            .increment(1);
    }

    pub fn record_failure(&self, source_id: &SourceId) {
        let mut failures = self.failures.lock().unwrap();
        if let Some(count) = failures.get_mut(source_id) {
            *count += 1;
            if *count == self.stale_after_failures {
                tracing::warn!(
                    source = %source_id,
                    failures = *count,
                    "source data is now considered stale"
                );
            }
        }
        metrics::counter!("source_fetches", "source" => source_id.to_string(), "outcome" => "err")
            .increment(1);
    }

    pub fn is_stale(&self, source_id: &SourceId) -> bool {
        self.failures
            .lock()
            .unwrap()
            .get(source_id)
            .is_some_and(|count| *count >= self.stale_after_failures)
    }

    /// Health of every registered source.
    pub fn report(&self) -> Vec<SourceHealth> {
        self.failures
            .lock()
            .unwrap()
            .iter()
            .map(|(source_id, count)| SourceHealth {
                source_id: source_id.clone(),
                consecutive_failures: *count,
                stale: *count >= self.stale_after_failures,
            })
            .collect()
    }
}
