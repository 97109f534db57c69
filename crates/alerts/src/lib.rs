//! Threshold-crossing evaluation of user alert preferences.
//!
//! A RuleEngine holds a snapshot of registered preferences and one
//! RuleState per (user, category) pair. Evaluation of a new event runs
//! every rule registered for the event's category through a pure
//! transition function, and collects the alerts which fired.

mod preferences;

pub use preferences::{HttpPreferenceSource, PreferenceSource, StaticPreferences};

use chrono::{DateTime, Utc};
use models::{AlertEvent, AlertPreference, Category, SolarEvent, StormScale, TriggerPolicy};
use std::collections::BTreeMap;

/// RulePhase is where a rule stands in its trigger cycle.
///
/// `Triggered` is transient: a rule which fires enters `Cooldown` within
/// the same evaluation, so only `Idle` and `Cooldown` are ever observed
/// between evaluations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RulePhase {
    Idle,
    Cooldown,
}

/// RuleState is the evaluation state of one (user, category) pair.
/// It is created on first evaluation and never shared across users.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleState {
    pub phase: RulePhase,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_known_value: Option<f64>,
    /// Whether the comparison held at the previous evaluation.
    /// Edge-triggered rules re-arm only after this clears.
    satisfied: bool,
}

impl RuleState {
    fn new() -> Self {
        Self {
            phase: RulePhase::Idle,
            last_triggered_at: None,
            last_known_value: None,
            satisfied: false,
        }
    }
}

/// Evaluate one preference against a new event, updating `state` and
/// returning the alert to deliver if the rule fired.
///
/// Transitions, in order: a lapsed cooldown returns the rule to `Idle`;
/// an `Idle`, armed rule whose comparison is satisfied fires and enters
/// `Cooldown` within the same evaluation. Crossings observed while in
/// `Cooldown` update `last_known_value` but emit nothing.
fn evaluate_rule(
    policy: TriggerPolicy,
    preference: &AlertPreference,
    state: &mut RuleState,
    event: &SolarEvent,
    now: DateTime<Utc>,
) -> Option<AlertEvent> {
    let satisfied = preference
        .comparison
        .is_satisfied(event.value, preference.threshold);

    if state.phase == RulePhase::Cooldown {
        let lapsed = state.last_triggered_at.is_some_and(|at| {
            let cooldown = chrono::Duration::from_std(preference.cooldown)
                .unwrap_or(chrono::Duration::MAX);
            now.signed_duration_since(at) > cooldown
        });
        if lapsed {
            state.phase = RulePhase::Idle;
        }
    }

    let armed = match policy {
        TriggerPolicy::Edge => !state.satisfied,
        TriggerPolicy::Level => true,
    };
    let fires = satisfied && armed && state.phase == RulePhase::Idle;

    state.satisfied = satisfied;
    state.last_known_value = Some(event.value);

    if !fires {
        return None;
    }
    state.phase = RulePhase::Cooldown;
    state.last_triggered_at = Some(now);

    let scale = match event.category {
        Category::GeomagneticIndex | Category::GeomagneticForecast => {
            Some(StormScale::from_kp(event.value))
        }
        _ => None,
    };

    Some(AlertEvent {
        id: uuid::Uuid::new_v4(),
        user_id: preference.user_id,
        category: event.category,
        value: event.value,
        threshold: preference.threshold,
        comparison: preference.comparison,
        scale,
        observed_at: event.observed_at,
        triggered_at: now,
        channel: preference.channel.clone(),
    })
}

/// RuleEngine evaluates every registered preference of a category against
/// that category's newly arrived events.
pub struct RuleEngine {
    policy: TriggerPolicy,
    /// Current preference snapshot, indexed by category.
    preferences: BTreeMap<Category, Vec<AlertPreference>>,
    /// Rule state per (user, category).
    states: BTreeMap<(uuid::Uuid, Category), RuleState>,
}

impl RuleEngine {
    pub fn new(policy: TriggerPolicy) -> Self {
        Self {
            policy,
            preferences: BTreeMap::new(),
            states: BTreeMap::new(),
        }
    }

    /// Replace the preference snapshot. State of rules which no longer
    /// appear in the snapshot is dropped; surviving rules keep theirs, so
    /// a refresh never re-fires an alert already in cooldown.
    pub fn set_preferences(&mut self, preferences: Vec<AlertPreference>) {
        let mut index: BTreeMap<Category, Vec<AlertPreference>> = BTreeMap::new();
        for preference in preferences {
            index.entry(preference.category).or_default().push(preference);
        }

        self.states.retain(|(user_id, category), _| {
            index.get(category).is_some_and(|preferences| {
                preferences
                    .iter()
                    .any(|preference| preference.user_id == *user_id)
            })
        });
        self.preferences = index;
    }

    /// Number of registered preferences, across all categories.
    pub fn preference_count(&self) -> usize {
        self.preferences.values().map(Vec::len).sum()
    }

    /// Evaluate a newly arrived event against every preference registered
    /// for its category, returning the alerts which fired. Preferences of
    /// other categories, and other users' rule states, are untouched.
    pub fn evaluate(&mut self, event: &SolarEvent, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let Some(preferences) = self.preferences.get(&event.category) else {
            return Vec::new();
        };

        let mut fired = Vec::new();
        for preference in preferences {
            let state = self
                .states
                .entry((preference.user_id, event.category))
                .or_insert_with(RuleState::new);

            if let Some(alert) = evaluate_rule(self.policy, preference, state, event, now) {
                tracing::info!(
                    user = %alert.user_id,
                    category = %alert.category,
                    value = alert.value,
                    threshold = alert.threshold,
                    "alert rule fired"
                );
                fired.push(alert);
            }
        }
        fired
    }

    /// Current phase of one (user, category) rule, if it has ever evaluated.
    pub fn phase(&self, user_id: uuid::Uuid, category: Category) -> Option<RulePhase> {
        self.states.get(&(user_id, category)).map(|state| state.phase)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{Comparison, NotificationChannel};
    use std::time::Duration;

    fn user(n: u128) -> uuid::Uuid {
        uuid::Uuid::from_u128(n)
    }

    fn preference(n: u128, threshold: f64, comparison: Comparison) -> AlertPreference {
        AlertPreference {
            user_id: user(n),
            category: Category::GeomagneticIndex,
            threshold,
            comparison,
            cooldown: Duration::from_secs(3600),
            channel: NotificationChannel::Email {
                address: format!("user-{n}@example.com"),
            },
        }
    }

    fn event(seconds: i64, value: f64) -> SolarEvent {
        let observed_at = "2024-01-05T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
            + chrono::Duration::seconds(seconds);
        SolarEvent {
            category: Category::GeomagneticIndex,
            observed_at,
            value,
            sources: vec![models::SourceId::new("noaa_kp")],
            attributes: Default::default(),
        }
    }

    /// Feed `values` at 10s spacing and return the values which fired.
    fn run(engine: &mut RuleEngine, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .enumerate()
            .flat_map(|(i, value)| {
                let event = event(i as i64 * 10, *value);
                let now = event.observed_at;
                engine.evaluate(&event, now)
            })
            .map(|alert| alert.value)
            .collect()
    }

    #[test]
    fn test_single_crossing_fires_exactly_once() {
        let mut engine = RuleEngine::new(TriggerPolicy::Edge);
        engine.set_preferences(vec![preference(1, 5.0, Comparison::Above)]);

        // 3, 4, 6, 7, 4 fires once, at the first 6.
        assert_eq!(run(&mut engine, &[3.0, 4.0, 6.0, 7.0, 4.0]), vec![6.0]);
        assert_eq!(
            engine.phase(user(1), Category::GeomagneticIndex),
            Some(RulePhase::Cooldown)
        );
    }

    #[test]
    fn test_oscillation_within_cooldown_fires_at_most_once() {
        let mut engine = RuleEngine::new(TriggerPolicy::Edge);
        engine.set_preferences(vec![preference(1, 5.0, Comparison::Above)]);

        assert_eq!(
            run(&mut engine, &[6.0, 4.0, 6.0, 4.0, 7.0, 4.0, 8.0]),
            vec![6.0]
        );
    }

    #[test]
    fn test_below_comparison() {
        let mut engine = RuleEngine::new(TriggerPolicy::Edge);
        engine.set_preferences(vec![preference(1, 3.0, Comparison::Below)]);

        assert_eq!(run(&mut engine, &[5.0, 4.0, 3.0, 2.0, 5.0]), vec![3.0]);
    }

    #[test]
    fn test_edge_policy_requires_leaving_the_region() {
        let mut engine = RuleEngine::new(TriggerPolicy::Edge);
        let mut preference = preference(1, 5.0, Comparison::Above);
        preference.cooldown = Duration::from_secs(60);
        engine.set_preferences(vec![preference]);

        // Fires at 6.0. The value never drops below threshold, so even
        // though the 100s and 200s evaluations are past cooldown, the
        // rule stays disarmed.
        for (seconds, value) in [(0, 6.0), (100, 7.0), (200, 8.0)] {
            let event = event(seconds, value);
            let fired = engine.evaluate(&event, event.observed_at);
            assert_eq!(fired.len(), usize::from(seconds == 0), "at {seconds}s");
        }

        // Leaving and returning re-fires.
        let event_low = event(300, 4.0);
        assert!(engine.evaluate(&event_low, event_low.observed_at).is_empty());
        let event_high = event(400, 6.5);
        let fired = engine.evaluate(&event_high, event_high.observed_at);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].value, 6.5);
    }

    #[test]
    fn test_level_policy_refires_after_cooldown() {
        let mut engine = RuleEngine::new(TriggerPolicy::Level);
        let mut pref = preference(1, 5.0, Comparison::Above);
        pref.cooldown = Duration::from_secs(60);
        engine.set_preferences(vec![pref]);

        // Fires at 0s; 30s is within cooldown; 61s re-fires without the
        // value ever leaving the region; 100s is back inside the second
        // cooldown.
        for (seconds, value, expect) in [(0, 6.0, 1), (30, 7.0, 0), (61, 7.0, 1), (100, 7.0, 0)] {
            let event = event(seconds, value);
            let fired = engine.evaluate(&event, event.observed_at);
            assert_eq!(fired.len(), expect, "at {seconds}s");
        }
    }

    #[test]
    fn test_users_and_categories_are_isolated() {
        let mut engine = RuleEngine::new(TriggerPolicy::Edge);
        let mut aurora = preference(2, 50.0, Comparison::Above);
        aurora.category = Category::AuroraProbability;
        engine.set_preferences(vec![
            preference(1, 5.0, Comparison::Above),
            preference(2, 7.0, Comparison::Above),
            aurora,
        ]);

        let fired = run(&mut engine, &[6.0, 7.5]);
        // User 1 fires at 6.0; user 2 only once 7.5 arrives.
        assert_eq!(fired, vec![6.0, 7.5]);

        // A geomagnetic event never touches the aurora rule.
        assert_eq!(
            engine.phase(user(2), Category::AuroraProbability),
            None
        );
    }

    #[test]
    fn test_fired_alert_carries_rule_and_scale() {
        let mut engine = RuleEngine::new(TriggerPolicy::Edge);
        engine.set_preferences(vec![preference(1, 5.0, Comparison::Above)]);

        let event = event(0, 6.33);
        let fired = engine.evaluate(&event, event.observed_at);
        assert_eq!(fired.len(), 1);

        let alert = &fired[0];
        assert_eq!(alert.user_id, user(1));
        assert_eq!(alert.category, Category::GeomagneticIndex);
        assert_eq!(alert.value, 6.33);
        assert_eq!(alert.threshold, 5.0);
        assert_eq!(alert.scale, Some(StormScale::Strong));
        assert_eq!(alert.observed_at, event.observed_at);
        assert_eq!(alert.triggered_at, event.observed_at);
        assert_eq!(alert.channel.kind(), "email");
    }

    #[test]
    fn test_removed_preference_drops_state_and_survivors_keep_theirs() {
        let mut engine = RuleEngine::new(TriggerPolicy::Edge);
        engine.set_preferences(vec![
            preference(1, 5.0, Comparison::Above),
            preference(2, 5.0, Comparison::Above),
        ]);
        assert_eq!(run(&mut engine, &[6.0]).len(), 2);

        // User 2's rule is withdrawn; user 1's cooldown survives the refresh.
        engine.set_preferences(vec![preference(1, 5.0, Comparison::Above)]);
        assert_eq!(engine.phase(user(2), Category::GeomagneticIndex), None);
        assert_eq!(
            engine.phase(user(1), Category::GeomagneticIndex),
            Some(RulePhase::Cooldown)
        );

        let event = event(10, 7.0);
        assert!(engine.evaluate(&event, event.observed_at).is_empty());
    }

    #[test]
    fn test_no_preferences_for_category_is_a_no_op() {
        let mut engine = RuleEngine::new(TriggerPolicy::Edge);
        let event = event(0, 9.0);
        assert!(engine.evaluate(&event, event.observed_at).is_empty());
        assert_eq!(engine.preference_count(), 0);
    }
}
