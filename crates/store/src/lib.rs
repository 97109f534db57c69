//! Bounded, ordered in-memory windows of recent solar events.

use chrono::{DateTime, Utc};
use models::{Category, Retention, SolarEvent, StoreConfig};
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;

/// Store keeps a bounded window of recent events for every category.
///
/// Writes to one category are serialized by its lock, and hold it across
/// the whole position-find-and-insert, so windows never interleave into a
/// mis-ordered state. Reads return snapshots and never block writers of
/// other categories.
pub struct Store {
    windows: BTreeMap<Category, RwLock<StateWindow>>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        let windows = Category::ALL
            .into_iter()
            .map(|category| (category, RwLock::new(StateWindow::new(config.retention))))
            .collect();
        Self { windows }
    }

    /// Insert the event into its category window, then evict entries
    /// beyond the retention bound. A late arrival lands at its ordered
    /// position; an event whose observed_at is already present revises
    /// the existing entry in place.
    pub fn insert(&self, event: SolarEvent) {
        self.window(event.category).write().unwrap().insert(event);
    }

    /// The newest event of the category.
    pub fn latest(&self, category: Category) -> Option<SolarEvent> {
        self.window(category).read().unwrap().events.back().cloned()
    }

    /// Up to `limit` newest events of the category, oldest first.
    pub fn recent(&self, category: Category, limit: usize) -> Vec<SolarEvent> {
        let window = self.window(category).read().unwrap();
        let mut out: Vec<SolarEvent> = window.events.iter().rev().take(limit).cloned().collect();
        out.reverse();
        out
    }

    /// Events of the category observed within `[from, until]`, oldest first.
    pub fn range(
        &self,
        category: Category,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<SolarEvent> {
        let window = self.window(category).read().unwrap();
        window
            .events
            .iter()
            .filter(|event| from <= event.observed_at && event.observed_at <= until)
            .cloned()
            .collect()
    }

    /// Number of retained events of the category.
    pub fn depth(&self, category: Category) -> usize {
        self.window(category).read().unwrap().events.len()
    }

    fn window(&self, category: Category) -> &RwLock<StateWindow> {
        // A window exists for every category by construction.
        &self.windows[&category]
    }
}

/// StateWindow is one category's ordered event window.
struct StateWindow {
    retention: Retention,
    /// Events in ascending observed_at order, at most one per observed_at.
    events: VecDeque<SolarEvent>,
}

impl StateWindow {
    fn new(retention: Retention) -> Self {
        Self {
            retention,
            events: VecDeque::new(),
        }
    }

    fn insert(&mut self, event: SolarEvent) {
        match self
            .events
            .binary_search_by(|existing| existing.observed_at.cmp(&event.observed_at))
        {
            Ok(at) => self.events[at] = event,
            Err(at) => self.events.insert(at, event),
        }
        self.evict();
    }

    fn evict(&mut self) {
        match self.retention {
            Retention::Count(limit) => {
                // A window always retains its newest event, even under a
                // zero-count bound.
                while self.events.len() > limit.max(1) {
                    self.events.pop_front();
                }
            }
            Retention::Age(age) => {
                let Some(newest) = self.events.back().map(|event| event.observed_at) else {
                    return;
                };
                let Ok(age) = chrono::Duration::from_std(age) else {
                    return;
                };
                let Some(horizon) = newest.checked_sub_signed(age) else {
                    return;
                };
                while self
                    .events
                    .front()
                    .is_some_and(|event| event.observed_at < horizon)
                {
                    self.events.pop_front();
                }
            }
        }
    }
}
