//! # Change Tracker
//! Remembers the last status seen per item id and logs transitions.
//!
//! - First sighting of an id only seeds the index; no entry is logged.
//! - A later sighting with a different status appends a [`ChangeEntry`].
//! - Entries live for the retention window (24h). Pruning happens on every
//!   `record` and `read`, never on a timer.
//! - The status index is capped; past the cap the ids not observed for the
//!   most record cycles are dropped first.
//!
//! Everything sits behind one mutex, held only for in-memory work.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;

use crate::providers::types::{CanonicalItem, Provider};

pub const RETENTION_WINDOW_HOURS: i64 = 24;
pub const DEFAULT_INDEX_CAP: usize = 10_000;

/// One detected status transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChangeEntry {
    pub at: DateTime<Utc>,
    pub from: String,
    pub to: String,
    /// Item as it looked when the change was detected.
    pub item: CanonicalItem,
}

#[derive(Debug)]
struct Seen {
    status: String,
    last_cycle: u64,
}

#[derive(Debug, Default)]
struct Inner {
    index: HashMap<String, Seen>,
    log: VecDeque<ChangeEntry>,
    cycle: u64,
}

#[derive(Debug)]
pub struct ChangeTracker {
    provider: Provider,
    inner: Mutex<Inner>,
    retention: Duration,
    index_cap: usize,
}

impl ChangeTracker {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            inner: Mutex::new(Inner::default()),
            retention: Duration::hours(RETENTION_WINDOW_HOURS),
            index_cap: DEFAULT_INDEX_CAP,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// `0` leaves the index unbounded.
    pub fn with_index_cap(mut self, cap: usize) -> Self {
        self.index_cap = cap;
        self
    }

    /// Compare `items` against the index. Returns how many transitions were logged.
    pub fn record(&self, items: &[CanonicalItem]) -> usize {
        self.record_at(items, Utc::now())
    }

    pub fn record_at(&self, items: &[CanonicalItem], now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.prune(&mut inner, now);

        inner.cycle += 1;
        let cycle = inner.cycle;
        let mut added = 0usize;

        let Inner { index, log, .. } = &mut *inner;
        for it in items {
            match index.entry(it.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Seen {
                        status: it.status.clone(),
                        last_cycle: cycle,
                    });
                }
                Entry::Occupied(mut slot) => {
                    let seen = slot.get_mut();
                    seen.last_cycle = cycle;
                    if seen.status != it.status {
                        log.push_back(ChangeEntry {
                            at: now,
                            from: std::mem::replace(&mut seen.status, it.status.clone()),
                            to: it.status.clone(),
                            item: it.clone(),
                        });
                        added += 1;
                    }
                }
            }
        }

        self.enforce_cap(&mut inner);

        if added > 0 {
            counter!("status_changes_total", "provider" => self.provider.as_str())
                .increment(added as u64);
            tracing::info!(provider = self.provider.as_str(), changes = added, "status changes detected");
        }
        added
    }

    /// Changes still inside the retention window, oldest first.
    pub fn read(&self) -> Vec<ChangeEntry> {
        self.read_at(Utc::now())
    }

    pub fn read_at(&self, now: DateTime<Utc>) -> Vec<ChangeEntry> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.prune(&mut inner, now);
        inner.log.iter().cloned().collect()
    }

    /// Number of ids in the status index.
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).index.len()
    }

    fn prune(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let retention = self.retention;
        inner.log.retain(|e| now - e.at < retention);
    }

    fn enforce_cap(&self, inner: &mut Inner) {
        if self.index_cap == 0 || inner.index.len() <= self.index_cap {
            return;
        }
        let excess = inner.index.len() - self.index_cap;
        let mut by_age: Vec<(u64, String)> = inner
            .index
            .iter()
            .map(|(id, seen)| (seen.last_cycle, id.clone()))
            .collect();
        by_age.sort_unstable();
        for (_, id) in by_age.into_iter().take(excess) {
            inner.index.remove(&id);
        }
        tracing::debug!(
            provider = self.provider.as_str(),
            evicted = excess,
            "status index over cap"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str, status: &str) -> CanonicalItem {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        CanonicalItem {
            id: id.into(),
            slug: id.into(),
            title: format!("Item {id}"),
            status: status.into(),
            category: None,
            created_at: ts,
            last_modified: ts,
            released_at: None,
            url: String::new(),
            content_html: String::new(),
            content_text: String::new(),
            upvotes: None,
            pinned: None,
            network: None,
            project_lead: None,
            page: 1,
            source: Provider::Hive,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_sighting_records_nothing() {
        let tr = ChangeTracker::new(Provider::Hive);
        assert_eq!(tr.record_at(&[item("x", "In Progress")], t0()), 0);
        assert!(tr.read_at(t0()).is_empty());
        assert_eq!(tr.tracked(), 1);
    }

    #[test]
    fn transition_then_idempotent_repeat() {
        let tr = ChangeTracker::new(Provider::Hive);
        tr.record_at(&[item("x", "In Progress")], t0());
        assert_eq!(tr.record_at(&[item("x", "Released")], t0()), 1);
        assert_eq!(tr.record_at(&[item("x", "Released")], t0()), 0);

        let log = tr.read_at(t0());
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].from, "In Progress");
        assert_eq!(log[0].to, "Released");
        assert_eq!(log[0].item.status, "Released");
    }

    #[test]
    fn vanished_item_is_still_compared_on_return() {
        let tr = ChangeTracker::new(Provider::Hive);
        tr.record_at(&[item("x", "Testing"), item("y", "Testing")], t0());
        tr.record_at(&[item("y", "Testing")], t0());
        assert_eq!(tr.record_at(&[item("x", "Released")], t0()), 1);
    }

    #[test]
    fn retention_boundary() {
        let tr = ChangeTracker::new(Provider::Hive);
        tr.record_at(&[item("x", "A")], t0());
        tr.record_at(&[item("x", "B")], t0());

        let window = Duration::hours(RETENTION_WINDOW_HOURS);
        let just_inside = t0() + window - Duration::milliseconds(1);
        assert_eq!(tr.read_at(just_inside).len(), 1);

        let just_outside = t0() + window + Duration::milliseconds(1);
        assert!(tr.read_at(just_outside).is_empty());
    }

    #[test]
    fn record_prunes_before_appending() {
        let tr = ChangeTracker::new(Provider::Hive).with_retention(Duration::minutes(10));
        tr.record_at(&[item("x", "A")], t0());
        tr.record_at(&[item("x", "B")], t0());
        let later = t0() + Duration::minutes(11);
        tr.record_at(&[item("x", "C")], later);
        let log = tr.read_at(later);
        assert_eq!(log.len(), 1);
        assert_eq!((log[0].from.as_str(), log[0].to.as_str()), ("B", "C"));
    }

    #[test]
    fn cap_evicts_least_recently_observed() {
        let tr = ChangeTracker::new(Provider::Cubecraft).with_index_cap(2);
        tr.record_at(&[item("old", "A")], t0());
        tr.record_at(&[item("mid", "A")], t0());
        tr.record_at(&[item("new", "A")], t0());
        assert_eq!(tr.tracked(), 2);
        // "old" was evicted, so its next sighting is a fresh first observation.
        assert_eq!(tr.record_at(&[item("old", "B")], t0()), 0);
        // "new" survived and still produces transitions.
        assert_eq!(tr.record_at(&[item("new", "B")], t0()), 1);
    }

    #[test]
    fn zero_cap_is_unbounded() {
        let tr = ChangeTracker::new(Provider::Hive).with_index_cap(0);
        let items: Vec<_> = (0..50).map(|i| item(&i.to_string(), "A")).collect();
        tr.record_at(&items, t0());
        assert_eq!(tr.tracked(), 50);
    }
}
