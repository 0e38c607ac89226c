//! Time-ordered store of committed motions.
//!
//! Readers take a snapshot (`Arc<MotionPlan>`) and never observe a
//! half-updated plan. Writers modify the plan in place, copying it first
//! while an older snapshot is still held.

use crate::motion::Motion;
use parking_lot::RwLock;
use std::sync::Arc;

/// Smallest spacing of plan keys.
const KEY_EPSILON: f64 = 1e-9;

/// Entries trimmed off the front before the vector is compacted.
const COMPACT_THRESHOLD: usize = 64;

#[derive(Clone, Debug)]
pub struct PlanEntry {
    /// Absolute time at which the motion ends.
    pub time: f64,
    pub motion: Arc<Motion>,
}

impl PlanEntry {
    /// Entry ending at `time`, moved just past `last` if it would not
    /// follow it.
    fn after(last: Option<f64>, time: f64, motion: Motion) -> Self {
        let time = match last {
            Some(last) if time <= last => last + KEY_EPSILON,
            _ => time,
        };
        Self {
            time,
            motion: Arc::new(motion.with_planned_time1(time)),
        }
    }

    /// Absolute time at which the motion starts.
    pub fn start_time(&self) -> f64 {
        self.time - self.motion.time()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MotionPlan {
    entries: Vec<PlanEntry>,
    retained_from: usize,
}

impl MotionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retained entries, ordered by strictly increasing time.
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries[self.retained_from..]
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn first(&self) -> Option<&PlanEntry> {
        self.entries().first()
    }

    pub fn last(&self) -> Option<&PlanEntry> {
        self.entries().last()
    }

    /// Append a motion ending at `time`. Keys that would not increase are
    /// nudged past the last key. Returns the key actually used.
    pub fn insert(&mut self, time: f64, motion: Motion) -> f64 {
        let entry = PlanEntry::after(self.last().map(|last| last.time), time, motion);
        let time = entry.time;
        self.entries.push(entry);
        time
    }

    /// Entries for `motions` executed back to back after the last entry,
    /// starting no earlier than `now`. The plan itself is not changed.
    pub fn schedule(&self, now: f64, motions: impl IntoIterator<Item = Motion>) -> Vec<PlanEntry> {
        let mut last = self.last().map(|last| last.time);
        let mut end = last.map_or(now, |last| last.max(now));
        motions
            .into_iter()
            .map(|motion| {
                let entry = PlanEntry::after(last, end + motion.time(), motion);
                end = entry.time;
                last = Some(entry.time);
                entry
            })
            .collect()
    }

    /// Append entries produced by [`MotionPlan::schedule`] on this plan.
    pub fn extend(&mut self, entries: Vec<PlanEntry>) {
        if let (Some(first), Some(last)) = (entries.first(), self.last()) {
            debug_assert!(first.time > last.time);
        }
        self.entries.extend(entries);
    }

    /// Last entry with a key at or before `time`.
    pub fn floor(&self, time: f64) -> Option<&PlanEntry> {
        let entries = self.entries();
        let index = entries.partition_point(|e| e.time <= time);
        index.checked_sub(1).map(|i| &entries[i])
    }

    /// First entry with a key at or after `time`.
    pub fn ceiling(&self, time: f64) -> Option<&PlanEntry> {
        let entries = self.entries();
        let index = entries.partition_point(|e| e.time < time);
        entries.get(index)
    }

    /// First entry with a key strictly after `time`.
    pub fn higher(&self, time: f64) -> Option<&PlanEntry> {
        let entries = self.entries();
        let index = entries.partition_point(|e| e.time <= time);
        entries.get(index)
    }

    /// Drop entries with keys strictly before `time`.
    pub fn retain_from(&mut self, time: f64) -> usize {
        let dropped = self.entries().partition_point(|e| e.time < time);
        self.retained_from += dropped;
        if self.retained_from >= COMPACT_THRESHOLD || self.retained_from == self.entries.len() {
            self.entries.drain(..self.retained_from);
            self.retained_from = 0;
        }
        dropped
    }
}

/// Shared, copy-on-write holder of the current plan.
#[derive(Debug, Default)]
pub struct PlanStore {
    current: RwLock<Arc<MotionPlan>>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<MotionPlan> {
        self.current.read().clone()
    }

    /// Apply `f` to the plan under the write lock. Entries are only copied
    /// if a snapshot is still held.
    pub fn update<R>(&self, f: impl FnOnce(&mut MotionPlan) -> R) -> R {
        let mut current = self.current.write();
        f(Arc::make_mut(&mut current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{axes::AxisId, location::AxesLocation};

    fn motion(x: f64) -> Motion {
        Motion::stillstand(&AxesLocation::single(AxisId::linear("X"), x))
    }

    fn plan(keys: &[f64]) -> MotionPlan {
        let mut plan = MotionPlan::new();
        for (i, key) in keys.iter().enumerate() {
            plan.insert(*key, motion(i as f64));
        }
        plan
    }

    #[test]
    fn keys_are_strictly_increasing() {
        let plan = plan(&[1.0, 1.0, 0.5, 2.0]);
        let keys: Vec<_> = plan.entries().iter().map(|e| e.time).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "{keys:?}");
        assert_eq!(plan.entries()[3].time, 2.0);
        assert_eq!(plan.entries()[0].motion.planned_time1(), Some(1.0));
    }

    #[test]
    fn lookups() {
        let plan = plan(&[1.0, 2.0, 3.0]);
        assert_eq!(plan.floor(2.0).map(|e| e.time), Some(2.0));
        assert_eq!(plan.floor(0.5).map(|e| e.time), None);
        assert_eq!(plan.ceiling(2.0).map(|e| e.time), Some(2.0));
        assert_eq!(plan.higher(2.0).map(|e| e.time), Some(3.0));
        assert_eq!(plan.higher(3.0).map(|e| e.time), None);
    }

    #[test]
    fn retention_advances_the_front() {
        let mut plan = plan(&[1.0, 2.0, 3.0]);
        assert_eq!(plan.retain_from(2.0), 1);
        assert_eq!(plan.first().map(|e| e.time), Some(2.0));
        assert_eq!(plan.floor(1.5).map(|e| e.time), None);
        assert_eq!(plan.retain_from(10.0), 2);
        assert!(plan.is_empty());
        plan.insert(4.0, motion(0.0));
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn scheduled_entries_follow_the_plan() {
        let mut plan = plan(&[1.0]);
        let entries = plan.schedule(0.5, [motion(1.0), motion(2.0)]);
        assert_eq!(plan.len(), 1);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].time > 1.0 && entries[1].time > entries[0].time);
        assert_eq!(entries[1].motion.planned_time1(), Some(entries[1].time));
        plan.extend(entries);
        assert_eq!(plan.len(), 3);

        let entries = MotionPlan::new().schedule(5.0, [motion(0.0)]);
        assert_eq!(entries[0].time, 5.0);
    }

    #[test]
    fn snapshots_are_not_affected_by_updates() {
        let store = PlanStore::new();
        store.update(|plan| plan.insert(1.0, motion(1.0)));
        let before = store.snapshot();
        store.update(|plan| plan.insert(2.0, motion(2.0)));
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn updates_without_snapshots_stay_in_place() {
        let store = PlanStore::new();
        store.update(|plan| plan.insert(1.0, motion(1.0)));
        let address = Arc::as_ptr(&store.snapshot());
        store.update(|plan| plan.insert(2.0, motion(2.0)));
        let after = store.snapshot();
        assert_eq!(Arc::as_ptr(&after), address);
        assert_eq!(after.len(), 2);

        // A held snapshot forces a copy.
        store.update(|plan| plan.insert(3.0, motion(3.0)));
        assert_ne!(Arc::as_ptr(&store.snapshot()), Arc::as_ptr(&after));
        assert_eq!(after.len(), 2);
    }
}
