//! In-memory store backend
//!
//! All tables live behind one re-entrant lock. A transaction holds the lock for
//! its whole body and rolls back by restoring a copy of the tables taken on entry.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use parking_lot::ReentrantMutex;

use super::{EventStore, ObjectFilter, ObjectStore, ReportStore, SnapshotStore, Transactional};
use crate::model::{GcEvent, HeapObject, HeapSnapshot, LeakReport, ObjectId};
use crate::{GcSimError, GcSimResult};

#[derive(Debug, Clone, Default)]
struct Tables {
    objects: BTreeMap<ObjectId, HeapObject>,
    snapshots: Vec<HeapSnapshot>,
    events: Vec<GcEvent>,
    reports: Vec<LeakReport>,
    next_object_id: u64,
    next_snapshot_id: u64,
    next_event_id: u64,
    next_report_id: u64,
}

impl Tables {
    fn allocate_id(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: RefCell<Tables>,
    depth: Cell<usize>,
}

/// Resets the transaction depth even if the body panics
struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(0);
    }
}

/// Process-local store, suitable for tests and throwaway simulations
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: ReentrantMutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let guard = self.inner.lock();
        let tables = guard.tables.borrow();
        f(&tables)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let guard = self.inner.lock();
        let mut tables = guard.tables.borrow_mut();
        f(&mut tables)
    }
}

/// Newest-first ordering key; ties resolve to the later insert
fn newest_first<T>(items: &[T], key: impl Fn(&T) -> (DateTime<Utc>, Option<u64>)) -> Vec<T>
where
    T: Clone,
{
    let mut sorted = items.to_vec();
    sorted.sort_by_key(|item| std::cmp::Reverse(key(item)));
    sorted
}

fn snapshot_key(snapshot: &HeapSnapshot) -> (DateTime<Utc>, Option<u64>) {
    (snapshot.timestamp, snapshot.id)
}

impl ObjectStore for MemoryStore {
    fn insert_objects(&self, objects: Vec<HeapObject>) -> GcSimResult<Vec<HeapObject>> {
        Ok(self.write(|tables| {
            objects
                .into_iter()
                .map(|mut object| {
                    let id = Tables::allocate_id(&mut tables.next_object_id);
                    object.id = Some(id);
                    tables.objects.insert(id, object.clone());
                    object
                })
                .collect()
        }))
    }

    fn update_objects(&self, objects: &[HeapObject]) -> GcSimResult<()> {
        self.write(|tables| {
            for object in objects {
                let id = object
                    .id
                    .ok_or_else(|| GcSimError::store("cannot update an object that was never saved"))?;
                tables.objects.insert(id, object.clone());
            }
            Ok(())
        })
    }

    fn get_object(&self, id: ObjectId) -> GcSimResult<Option<HeapObject>> {
        Ok(self.read(|tables| tables.objects.get(&id).cloned()))
    }

    fn get_objects(&self, ids: &[ObjectId]) -> GcSimResult<Vec<HeapObject>> {
        let wanted: BTreeSet<ObjectId> = ids.iter().copied().collect();
        Ok(self.read(|tables| {
            wanted
                .iter()
                .filter_map(|id| tables.objects.get(id).cloned())
                .collect()
        }))
    }

    fn find_objects(&self, filter: ObjectFilter) -> GcSimResult<Vec<HeapObject>> {
        Ok(self.read(|tables| {
            tables
                .objects
                .values()
                .filter(|object| filter.matches(object))
                .cloned()
                .collect()
        }))
    }

    fn delete_objects(&self, ids: &[ObjectId]) -> GcSimResult<usize> {
        Ok(self.write(|tables| {
            ids.iter()
                .filter(|id| tables.objects.remove(*id).is_some())
                .count()
        }))
    }

    fn delete_all_objects(&self) -> GcSimResult<usize> {
        Ok(self.write(|tables| {
            let removed = tables.objects.len();
            tables.objects.clear();
            removed
        }))
    }

    fn sum_size(&self, filter: ObjectFilter) -> GcSimResult<u64> {
        Ok(self.read(|tables| {
            tables
                .objects
                .values()
                .filter(|object| filter.matches(object))
                .map(|object| u64::from(object.size_kb))
                .sum()
        }))
    }

    fn count_objects(&self, filter: ObjectFilter) -> GcSimResult<u64> {
        Ok(self.read(|tables| {
            tables
                .objects
                .values()
                .filter(|object| filter.matches(object))
                .count() as u64
        }))
    }
}

impl SnapshotStore for MemoryStore {
    fn append_snapshot(&self, mut snapshot: HeapSnapshot) -> GcSimResult<HeapSnapshot> {
        Ok(self.write(|tables| {
            snapshot.id = Some(Tables::allocate_id(&mut tables.next_snapshot_id));
            tables.snapshots.push(snapshot.clone());
            snapshot
        }))
    }

    fn snapshots_desc(&self) -> GcSimResult<Vec<HeapSnapshot>> {
        Ok(self.read(|tables| newest_first(&tables.snapshots, snapshot_key)))
    }

    fn snapshots_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> GcSimResult<Vec<HeapSnapshot>> {
        Ok(self.read(|tables| {
            let mut in_range: Vec<HeapSnapshot> = tables
                .snapshots
                .iter()
                .filter(|s| s.timestamp >= from && s.timestamp <= to)
                .cloned()
                .collect();
            in_range.sort_by_key(snapshot_key);
            in_range
        }))
    }

    fn first_snapshot(&self) -> GcSimResult<Option<HeapSnapshot>> {
        Ok(self.read(|tables| tables.snapshots.iter().min_by_key(|s| snapshot_key(s)).cloned()))
    }

    fn latest_snapshot(&self) -> GcSimResult<Option<HeapSnapshot>> {
        Ok(self.read(|tables| tables.snapshots.iter().max_by_key(|s| snapshot_key(s)).cloned()))
    }
}

impl EventStore for MemoryStore {
    fn append_event(&self, mut event: GcEvent) -> GcSimResult<GcEvent> {
        Ok(self.write(|tables| {
            event.id = Some(Tables::allocate_id(&mut tables.next_event_id));
            tables.events.push(event.clone());
            event
        }))
    }

    fn events_desc(&self) -> GcSimResult<Vec<GcEvent>> {
        Ok(self.read(|tables| newest_first(&tables.events, |e| (e.timestamp, e.id))))
    }

    fn average_efficiency(&self) -> GcSimResult<Option<f64>> {
        Ok(self.read(|tables| {
            let ratios: Vec<f64> = tables
                .events
                .iter()
                .filter(|e| e.before_heap > 0)
                .map(GcEvent::efficiency)
                .collect();
            if ratios.is_empty() {
                None
            } else {
                Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
            }
        }))
    }
}

impl ReportStore for MemoryStore {
    fn append_report(&self, mut report: LeakReport) -> GcSimResult<LeakReport> {
        Ok(self.write(|tables| {
            report.id = Some(Tables::allocate_id(&mut tables.next_report_id));
            tables.reports.push(report.clone());
            report
        }))
    }

    fn reports_desc(&self) -> GcSimResult<Vec<LeakReport>> {
        Ok(self.read(|tables| newest_first(&tables.reports, |r| (r.created_at, r.id))))
    }

    fn latest_report(&self) -> GcSimResult<Option<LeakReport>> {
        Ok(self.read(|tables| {
            tables
                .reports
                .iter()
                .max_by_key(|r| (r.created_at, r.id))
                .cloned()
        }))
    }
}

impl Transactional for MemoryStore {
    fn atomically(&self, body: &mut dyn FnMut() -> GcSimResult<()>) -> GcSimResult<()> {
        let guard = self.inner.lock();
        if guard.depth.get() > 0 {
            return body();
        }

        let backup = guard.tables.borrow().clone();
        guard.depth.set(1);
        let result = {
            let _depth = DepthGuard(&guard.depth);
            body()
        };

        if result.is_err() {
            log::debug!("rolling back in-memory transaction");
            *guard.tables.borrow_mut() = backup;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GcType, Generation};
    use crate::store::transaction;
    use chrono::Duration;

    fn objects(n: usize, referenced: bool) -> Vec<HeapObject> {
        (0..n)
            .map(|_| HeapObject::new(100, "Blob", referenced, Utc::now()))
            .collect()
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let saved = store.insert_objects(objects(3, true)).unwrap();
        let ids: Vec<_> = saved.iter().map(|o| o.id.unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        store.delete_objects(&[3]).unwrap();
        let next = store.insert_objects(objects(1, true)).unwrap();
        assert_eq!(next[0].id, Some(4));
    }

    #[test]
    fn test_aggregates_follow_filters() {
        let store = MemoryStore::new();
        store.insert_objects(objects(2, true)).unwrap();
        let mut dropped = store.insert_objects(objects(1, false)).unwrap();
        dropped[0].generation = Generation::Old;
        store.update_objects(&dropped).unwrap();

        assert_eq!(store.sum_size(ObjectFilter::referenced(true)).unwrap(), 200);
        assert_eq!(store.sum_size(ObjectFilter::generation(Generation::Old)).unwrap(), 100);
        assert_eq!(store.count_objects(ObjectFilter::referenced(false)).unwrap(), 1);
        assert_eq!(
            store
                .find_objects(ObjectFilter::unreachable_in(Generation::Old))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.sum_size(ObjectFilter::referenced(true)).unwrap(), 200);
    }

    #[test]
    fn test_get_objects_skips_unknown_ids() {
        let store = MemoryStore::new();
        store.insert_objects(objects(2, true)).unwrap();
        let found = store.get_objects(&[2, 99, 1, 2]).unwrap();
        let ids: Vec<_> = found.iter().map(|o| o.id.unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_snapshot_ordering() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for (offset, heap) in [(10, 300u64), (0, 100), (5, 200)] {
            store
                .append_snapshot(HeapSnapshot {
                    id: None,
                    timestamp: base + Duration::seconds(offset),
                    total_heap_used: heap,
                    live_objects_count: 0,
                    unreachable_objects_count: 0,
                    young_gen_size: None,
                    old_gen_size: None,
                })
                .unwrap();
        }

        let desc: Vec<_> = store
            .snapshots_desc()
            .unwrap()
            .iter()
            .map(|s| s.total_heap_used)
            .collect();
        assert_eq!(desc, vec![300, 200, 100]);
        assert_eq!(store.first_snapshot().unwrap().unwrap().total_heap_used, 100);
        assert_eq!(store.latest_snapshot().unwrap().unwrap().total_heap_used, 300);

        let range = store
            .snapshots_between(base + Duration::seconds(1), base + Duration::seconds(10))
            .unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].total_heap_used, 200);
    }

    #[test]
    fn test_average_efficiency_ignores_empty_heaps() {
        let store = MemoryStore::new();
        assert_eq!(store.average_efficiency().unwrap(), None);

        store.append_event(GcEvent::new(GcType::Minor, 0, 0)).unwrap();
        assert_eq!(store.average_efficiency().unwrap(), None);

        store.append_event(GcEvent::new(GcType::Minor, 100, 50)).unwrap();
        store.append_event(GcEvent::new(GcType::Major, 100, 100)).unwrap();
        assert_eq!(store.average_efficiency().unwrap(), Some(0.25));
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = MemoryStore::new();
        store.insert_objects(objects(1, true)).unwrap();

        let result: GcSimResult<()> = transaction(&store, || {
            store.insert_objects(objects(5, true))?;
            store.delete_all_objects()?;
            Err(GcSimError::store("simulated outage"))
        });

        assert!(result.is_err());
        assert_eq!(store.count_objects(ObjectFilter::ALL).unwrap(), 1);
    }

    #[test]
    fn test_nested_transaction_joins_outer() {
        let store = MemoryStore::new();
        let inserted = transaction(&store, || {
            let inner = transaction(&store, || store.insert_objects(objects(2, true)))?;
            store.insert_objects(objects(1, false))?;
            Ok(inner.len())
        })
        .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(store.count_objects(ObjectFilter::ALL).unwrap(), 3);
    }
}
