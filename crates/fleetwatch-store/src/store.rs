use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use fleetwatch_core::{Imo, UpdateBroadcaster, UpdateEvent, Vessel, VesselPatch};
use fleetwatch_telemetry::MetricsRecorder;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::loader::load_vessels;

/// In-memory vessel collection keyed by IMO.
///
/// Reads take a shared lock and return snapshots. Every mutation goes
/// through [`VesselStore::upsert_merge`], which holds the write lock while it
/// merges and publishes, so subscribers see updates for an IMO in exactly the
/// order they were applied.
pub struct VesselStore {
    vessels: RwLock<Vec<Vessel>>,
    /// IMO -> position in `vessels`. The set of vessels is fixed at load time.
    index: HashMap<Imo, usize>,
    broadcaster: UpdateBroadcaster,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl VesselStore {
    pub fn new(vessels: Vec<Vessel>, broadcaster: UpdateBroadcaster) -> Result<Self, StoreError> {
        let mut index = HashMap::with_capacity(vessels.len());
        for (pos, vessel) in vessels.iter().enumerate() {
            if index.insert(vessel.imo, pos).is_some() {
                return Err(StoreError::DuplicateImo(vessel.imo));
            }
        }

        Ok(Self {
            vessels: RwLock::new(vessels),
            index,
            broadcaster,
            metrics: None,
        })
    }

    /// Load the seed file and build a store over it.
    pub fn open(path: &Path, broadcaster: UpdateBroadcaster) -> Result<Self, StoreError> {
        Self::new(load_vessels(path)?, broadcaster)
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Snapshot of every vessel, in seed order.
    pub fn list_all(&self) -> Vec<Vessel> {
        self.vessels.read().clone()
    }

    pub fn get(&self, imo: Imo) -> Option<Vessel> {
        let pos = *self.index.get(&imo)?;
        self.vessels.read().get(pos).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn broadcaster(&self) -> &UpdateBroadcaster {
        &self.broadcaster
    }

    /// Merge a partial update into the vessel with the same IMO and
    /// broadcast the merged record.
    ///
    /// Unknown IMOs return [`StoreError::NotFound`] and publish nothing.
    pub fn upsert_merge(&self, patch: &VesselPatch) -> Result<Vessel, StoreError> {
        let Some(&pos) = self.index.get(&patch.imo) else {
            warn!(imo = %patch.imo, "update for unknown vessel ignored");
            self.count("store.updates.not_found");
            return Err(StoreError::NotFound(patch.imo));
        };

        let mut vessels = self.vessels.write();
        let vessel = &mut vessels[pos];
        let changed = vessel.apply(patch);
        let merged = vessel.clone();

        let receivers = self
            .broadcaster
            .publish(UpdateEvent::new(merged.clone(), changed.clone()));
        drop(vessels);

        debug!(imo = %merged.imo, ?changed, receivers, "vessel updated");
        self.count("store.updates.applied");
        Ok(merged)
    }

    fn count(&self, name: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(name, &[], 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core::VesselField;

    fn vessel(imo: u64, destination: &str) -> Vessel {
        Vessel {
            id: imo,
            name: format!("vessel-{imo}"),
            imo: Imo(imo),
            lat: 0.0,
            lng: 0.0,
            destination: destination.into(),
        }
    }

    fn store(vessels: Vec<Vessel>) -> VesselStore {
        VesselStore::new(vessels, UpdateBroadcaster::new(1024)).unwrap()
    }

    #[test]
    fn merge_overwrites_present_fields_and_broadcasts_once() {
        let store = store(vec![vessel(42, "X")]);
        let mut sub = store.broadcaster().subscribe();

        let patch = VesselPatch {
            lat: Some(1.0),
            ..VesselPatch::new(42)
        };
        let merged = store.upsert_merge(&patch).unwrap();

        let expected = Vessel {
            lat: 1.0,
            ..vessel(42, "X")
        };
        assert_eq!(merged, expected);
        assert_eq!(store.get(Imo(42)).unwrap(), expected);

        let event = sub.try_recv().unwrap();
        assert_eq!(event.vessel, expected);
        assert_eq!(event.changed, vec![VesselField::Lat]);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn unknown_imo_is_not_found_and_silent() {
        let metrics = Arc::new(MetricsRecorder::new());
        let store = store(vec![vessel(1, "A")]).with_metrics(Arc::clone(&metrics));
        let mut sub = store.broadcaster().subscribe();

        let err = store.upsert_merge(&VesselPatch::new(99)).unwrap_err();

        assert!(matches!(err, StoreError::NotFound(Imo(99))));
        assert!(sub.try_recv().is_none());
        assert_eq!(store.list_all(), vec![vessel(1, "A")]);
        assert_eq!(metrics.counter_get("store.updates.not_found", &[]), 1);
        assert_eq!(metrics.counter_get("store.updates.applied", &[]), 0);
    }

    #[test]
    fn unchanged_merge_still_broadcasts() {
        let store = store(vec![vessel(7, "Oslo")]);
        let mut sub = store.broadcaster().subscribe();

        store
            .upsert_merge(&VesselPatch::new(7).with_destination("Oslo"))
            .unwrap();

        let event = sub.try_recv().unwrap();
        assert!(event.changed.is_empty());
    }

    #[test]
    fn duplicate_seed_imo_is_rejected() {
        let err = VesselStore::new(
            vec![vessel(5, "A"), vessel(5, "B")],
            UpdateBroadcaster::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, StoreError::DuplicateImo(Imo(5))));
    }

    #[test]
    fn list_all_is_a_snapshot() {
        let store = store(vec![vessel(1, "A"), vessel(2, "B")]);
        let before = store.list_all();
        store
            .upsert_merge(&VesselPatch::new(1).with_destination("Z"))
            .unwrap();

        assert_eq!(before[0].destination, "A");
        assert_eq!(store.list_all()[0].destination, "Z");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn concurrent_writers_preserve_per_vessel_order() {
        let imos: Vec<u64> = (1..=4).collect();
        let store = Arc::new(store(imos.iter().map(|&i| vessel(i, "")).collect()));
        let mut sub = store.broadcaster().subscribe();

        let handles: Vec<_> = imos
            .iter()
            .map(|&imo| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for step in 1..=50 {
                        let patch = VesselPatch {
                            lat: Some(f64::from(step)),
                            ..VesselPatch::new(imo)
                        };
                        store.upsert_merge(&patch).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut last: HashMap<Imo, f64> = HashMap::new();
        let mut total = 0;
        while let Some(event) = sub.try_recv() {
            let prev = last.insert(event.imo(), event.vessel.lat).unwrap_or(0.0);
            assert!(event.vessel.lat > prev, "out of order for {}", event.imo());
            total += 1;
        }
        assert_eq!(total, 200);
    }
}
