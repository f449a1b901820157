//! Registry of live detectors
//!
//! Detectors are created lazily: memory first, then the model store, then a
//! fresh untrained instance. Each device's detector sits behind its own mutex,
//! so calls for one device are serialized while distinct devices proceed in
//! parallel. The maps are only locked long enough to look up, insert or
//! remove an entry; store reads and waits on device mutexes happen outside.
//!
//! Lock order is always map before device. `clear` marks the device as being
//! cleared while it retires the evicted instances and deletes their files, and
//! bumps the map generation once done. A lookup that loaded state from disk
//! concurrently with a clear discards it, so a request racing with `clear`
//! either finishes first or starts from scratch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::anomaly::{AnomalyDetector, Detection, DetectorState};
use super::ensemble::{EnsembleDetection, EnsembleDetector};
use crate::config::{DetectionConfig, EnsembleConfig};
use crate::error::DetectorError;
use crate::feature_extractor::{FeatureExtractor, FeatureMatrix, Record};
use crate::models::store::validate_device_id;
use crate::models::{ModelKind, ModelStore};

type Shared<T> = Arc<Mutex<T>>;

/// Ensemble slot of one device; empty until the first fit.
#[derive(Default)]
struct EnsembleSlot {
    model: Option<EnsembleDetector>,
    retired: bool,
}

/// Cached per-device entries plus the bookkeeping `clear` needs.
struct DeviceMap<T> {
    entries: HashMap<String, Shared<T>>,
    /// Clears in progress per device
    clearing: HashMap<String, usize>,
    /// Bumped after every completed clear
    generation: u64,
}

impl<T> DeviceMap<T> {
    fn begin_clear(&mut self, device_id: &str) {
        *self.clearing.entry(device_id.to_string()).or_insert(0) += 1;
    }
}

impl<T> Default for DeviceMap<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            clearing: HashMap::new(),
            generation: 0,
        }
    }
}

/// Ensemble result together with the model metadata it was produced with.
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    pub detection: EnsembleDetection,
    pub device_type: String,
    pub features: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    /// Decision threshold of each member
    pub thresholds: HashMap<String, f64>,
}

pub struct DetectorRegistry {
    store: Arc<ModelStore>,
    detection: DetectionConfig,
    ensemble: EnsembleConfig,
    extractor: FeatureExtractor,
    detectors: RwLock<DeviceMap<AnomalyDetector>>,
    ensembles: RwLock<DeviceMap<EnsembleSlot>>,
}

impl DetectorRegistry {
    pub fn new(store: Arc<ModelStore>, detection: DetectionConfig, ensemble: EnsembleConfig) -> Self {
        Self {
            store,
            detection,
            ensemble,
            extractor: FeatureExtractor::new(),
            detectors: RwLock::new(DeviceMap::default()),
            ensembles: RwLock::new(DeviceMap::default()),
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn detection_config(&self) -> &DetectionConfig {
        &self.detection
    }

    /// Detector of `device_id`, loading or creating it on first access.
    pub fn get_or_create(&self, device_id: &str) -> Result<Shared<AnomalyDetector>, DetectorError> {
        validate_device_id(device_id)?;
        lookup(
            &self.detectors,
            device_id,
            || self.load_detector(device_id),
            || self.new_detector(device_id),
        )
    }

    fn load_detector(&self, device_id: &str) -> AnomalyDetector {
        match self.store.load::<DetectorState>(device_id, ModelKind::Anomaly) {
            Some(state) => {
                AnomalyDetector::from_state(state, self.detection.clone(), Some(Arc::clone(&self.store)))
            }
            None => self.new_detector(device_id),
        }
    }

    fn new_detector(&self, device_id: &str) -> AnomalyDetector {
        info!(device_id = %device_id, "Creating new anomaly detector");
        AnomalyDetector::new(device_id, self.detection.clone(), Some(Arc::clone(&self.store)))
    }

    /// Validate `values` and score them with the device's detector.
    pub fn detect(&self, device_id: &str, values: &[f64]) -> Result<Detection, DetectorError> {
        if values.len() < self.detection.min_observations {
            return Err(DetectorError::InsufficientData {
                required: self.detection.min_observations,
                got: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(DetectorError::NonFiniteValue { index });
        }

        let shared = self.get_or_create(device_id)?;
        let mut detector = shared.lock().unwrap_or_else(|poisoned| {
            warn!(device_id = %device_id, "Detector lock poisoned, reloading from store");
            let mut detector = poisoned.into_inner();
            let retired = detector.is_retired();
            *detector = self.load_detector(device_id);
            if retired {
                detector.retire();
            }
            shared.clear_poison();
            detector
        });
        Ok(detector.predict(values))
    }

    /// Run the ensemble of `device_id` over `records`.
    ///
    /// The model is fitted on the records themselves on first use, when
    /// `retrain` is set, or when the device type changed.
    pub fn detect_ensemble(
        &self,
        device_id: &str,
        device_type: &str,
        records: &[Record],
        retrain: bool,
    ) -> Result<EnsembleOutcome, DetectorError> {
        validate_device_id(device_id)?;

        let features = self.extractor.extract(records)?;
        if features.len() < self.detection.min_observations {
            return Err(DetectorError::InsufficientData {
                required: self.detection.min_observations,
                got: features.len(),
            });
        }

        let shared = self.ensemble_slot(device_id)?;
        let mut slot = shared.lock().unwrap_or_else(|poisoned| {
            warn!(device_id = %device_id, "Ensemble lock poisoned, reloading from store");
            let mut slot = poisoned.into_inner();
            slot.model = self.load_ensemble(device_id);
            shared.clear_poison();
            slot
        });

        let (model, refitted) = match slot.model.take() {
            Some(existing) if !retrain && existing.device_type() == device_type => (existing, false),
            _ => (self.fit_ensemble(device_id, device_type, &features, slot.retired)?, true),
        };

        let result = model.detect(&features);
        let outcome = result.map(|mut detection| {
            detection.refitted = refitted;
            EnsembleOutcome {
                detection,
                device_type: model.device_type().to_string(),
                features: model.feature_names().to_vec(),
                trained_at: model.trained_at(),
                training_rows: model.training_rows(),
                thresholds: model.thresholds(),
            }
        });
        slot.model = Some(model);
        outcome
    }

    fn fit_ensemble(
        &self,
        device_id: &str,
        device_type: &str,
        features: &FeatureMatrix,
        retired: bool,
    ) -> Result<EnsembleDetector, DetectorError> {
        let model = EnsembleDetector::fit(device_id, device_type, features, &self.detection, &self.ensemble)?;

        if !retired {
            if let Err(e) = self.store.save(device_id, ModelKind::Ensemble, &model) {
                error!(device_id = %device_id, error = %e, "Failed to persist ensemble detector");
            }
        }
        Ok(model)
    }

    fn load_ensemble(&self, device_id: &str) -> Option<EnsembleDetector> {
        self.store.load::<EnsembleDetector>(device_id, ModelKind::Ensemble)
    }

    fn ensemble_slot(&self, device_id: &str) -> Result<Shared<EnsembleSlot>, DetectorError> {
        lookup(
            &self.ensembles,
            device_id,
            || EnsembleSlot {
                model: self.load_ensemble(device_id),
                retired: false,
            },
            EnsembleSlot::default,
        )
    }

    /// Whether a detector for `device_id` is held in memory.
    pub fn is_cached(&self, device_id: &str) -> bool {
        let in_detectors = read(&self.detectors)
            .map(|d| d.entries.contains_key(device_id))
            .unwrap_or(false);
        in_detectors
            || read(&self.ensembles)
                .map(|e| e.entries.contains_key(device_id))
                .unwrap_or(false)
    }

    /// Number of devices with a detector in memory.
    pub fn cached_devices(&self) -> usize {
        read(&self.detectors).map(|d| d.entries.len()).unwrap_or(0)
    }

    /// File names of the models stored for `device_id`.
    pub fn persisted_models(&self, device_id: &str) -> Result<Vec<String>, DetectorError> {
        Ok(self.store.list(device_id)?)
    }

    /// Forget everything about `device_id`; returns the number of files deleted.
    pub fn clear(&self, device_id: &str) -> Result<usize, DetectorError> {
        validate_device_id(device_id)?;

        let (detector, slot) = {
            let mut detectors = write(&self.detectors)?;
            let mut ensembles = write(&self.ensembles)?;
            detectors.begin_clear(device_id);
            ensembles.begin_clear(device_id);
            (detectors.entries.remove(device_id), ensembles.entries.remove(device_id))
        };

        // Waits for in-flight requests of this device only.
        if let Some(detector) = detector {
            detector.lock().unwrap_or_else(PoisonError::into_inner).retire();
        }
        if let Some(slot) = slot {
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.retired = true;
            slot.model = None;
        }

        let removed = self.store.remove_all(device_id);

        finish_clear(&self.detectors, device_id);
        finish_clear(&self.ensembles, device_id);

        let removed = removed?;
        info!(device_id = %device_id, removed, "Cleared device models");
        Ok(removed)
    }
}

/// Cached entry of `device_id`, inserting one built by `load` on a miss.
///
/// `load` runs without any map lock held. If a clear of the device is in
/// progress at insert time a `fresh` instance is cached instead, and if one
/// completed meanwhile the load is repeated.
fn lookup<T>(
    map: &RwLock<DeviceMap<T>>,
    device_id: &str,
    load: impl Fn() -> T,
    fresh: impl Fn() -> T,
) -> Result<Shared<T>, DetectorError> {
    let mut generation = {
        let guard = read(map)?;
        if let Some(entry) = guard.entries.get(device_id) {
            return Ok(Arc::clone(entry));
        }
        guard.generation
    };

    loop {
        let loaded = load();

        let mut guard = write(map)?;
        if let Some(entry) = guard.entries.get(device_id) {
            return Ok(Arc::clone(entry));
        }

        let value = if guard.clearing.contains_key(device_id) {
            fresh()
        } else if guard.generation != generation {
            generation = guard.generation;
            continue;
        } else {
            loaded
        };

        let shared = Arc::new(Mutex::new(value));
        guard.entries.insert(device_id.to_string(), Arc::clone(&shared));
        return Ok(shared);
    }
}

fn finish_clear<T>(map: &RwLock<DeviceMap<T>>, device_id: &str) {
    let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(count) = map.clearing.get_mut(device_id) {
        *count -= 1;
        if *count == 0 {
            map.clearing.remove(device_id);
        }
    }
    map.generation += 1;
}

fn read<T>(map: &RwLock<DeviceMap<T>>) -> Result<RwLockReadGuard<'_, DeviceMap<T>>, DetectorError> {
    map.read()
        .map_err(|_| DetectorError::LockPoisoned("registry".to_string()))
}

fn write<T>(map: &RwLock<DeviceMap<T>>) -> Result<RwLockWriteGuard<'_, DeviceMap<T>>, DetectorError> {
    map.write()
        .map_err(|_| DetectorError::LockPoisoned("registry".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry(dir: &std::path::Path) -> DetectorRegistry {
        let store = Arc::new(ModelStore::open(dir).unwrap());
        DetectorRegistry::new(store, DetectionConfig::default(), EnsembleConfig::default())
    }

    #[test]
    fn test_detect_validates_input() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        assert!(matches!(
            registry.detect("dev", &[1.0; 9]),
            Err(DetectorError::InsufficientData { required: 10, got: 9 })
        ));

        let mut values = vec![1.0; 12];
        values[4] = f64::NAN;
        assert!(matches!(
            registry.detect("dev", &values),
            Err(DetectorError::NonFiniteValue { index: 4 })
        ));

        assert!(registry.detect("../dev", &[1.0; 12]).is_err());
        assert!(!registry.is_cached("dev"));
    }

    #[test]
    fn test_detect_caches_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let detection = registry.detect("dev", &[3.0; 12]).unwrap();
        assert!(detection.anomalies.is_empty());
        assert!(registry.is_cached("dev"));
        assert_eq!(registry.persisted_models("dev").unwrap(), vec!["dev_anomaly.bin"]);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.detect("dev", &[3.0; 12]).unwrap();

        assert_eq!(registry.clear("dev").unwrap(), 1);
        assert!(!registry.is_cached("dev"));
        assert_eq!(registry.clear("dev").unwrap(), 0);
        assert_eq!(registry.cached_devices(), 0);
    }

    #[test]
    fn test_retired_detector_stops_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.detect("dev", &[3.0; 12]).unwrap();

        let stale = registry.get_or_create("dev").unwrap();
        registry.clear("dev").unwrap();

        let mut stale = stale.lock().unwrap();
        assert!(stale.is_retired());
        assert!(stale.train(&[4.0; 12]));
        assert!(registry.persisted_models("dev").unwrap().is_empty());
    }

    #[test]
    fn test_poisoned_detector_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.detect("dev", &[3.0; 12]).unwrap();

        let shared = registry.get_or_create("dev").unwrap();
        let panicked = std::thread::spawn(move || {
            let _guard = shared.lock().unwrap();
            panic!("detector task failed");
        })
        .join();
        assert!(panicked.is_err());

        let detection = registry.detect("dev", &[3.0; 10]).unwrap();
        assert!(detection.anomalies.is_empty());
        let detector = registry.get_or_create("dev").unwrap();
        assert!(!detector.is_poisoned());
        assert!(detector.lock().unwrap().is_trained());
    }

    #[test]
    fn test_clear_waits_without_blocking_other_devices() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(registry(dir.path()));
        let busy = registry.get_or_create("busy").unwrap();
        let guard = busy.lock().unwrap();

        let clearing = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.clear("busy"))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));

        registry.detect("other", &[1.0; 12]).unwrap();
        assert!(registry.is_cached("other"));

        drop(guard);
        assert_eq!(clearing.join().unwrap().unwrap(), 0);
        assert!(busy.lock().unwrap().is_retired());
    }

    #[test]
    fn test_lookup_reloads_after_concurrent_clear() {
        let map: RwLock<DeviceMap<u32>> = RwLock::new(DeviceMap::default());
        let loads = std::cell::Cell::new(0);

        let entry = lookup(
            &map,
            "dev",
            || {
                loads.set(loads.get() + 1);
                if loads.get() == 1 {
                    // a clear completes while the first load is running
                    map.write().unwrap().generation += 1;
                }
                loads.get()
            },
            || 0,
        )
        .unwrap();

        assert_eq!(loads.get(), 2);
        assert_eq!(*entry.lock().unwrap(), 2);
    }

    #[test]
    fn test_lookup_starts_fresh_during_clear() {
        let map: RwLock<DeviceMap<u32>> = RwLock::new(DeviceMap::default());

        let entry = lookup(
            &map,
            "dev",
            || {
                map.write().unwrap().begin_clear("dev");
                7
            },
            || 0,
        )
        .unwrap();
        assert_eq!(*entry.lock().unwrap(), 0);

        finish_clear(&map, "dev");
        let map = map.read().unwrap();
        assert!(map.clearing.is_empty());
        assert_eq!(map.generation, 1);
    }

    #[test]
    fn test_ensemble_fits_once_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let records: Vec<Record> = (0..20)
            .filter_map(|i| {
                json!({"device_id": "hvac", "power": 100 + i % 4, "temp": 21.0})
                    .as_object()
                    .cloned()
            })
            .collect();

        let first = registry.detect_ensemble("hvac", "hvac", &records, false).unwrap();
        assert!(first.detection.refitted);
        assert_eq!(first.features, vec!["power", "temp"]);

        let second = registry.detect_ensemble("hvac", "hvac", &records, false).unwrap();
        assert!(!second.detection.refitted);

        let third = registry.detect_ensemble("hvac", "hvac", &records, true).unwrap();
        assert!(third.detection.refitted);

        assert_eq!(
            registry.persisted_models("hvac").unwrap(),
            vec!["hvac_ensemble.bin"]
        );
    }
}
