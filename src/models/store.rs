//! On-disk model store
//!
//! One file per `(device_id, kind)` pair: `{models_dir}/{device_id}_{kind}.bin`.
//! Files hold a bincode envelope tagged with the owning device and kind, so a
//! renamed or foreign file is never loaded into the wrong detector.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// File extension of persisted models
pub const MODEL_EXTENSION: &str = "bin";

/// Bumped whenever the persisted layout of a model changes
const FORMAT_VERSION: u32 = 1;

const MAX_DEVICE_ID_LEN: usize = 128;

/// Kind of model persisted for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Per-device incremental detector
    Anomaly,
    /// Per-device multi-feature ensemble
    Ensemble,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Anomaly, ModelKind::Ensemble];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Anomaly => "anomaly",
            ModelKind::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format_version: u32,
    device_id: &'a str,
    kind: ModelKind,
    saved_at: DateTime<Utc>,
    model: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    format_version: u32,
    device_id: String,
    kind: ModelKind,
    #[allow(dead_code)]
    saved_at: DateTime<Utc>,
    model: T,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Reject identifiers that cannot safely become part of a file name.
pub fn validate_device_id(device_id: &str) -> Result<(), StoreError> {
    let reason = if device_id.is_empty() {
        Some("must not be empty")
    } else if device_id.len() > MAX_DEVICE_ID_LEN {
        Some("must be at most 128 bytes")
    } else if device_id == "." || device_id == ".." {
        Some("must not be a relative path component")
    } else if device_id.contains(['/', '\\']) {
        Some("must not contain a path separator")
    } else if device_id.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidDeviceId {
            id: device_id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Directory-backed model store.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    /// Open (and create if needed) the models directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        info!(models_dir = %dir.display(), "Model store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name used for a `(device_id, kind)` pair.
    pub fn file_name(device_id: &str, kind: ModelKind) -> String {
        format!("{}_{}.{}", device_id, kind, MODEL_EXTENSION)
    }

    pub fn path_for(&self, device_id: &str, kind: ModelKind) -> PathBuf {
        self.dir.join(Self::file_name(device_id, kind))
    }

    /// Serialize `model` for `(device_id, kind)`, replacing any previous file.
    ///
    /// The file is written next to its target and renamed into place, so a
    /// reader never observes a half-written model.
    pub fn save<T: Serialize>(
        &self,
        device_id: &str,
        kind: ModelKind,
        model: &T,
    ) -> Result<PathBuf, StoreError> {
        validate_device_id(device_id)?;

        let path = self.path_for(device_id, kind);
        let tmp = path.with_extension(format!("{}.tmp", MODEL_EXTENSION));
        let envelope = EnvelopeRef {
            format_version: FORMAT_VERSION,
            device_id,
            kind,
            saved_at: Utc::now(),
            model,
        };

        let written = Self::write_file(&tmp, &envelope)
            .and_then(|_| fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e)));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        debug!(device_id = %device_id, kind = %kind, path = %path.display(), "Saved model");
        Ok(path)
    }

    fn write_file<T: Serialize>(path: &Path, envelope: &EnvelopeRef<'_, T>) -> Result<(), StoreError> {
        let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        codec().serialize_into(&mut writer, envelope)?;
        writer.flush().map_err(|e| StoreError::io(path, e))?;
        Ok(())
    }

    /// Load the model for `(device_id, kind)`.
    ///
    /// Returns `None` when nothing usable is stored; failures are logged.
    pub fn load<T: DeserializeOwned>(&self, device_id: &str, kind: ModelKind) -> Option<T> {
        if validate_device_id(device_id).is_err() {
            return None;
        }

        let path = self.path_for(device_id, kind);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open model file");
                return None;
            }
        };

        let limit = file.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
        let decoded: Result<Envelope<T>, _> =
            codec().with_limit(limit).deserialize_from(BufReader::new(file));

        match decoded {
            Ok(envelope)
                if envelope.format_version == FORMAT_VERSION
                    && envelope.device_id == device_id
                    && envelope.kind == kind =>
            {
                info!(device_id = %device_id, kind = %kind, path = %path.display(), "Loaded model");
                Some(envelope.model)
            }
            Ok(envelope) => {
                warn!(
                    path = %path.display(),
                    stored_device = %envelope.device_id,
                    stored_kind = %envelope.kind,
                    format_version = envelope.format_version,
                    "Model file does not match the requested device/kind, ignoring"
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to deserialize model");
                None
            }
        }
    }

    /// File names of the models persisted for a device, sorted.
    pub fn list(&self, device_id: &str) -> Result<Vec<String>, StoreError> {
        validate_device_id(device_id)?;

        let mut names: Vec<String> = ModelKind::ALL
            .iter()
            .filter(|kind| self.path_for(device_id, **kind).is_file())
            .map(|kind| Self::file_name(device_id, *kind))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Delete every model of a device; returns how many files were removed.
    pub fn remove_all(&self, device_id: &str) -> Result<usize, StoreError> {
        validate_device_id(device_id)?;

        let mut removed = 0;
        for kind in ModelKind::ALL {
            let path = self.path_for(device_id, kind);
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    debug!(device_id = %device_id, kind = %kind, "Removed model file");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Dummy {
        weights: Vec<f64>,
        label: String,
    }

    fn dummy() -> Dummy {
        Dummy {
            weights: vec![0.25, -1.5, 3.0],
            label: "fan".to_string(),
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();

        let path = store.save("dev-1", ModelKind::Anomaly, &dummy()).unwrap();
        assert_eq!(path, dir.path().join("dev-1_anomaly.bin"));

        let loaded: Option<Dummy> = store.load("dev-1", ModelKind::Anomaly);
        assert_eq!(loaded, Some(dummy()));
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        assert!(store.load::<Dummy>("nobody", ModelKind::Anomaly).is_none());
    }

    #[test]
    fn test_load_corrupt_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        fs::write(store.path_for("dev", ModelKind::Anomaly), b"not a model").unwrap();
        assert!(store.load::<Dummy>("dev", ModelKind::Anomaly).is_none());
    }

    #[test]
    fn test_renamed_file_not_loaded_for_other_device() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        store.save("a", ModelKind::Anomaly, &dummy()).unwrap();
        fs::copy(
            store.path_for("a", ModelKind::Anomaly),
            store.path_for("b", ModelKind::Anomaly),
        )
        .unwrap();

        assert!(store.load::<Dummy>("b", ModelKind::Anomaly).is_none());
    }

    #[test]
    fn test_list_is_exact_per_device() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        store.save("a", ModelKind::Anomaly, &dummy()).unwrap();
        store.save("a", ModelKind::Ensemble, &dummy()).unwrap();
        store.save("a_b", ModelKind::Anomaly, &dummy()).unwrap();

        assert_eq!(
            store.list("a").unwrap(),
            vec!["a_anomaly.bin".to_string(), "a_ensemble.bin".to_string()]
        );
        assert_eq!(store.list("a_b").unwrap(), vec!["a_b_anomaly.bin".to_string()]);
    }

    #[test]
    fn test_remove_all_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        store.save("dev", ModelKind::Anomaly, &dummy()).unwrap();
        store.save("dev", ModelKind::Ensemble, &dummy()).unwrap();

        assert_eq!(store.remove_all("dev").unwrap(), 2);
        assert_eq!(store.remove_all("dev").unwrap(), 0);
        assert!(store.list("dev").unwrap().is_empty());
    }

    #[test]
    fn test_device_id_validation() {
        assert!(validate_device_id("classroom-101_fan").is_ok());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("..").is_err());
        assert!(validate_device_id("../etc/passwd").is_err());
        assert!(validate_device_id("a\\b").is_err());
        assert!(validate_device_id(&"x".repeat(129)).is_err());

        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.save("../escape", ModelKind::Anomaly, &dummy()),
            Err(StoreError::InvalidDeviceId { .. })
        ));
    }
}
