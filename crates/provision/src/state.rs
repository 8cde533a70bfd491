//! State store - persisted snapshot of the last applied resources
//!
//! The snapshot is a versioned JSON document. Writes go to a temporary file
//! in the same directory which is fsynced and renamed over the old file, so
//! a crash never leaves a half-written snapshot. A lock file created with
//! create-new semantics keeps two runs from mutating the same snapshot.

use crate::error::{Error, Result};
use crate::value::Properties;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Current snapshot schema version
pub const SCHEMA_VERSION: u32 = 1;

const SNAPSHOT_FILE: &str = "snapshot.json";
const LOCK_FILE: &str = "snapshot.lock";

// ============================================================================
// Snapshot
// ============================================================================

/// Last-known state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub kind: String,
    /// Declared properties as applied (references unresolved)
    pub properties: Properties,
    /// Provider-assigned identifier
    pub physical_id: String,
    /// Logical ids this resource required when applied
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A superseded physical object whose deletion has not succeeded yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposed {
    pub physical_id: String,
    pub kind: String,
}

/// Ordered mapping of logical id to last-known state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Incremented on every save
    #[serde(default)]
    pub serial: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub resources: BTreeMap<String, SnapshotEntry>,
    /// Old objects left behind by replacements, keyed by logical id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deposed: BTreeMap<String, Vec<Deposed>>,
    /// blake3 of the serialized `resources` and `deposed` sections
    #[serde(default)]
    pub checksum: String,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            serial: 0,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
            deposed: BTreeMap::new(),
            checksum: String::new(),
        }
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&SnapshotEntry> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    pub fn physical_id(&self, id: &str) -> Option<&str> {
        self.resources.get(id).map(|e| e.physical_id.as_str())
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: SnapshotEntry) {
        self.resources.insert(id.into(), entry);
    }

    pub fn remove(&mut self, id: &str) -> Option<SnapshotEntry> {
        self.resources.remove(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Logical ids in key order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Remember an old object of `id` that still has to be deleted
    pub fn depose(&mut self, id: impl Into<String>, object: Deposed) {
        let objects = self.deposed.entry(id.into()).or_default();
        if !objects.contains(&object) {
            objects.push(object);
        }
    }

    /// Forget a deposed object once it is gone; true if it was recorded
    pub fn forget_deposed(&mut self, id: &str, physical_id: &str) -> bool {
        let Some(objects) = self.deposed.get_mut(id) else {
            return false;
        };
        let before = objects.len();
        objects.retain(|o| o.physical_id != physical_id);
        let removed = objects.len() != before;
        if objects.is_empty() {
            self.deposed.remove(id);
        }
        removed
    }

    /// Deposed objects of `id`
    pub fn deposed_of(&self, id: &str) -> &[Deposed] {
        self.deposed.get(id).map_or(&[], Vec::as_slice)
    }

    fn compute_checksum(&self) -> Result<String> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&serde_json::to_vec(&self.resources)?);
        if !self.deposed.is_empty() {
            hasher.update(&serde_json::to_vec(&self.deposed)?);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

// ============================================================================
// Lock
// ============================================================================

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("COMPUTERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "pid {} on {} since {}",
            self.pid,
            self.host,
            self.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// Exclusive hold on a state directory; released on drop
#[derive(Debug)]
pub struct StateLock<'a> {
    store: &'a StateStore,
    released: bool,
}

impl StateLock<'_> {
    /// Load the snapshot under the lock
    pub fn load(&self) -> Result<Snapshot> {
        self.store.load()
    }

    /// Save the snapshot under the lock
    pub fn save(&self, snapshot: &mut Snapshot) -> Result<()> {
        self.store.save(snapshot)
    }

    pub fn store(&self) -> &StateStore {
        self.store
    }

    /// Release the lock explicitly
    pub fn unlock(mut self) -> Result<()> {
        self.released = true;
        self.store.remove_lock_file()
    }
}

impl Drop for StateLock<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.store.remove_lock_file()
        {
            log::warn!("Failed to release state lock: {}", e);
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// File-backed snapshot storage rooted at a directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Load the snapshot
    ///
    /// A missing file is a first run and yields an empty snapshot. Anything
    /// that exists but cannot be read, parsed or verified is
    /// [`Error::CorruptState`]; it is never treated as empty.
    pub fn load(&self) -> Result<Snapshot> {
        let path = self.snapshot_path();

        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("State file does not exist, using empty snapshot");
                return Ok(Snapshot::new());
            }
            Err(e) => {
                return Err(Error::CorruptState {
                    path,
                    reason: format!("unreadable: {e}"),
                });
            }
        };

        let raw: serde_json::Value =
            serde_json::from_slice(&content).map_err(|e| Error::CorruptState {
                path: path.clone(),
                reason: format!("invalid JSON: {e}"),
            })?;

        let version = raw
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| Error::CorruptState {
                path: path.clone(),
                reason: "missing schema version".to_string(),
            })?;
        if version > u64::from(SCHEMA_VERSION) {
            return Err(Error::UnsupportedStateVersion {
                path,
                found: u32::try_from(version).unwrap_or(u32::MAX),
                supported: SCHEMA_VERSION,
            });
        }

        let snapshot: Snapshot =
            serde_json::from_value(raw).map_err(|e| Error::CorruptState {
                path: path.clone(),
                reason: format!("unexpected structure: {e}"),
            })?;

        let expected = snapshot.compute_checksum()?;
        if snapshot.checksum != expected {
            return Err(Error::CorruptState {
                path,
                reason: "checksum mismatch".to_string(),
            });
        }

        log::debug!(
            "Loaded snapshot serial {} with {} resources from {}",
            snapshot.serial,
            snapshot.len(),
            path.display()
        );
        Ok(snapshot)
    }

    /// Atomically replace the stored snapshot
    ///
    /// Bumps `serial`, refreshes `updated_at` and `checksum` on the passed
    /// snapshot so the in-memory copy matches what is on disk.
    pub fn save(&self, snapshot: &mut Snapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        snapshot.version = SCHEMA_VERSION;
        snapshot.serial += 1;
        snapshot.updated_at = Utc::now();
        snapshot.checksum = snapshot.compute_checksum()?;

        let content = serde_json::to_vec_pretty(snapshot)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.snapshot_path()).map_err(|e| e.error)?;

        log::debug!(
            "Saved snapshot serial {} ({} resources)",
            snapshot.serial,
            snapshot.len()
        );
        Ok(())
    }

    /// Acquire the exclusive run lock
    ///
    /// Never blocks: if another run holds the lock this fails immediately
    /// with [`Error::ConcurrentRun`].
    pub fn lock(&self) -> Result<StateLock<'_>> {
        fs::create_dir_all(&self.dir)?;
        let path = self.lock_path();

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = self
                    .lock_info()
                    .ok()
                    .flatten()
                    .map(|info| info.describe())
                    .unwrap_or_else(|| "unknown holder".to_string());
                return Err(Error::ConcurrentRun { path, holder });
            }
            Err(e) => return Err(e.into()),
        };

        let info = LockInfo::current();
        file.write_all(&serde_json::to_vec(&info)?)?;
        file.sync_all()?;

        log::debug!("Acquired state lock {}", path.display());
        Ok(StateLock {
            store: self,
            released: false,
        })
    }

    /// Read the current lock holder, if locked
    pub fn lock_info(&self) -> Result<Option<LockInfo>> {
        match fs::read(self.lock_path()) {
            Ok(content) => Ok(serde_json::from_slice(&content).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a stale lock left behind by a crashed run
    ///
    /// Returns the holder that was removed.
    pub fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let info = self.lock_info()?;
        if self.lock_path().exists() {
            self.remove_lock_file()?;
            log::warn!("Removed state lock {}", self.lock_path().display());
        }
        Ok(info)
    }

    fn remove_lock_file(&self) -> Result<()> {
        match fs::remove_file(self.lock_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "Vpc",
            SnapshotEntry {
                kind: "network".into(),
                properties: Properties::from([("cidr".to_string(), Value::from("10.0.0.0/16"))]),
                physical_id: "vpc-1".into(),
                dependencies: Vec::new(),
            },
        );
        snapshot.insert(
            "Subnet",
            SnapshotEntry {
                kind: "subnet".into(),
                properties: Properties::from([
                    ("network".to_string(), Value::reference("Vpc")),
                    ("cidr".to_string(), Value::from("10.0.1.0/24")),
                ]),
                physical_id: "subnet-1".into(),
                dependencies: vec!["Vpc".into()],
            },
        );
        snapshot
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());

        let mut snapshot = sample();
        store.save(&mut snapshot).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.serial, 1);
    }

    #[test]
    fn test_fractional_properties_survive_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());

        let floats = [
            0.009_540_538_003_165_153,
            0.1,
            1.0 / 3.0,
            123_456.789,
            5e-324,
            f64::MAX,
        ];
        let mut snapshot = sample();
        for (i, x) in floats.iter().enumerate() {
            snapshot.insert(
                format!("Queue{i}"),
                SnapshotEntry {
                    kind: "queue".into(),
                    properties: Properties::from([
                        ("visibility".to_string(), Value::Float(*x)),
                        (
                            "weights".to_string(),
                            Value::List(vec![Value::Float(*x / 7.0), Value::Float(-*x)]),
                        ),
                    ]),
                    physical_id: format!("queue-{i}"),
                    dependencies: Vec::new(),
                },
            );
        }

        store.save(&mut snapshot).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, snapshot);

        // A second save/load cycle on the loaded copy stays stable
        let mut again = loaded;
        store.save(&mut again).unwrap();
        assert_eq!(store.load().unwrap().checksum, again.checksum);
    }

    #[test]
    fn test_deposed_objects_are_persisted_and_checksummed() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());

        let mut snapshot = sample();
        let old = Deposed {
            physical_id: "vpc-0".into(),
            kind: "network".into(),
        };
        snapshot.depose("Vpc", old.clone());
        snapshot.depose("Vpc", old.clone());
        assert_eq!(snapshot.deposed_of("Vpc"), std::slice::from_ref(&old));

        store.save(&mut snapshot).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.deposed_of("Vpc"), std::slice::from_ref(&old));

        let content = fs::read_to_string(store.snapshot_path()).unwrap();
        fs::write(store.snapshot_path(), content.replace("vpc-0", "vpc-9")).unwrap();
        assert!(matches!(store.load(), Err(Error::CorruptState { .. })));

        let mut snapshot = loaded;
        assert!(!snapshot.forget_deposed("Vpc", "vpc-9"));
        assert!(snapshot.forget_deposed("Vpc", "vpc-0"));
        assert!(snapshot.deposed.is_empty());
        assert!(snapshot.deposed_of("Vpc").is_empty());
    }

    #[test]
    fn test_missing_file_is_empty_snapshot() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_corrupt_not_empty() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        fs::write(store.snapshot_path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(Error::CorruptState { .. })));
    }

    #[test]
    fn test_tampered_content_fails_checksum() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let mut snapshot = sample();
        store.save(&mut snapshot).unwrap();

        let content = fs::read_to_string(store.snapshot_path()).unwrap();
        fs::write(store.snapshot_path(), content.replace("vpc-1", "vpc-2")).unwrap();

        match store.load() {
            Err(Error::CorruptState { reason, .. }) => assert!(reason.contains("checksum")),
            other => panic!("expected corrupt state, got {other:?}"),
        }
    }

    #[test]
    fn test_newer_version_refused() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        fs::write(
            store.snapshot_path(),
            r#"{"version": 99, "updated_at": "2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(
            store.load(),
            Err(Error::UnsupportedStateVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_second_lock_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());

        let first = store.lock().unwrap();
        let started = Instant::now();
        let second = store.lock();
        assert!(started.elapsed() < Duration::from_secs(1));
        match second {
            Err(Error::ConcurrentRun { holder, .. }) => {
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("expected concurrent run error, got {other:?}"),
        }

        drop(first);
        let third = store.lock().unwrap();
        third.unlock().unwrap();
        assert!(store.lock_info().unwrap().is_none());
    }

    #[test]
    fn test_force_unlock_removes_stale_lock() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let lock = store.lock().unwrap();
        std::mem::forget(lock);

        let removed = store.force_unlock().unwrap();
        assert!(removed.is_some());
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let mut snapshot = sample();
        store.save(&mut snapshot).unwrap();
        store.save(&mut snapshot).unwrap();

        let files: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from(SNAPSHOT_FILE)]);
        assert_eq!(store.load().unwrap().serial, 2);
    }
}
