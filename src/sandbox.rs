//! File-backed sandbox provider
//!
//! Every physical object is one JSON record under the sandbox directory,
//! named after its physical id. Editing or deleting a record by hand is a
//! convenient way to simulate drift.

use chrono::{DateTime, Utc};
use provision::{Properties, Provider, ProviderError, ProviderResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;

/// One stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub kind: String,
    pub logical_id: String,
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct SandboxProvider {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl SandboxProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// `<kind>-<12 hex chars>`, unique per create call
    fn next_physical_id(&self, logical_id: &str, kind: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(logical_id.as_bytes());
        hasher.update(kind.as_bytes());
        hasher.update(&Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        hasher.update(&std::process::id().to_le_bytes());
        let hash = hasher.finalize().to_hex();
        format!("{}-{}", slug(kind), &hash.as_str()[..12])
    }

    fn record_path(&self, physical_id: &str) -> ProviderResult<PathBuf> {
        if physical_id.is_empty()
            || !physical_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProviderError::NotFound(physical_id.to_string()));
        }
        Ok(self.dir.join(format!("{physical_id}.json")))
    }

    fn load(&self, physical_id: &str) -> ProviderResult<Option<SandboxRecord>> {
        let path = self.record_path(physical_id)?;
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                ProviderError::Permanent(format!("corrupt record {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    fn store(&self, physical_id: &str, record: &SandboxRecord) -> ProviderResult<()> {
        let path = self.record_path(physical_id)?;
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, &e))?;
        let body = serde_json::to_string_pretty(record)
            .map_err(|e| ProviderError::Permanent(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| io_error(&self.dir, &e))?;
        tmp.write_all(body.as_bytes())
            .map_err(|e| io_error(tmp.path(), &e))?;
        tmp.persist(&path).map_err(|e| io_error(&path, &e.error))?;
        Ok(())
    }

    /// All stored records keyed by physical id
    pub fn records(&self) -> ProviderResult<Vec<(String, SandboxRecord)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, &e)),
        };
        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(record) = self.load(id)? {
                records.push((id.to_string(), record));
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}

impl Provider for SandboxProvider {
    fn create(
        &self,
        logical_id: &str,
        kind: &str,
        properties: &Properties,
    ) -> ProviderResult<String> {
        let physical_id = self.next_physical_id(logical_id, kind);
        let now = Utc::now();
        self.store(
            &physical_id,
            &SandboxRecord {
                kind: kind.to_string(),
                logical_id: logical_id.to_string(),
                properties: properties.clone(),
                created_at: now,
                updated_at: now,
            },
        )?;
        log::debug!("sandbox: created {kind} {logical_id} as {physical_id}");
        Ok(physical_id)
    }

    fn update(&self, physical_id: &str, kind: &str, properties: &Properties) -> ProviderResult<()> {
        let mut record = self
            .load(physical_id)?
            .ok_or_else(|| ProviderError::NotFound(physical_id.to_string()))?;
        if record.kind != kind {
            return Err(ProviderError::Permanent(format!(
                "{physical_id} is a {}, not a {kind}",
                record.kind
            )));
        }
        record.properties = properties.clone();
        record.updated_at = Utc::now();
        self.store(physical_id, &record)?;
        log::debug!("sandbox: updated {physical_id}");
        Ok(())
    }

    fn delete(&self, physical_id: &str, _kind: &str) -> ProviderResult<()> {
        let path = self.record_path(physical_id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("sandbox: deleted {physical_id}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ProviderError::NotFound(physical_id.to_string()))
            }
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    fn read(&self, physical_id: &str, _kind: &str) -> ProviderResult<Option<Properties>> {
        Ok(self.load(physical_id)?.map(|r| r.properties))
    }
}

fn slug(kind: &str) -> String {
    let slug: String = kind
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "res".to_string()
    } else {
        slug.to_string()
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> ProviderError {
    let message = format!("{}: {e}", path.display());
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            ProviderError::Transient(message)
        }
        _ => ProviderError::Permanent(message),
    }
}
