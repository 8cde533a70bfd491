//! Drift detection - compare the snapshot with what providers report
//!
//! Only properties recorded in the snapshot are compared; providers may
//! return extra computed attributes which are ignored.

use crate::diff::FieldDiff;
use crate::error::{Error, ProviderError};
use crate::provider::ProviderRegistry;
use crate::state::Snapshot;
use crate::value::resolve_properties;
use serde::{Deserialize, Serialize};

/// Drift status of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum DriftStatus {
    InSync,
    /// Live properties differ from the applied ones
    Drifted { fields: Vec<FieldDiff> },
    /// The physical object no longer exists
    Missing,
    /// The provider cannot read this kind
    Unsupported,
    /// The read failed
    Error { error: ProviderError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEntry {
    pub id: String,
    pub kind: String,
    pub physical_id: String,
    pub status: DriftStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    /// Resources that drifted or disappeared
    pub fn drifted(&self) -> impl Iterator<Item = &DriftEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, DriftStatus::Drifted { .. } | DriftStatus::Missing))
    }

    pub fn has_drift(&self) -> bool {
        self.drifted().next().is_some()
    }

    /// Failed reads, each naming its resource
    pub fn read_failures(&self) -> Vec<Error> {
        self.entries
            .iter()
            .filter_map(|e| match &e.status {
                DriftStatus::Error { error } => Some(Error::Provider {
                    id: e.id.clone(),
                    source: error.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Read every snapshot resource and compare it with its applied properties
pub fn detect(snapshot: &Snapshot, providers: &ProviderRegistry) -> DriftReport {
    let lookup = |target: &str| snapshot.physical_id(target).map(String::from);
    let mut report = DriftReport::default();

    for (id, entry) in &snapshot.resources {
        let status = match providers.get(&entry.kind) {
            None => DriftStatus::Unsupported,
            Some(provider) => match provider.read(&entry.physical_id, &entry.kind) {
                Ok(None) => DriftStatus::Missing,
                Ok(Some(live)) => {
                    // Unresolvable references compare as their raw form
                    let expected = resolve_properties(&entry.properties, &lookup)
                        .unwrap_or_else(|_| entry.properties.clone());
                    let fields: Vec<FieldDiff> = expected
                        .iter()
                        .filter(|(key, value)| live.get(*key) != Some(*value))
                        .map(|(key, value)| FieldDiff {
                            field: key.clone(),
                            old: Some(value.clone()),
                            new: live.get(key).cloned(),
                            forces_replace: false,
                            provisional: false,
                        })
                        .collect();
                    if fields.is_empty() {
                        DriftStatus::InSync
                    } else {
                        DriftStatus::Drifted { fields }
                    }
                }
                Err(ProviderError::Unsupported(_)) => DriftStatus::Unsupported,
                Err(error) => {
                    log::warn!("Failed to read {id} ({}): {error}", entry.physical_id);
                    DriftStatus::Error { error }
                }
            },
        };
        report.entries.push(DriftEntry {
            id: id.clone(),
            kind: entry.kind.clone(),
            physical_id: entry.physical_id.clone(),
            status,
        });
    }

    log::debug!(
        "Drift check: {} resource(s), {} drifted",
        report.entries.len(),
        report.drifted().count()
    );
    report
}
