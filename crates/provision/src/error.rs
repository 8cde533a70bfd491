//! Error types for provisioning operations.
//!
//! Errors are split in two layers. [`ProviderError`] is what a provider
//! returns for a single operation and carries the transient/permanent
//! classification used by the retry logic. [`Error`] is the engine-level
//! taxonomy: everything that makes the model, graph or state unsound is
//! fatal before any provider mutation, while [`Error::ChangeFailed`] only
//! blocks the changes downstream of the one that failed.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Categories of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The desired-state model is unsound (duplicate ids, bad references, cycles)
    Model,
    /// The persisted snapshot cannot be trusted or is held by another run
    State,
    /// A provider operation failed
    Provider,
    /// Filesystem or serialization failure
    Io,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Model => "Invalid desired-state model",
            Self::State => "State store problem",
            Self::Provider => "Provider operation failed",
            Self::Io => "I/O error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Model => "Fix the resource declarations named in the error and re-run",
            Self::State => "Inspect the state directory; use `state unlock --force` only for stale locks",
            Self::Provider => "Check the captured provider error; transient failures can simply be retried",
            Self::Io => "Check file permissions and available disk space",
        }
    }
}

/// Errors returned by provider operations.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ProviderError {
    /// Temporary failure (throttling, network blip); worth retrying
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The operation did not finish within its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The physical object does not exist
    #[error("physical resource not found: {0}")]
    NotFound(String),

    /// Terminal failure; retrying will not help
    #[error("{0}")]
    Permanent(String),

    /// The provider does not implement this operation
    #[error("operation not supported by provider: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Whether the executor should retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A logical identifier was declared twice
    #[error("duplicate resource id: {id}")]
    DuplicateId {
        /// The offending logical identifier
        id: String,
    },

    /// A reference names a resource that was never declared
    #[error("{}", unknown_resource_message(.from.as_deref(), .target))]
    UnknownResource {
        /// Resource holding the reference, when known
        from: Option<String>,
        /// The undeclared logical identifier
        target: String,
    },

    /// The reference graph contains a cycle
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Cycle members in path order; the first member is repeated at the end
        cycle: Vec<String>,
    },

    /// The snapshot exists but cannot be read, parsed or verified
    #[error("corrupt state file {}: {reason}", .path.display())]
    CorruptState {
        /// Snapshot path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// The snapshot was written by a newer format
    #[error("state file {} has schema version {found}, this build supports up to {supported}", .path.display())]
    UnsupportedStateVersion {
        /// Snapshot path
        path: PathBuf,
        /// Version found in the file
        found: u32,
        /// Highest version this build understands
        supported: u32,
    },

    /// Another run holds the state lock
    #[error("state is locked by another run ({holder}); lock file: {}", .path.display())]
    ConcurrentRun {
        /// Lock file path
        path: PathBuf,
        /// Description of the lock holder
        holder: String,
    },

    /// A resource uses a kind no provider is registered for
    #[error("no provider registered for kind '{kind}' (resource {id})")]
    UnknownKind {
        /// Resource kind
        kind: String,
        /// Resource using it
        id: String,
    },

    /// The desired-state document is malformed
    #[error("invalid document: {message}")]
    Document {
        /// Description of the problem
        message: String,
    },

    /// A provider operation failed outside the executor (e.g. drift reads)
    #[error("provider error for {id}: {source}")]
    Provider {
        /// Logical identifier of the resource
        id: String,
        /// Underlying provider error
        #[source]
        source: ProviderError,
    },

    /// A change failed permanently or exhausted its retries
    #[error("change for {id} failed after {attempts} attempt(s): {source}")]
    ChangeFailed {
        /// Logical identifier of the resource
        id: String,
        /// Number of attempts made
        attempts: u32,
        /// Last provider error
        #[source]
        source: ProviderError,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn unknown_resource_message(from: Option<&str>, target: &str) -> String {
    match from {
        Some(from) => format!("resource {from} references undeclared resource {target}"),
        None => format!("unknown resource: {target}"),
    }
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::DuplicateId { .. }
            | Error::UnknownResource { .. }
            | Error::CyclicDependency { .. }
            | Error::UnknownKind { .. }
            | Error::Document { .. } => ErrorCategory::Model,
            Error::CorruptState { .. }
            | Error::UnsupportedStateVersion { .. }
            | Error::ConcurrentRun { .. } => ErrorCategory::State,
            Error::Provider { .. } | Error::ChangeFailed { .. } => ErrorCategory::Provider,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Whether this error aborts a run before any provider mutation.
    pub fn is_fatal_before_execution(&self) -> bool {
        matches!(self.category(), ErrorCategory::Model | ErrorCategory::State)
    }

    /// Logical identifiers this error is about, for actionable reporting.
    pub fn resource_ids(&self) -> Vec<&str> {
        match self {
            Error::DuplicateId { id }
            | Error::UnknownKind { id, .. }
            | Error::Provider { id, .. }
            | Error::ChangeFailed { id, .. } => vec![id.as_str()],
            Error::UnknownResource { from, target } => from
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(target.as_str()))
                .collect(),
            Error::CyclicDependency { cycle } => {
                let mut ids: Vec<&str> = cycle.iter().map(String::as_str).collect();
                if ids.len() > 1 && ids.first() == ids.last() {
                    ids.pop();
                }
                ids
            }
            _ => Vec::new(),
        }
    }
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;
