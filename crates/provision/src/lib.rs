//! # Provision
//!
//! A declarative infrastructure provisioning engine.
//!
//! The engine takes a desired set of resources, compares it with the last
//! applied snapshot, and converges real infrastructure through pluggable
//! providers while respecting the dependencies between resources.
//!
//! ## Core Concepts
//!
//! - **Model**: typed desired state; resources reference each other by logical id
//! - **Dag**: dependency graph derived from references, with cycle detection
//! - **ChangeSet**: per-resource Create/Update/Replace/Delete/Noop decisions
//! - **Executor**: applies a change set in parallel, in dependency order
//! - **StateStore**: locked, checksummed, atomically written snapshot
//!
//! ## Example
//!
//! ```ignore
//! use provision::{diff, Document, Executor, ExecuteOptions, NoProgress, StateStore};
//!
//! let doc = Document::load("network.toml".as_ref())?;
//! let model = doc.to_model()?;
//!
//! let store = StateStore::new(".keel/state");
//! let lock = store.lock()?;
//! let mut snapshot = lock.load()?;
//!
//! let changes = diff::plan(&model, &snapshot, doc.schemas())?;
//! let report = Executor::new(&providers, ExecuteOptions::default())
//!     .execute(&changes, &lock, &mut snapshot, &mut NoProgress)?;
//! println!("{:?}", report.summary());
//! ```

pub mod context;
pub mod diff;
pub mod document;
pub mod drift;
pub mod error;
pub mod executor;
pub mod graph;
pub mod model;
pub mod provider;
pub mod retry;
pub mod schema;
pub mod state;
pub mod types;
pub mod value;

// Re-export main types at crate root
pub use context::{AutoConfirm, CancelToken, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::{Action, Cause, Change, ChangeSet, DiffSummary, FieldDiff};
pub use document::{Document, Format};
pub use drift::{DriftReport, DriftStatus};
pub use error::{Error, ErrorCategory, ProviderError, Result};
pub use executor::Executor;
pub use graph::Dag;
pub use model::{Model, Resource};
pub use provider::{Provider, ProviderRegistry, ProviderResult};
pub use retry::RetryConfig;
pub use schema::{KindSchema, ReplaceStrategy, Schemas};
pub use state::{Deposed, LockInfo, Snapshot, SnapshotEntry, StateLock, StateStore};
pub use types::{BlockReason, ExecuteOptions, ExecuteSummary, FailurePolicy, Outcome, RunReport};
pub use value::{Properties, Value};
