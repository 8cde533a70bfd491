//! Run context: progress reporting, confirmation and cancellation
//!
//! These traits keep the engine free of any terminal or UI dependency.
//! Progress callbacks are always invoked on the coordinating thread.

use crate::diff::Action;
use crate::error::ProviderError;
use crate::types::{ExecuteSummary, Outcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Progress callback for execution
pub trait ProgressCallback: Send {
    /// Called once before any change starts; `count` excludes no-ops
    fn on_run_start(&mut self, count: usize);

    /// Called when a change is handed to a worker
    fn on_change_start(&mut self, id: &str, action: Action);

    /// Called when a provider operation is about to be retried
    fn on_retry(&mut self, id: &str, attempt: u32, error: &ProviderError, delay: Duration) {
        let _ = (id, attempt, error, delay);
    }

    /// Called when a change reaches a terminal state
    fn on_change_complete(&mut self, id: &str, action: Action, outcome: &Outcome);

    /// Called after the final snapshot save
    fn on_run_complete(&mut self, summary: &ExecuteSummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _count: usize) {}
    fn on_change_start(&mut self, _id: &str, _action: Action) {}
    fn on_change_complete(&mut self, _id: &str, _action: Action, _outcome: &Outcome) {}
    fn on_run_complete(&mut self, _summary: &ExecuteSummary) {}
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback {
    /// Ask the user to confirm an action
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool>;
}

/// Always confirms
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(true)
    }
}

/// Shared flag that asks a run to stop issuing new work
///
/// Cloning yields a handle to the same flag, so a signal handler can hold
/// one clone while the executor polls another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }
}
