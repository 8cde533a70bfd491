//! Execution engine - applies a change set in dependency order
//!
//! The coordinating thread owns the snapshot and every scheduling decision.
//! Provider operations run on a bounded rayon pool and report back over a
//! channel. A change is dispatched only once every upstream change in the
//! execution graph has succeeded (or was a no-op); a failure blocks the
//! changes downstream of it. The snapshot is saved after every change that
//! touched a provider, so an interrupted run loses at most in-flight work.

use crate::context::{CancelToken, ProgressCallback};
use crate::diff::{Action, Change, ChangeSet};
use crate::error::{Error, ProviderError, Result};
use crate::graph::Dag;
use crate::provider::{Provider, ProviderRegistry, ProviderResult};
use crate::retry::{Attempted, RetryCallback, with_retry};
use crate::schema::ReplaceStrategy;
use crate::state::{Deposed, Snapshot, SnapshotEntry, StateLock};
use crate::types::{BlockReason, ChangeReport, ExecuteOptions, FailurePolicy, Outcome, RunReport};
use crate::value::{Properties, resolve_properties};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

/// Scheduling state of one change
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Pending,
    InProgress,
    Done(Outcome),
}

/// What a finished job did to the physical world
#[derive(Debug)]
enum Effect {
    /// Nothing observable changed
    None,
    /// A new physical object now backs the resource
    Created(String),
    /// A replacement was created but the old object could not be deleted
    Superseded { created: String, old: String },
    /// The existing physical object was updated in place
    Updated,
    /// The physical object is gone
    Deleted,
}

/// Messages from workers to the coordinator
#[derive(Debug)]
enum Event {
    Retry {
        node: usize,
        attempt: u32,
        error: ProviderError,
        delay: Duration,
    },
    Finished {
        node: usize,
        effect: Effect,
        error: Option<ProviderError>,
        attempts: u32,
    },
}

/// Everything a worker needs; owned so it can cross into the pool
struct Job {
    node: usize,
    id: String,
    kind: String,
    action: Action,
    strategy: ReplaceStrategy,
    properties: Properties,
    prior_physical: Option<String>,
    /// Kind the prior object was created as (differs on kind changes)
    prior_kind: String,
    provider: Arc<dyn Provider>,
    prior_provider: Arc<dyn Provider>,
    timeout: Duration,
    retry: crate::retry::RetryConfig,
    events: Sender<Event>,
}

/// Forwards retry notifications to the coordinator
struct ForwardRetry<'a> {
    node: usize,
    events: &'a Sender<Event>,
}

impl RetryCallback for ForwardRetry<'_> {
    fn on_retry(&self, attempt: u32, _max_attempts: u32, error: &ProviderError, delay: Duration) {
        let _ = self.events.send(Event::Retry {
            node: self.node,
            attempt,
            error: error.clone(),
            delay,
        });
    }
}

/// Applies change sets against a provider registry
pub struct Executor<'a> {
    providers: &'a ProviderRegistry,
    options: ExecuteOptions,
    cancel: CancelToken,
}

impl<'a> Executor<'a> {
    pub fn new(providers: &'a ProviderRegistry, options: ExecuteOptions) -> Self {
        Self {
            providers,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Use an existing cancellation token (e.g. one wired to Ctrl-C)
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute `changes`, updating `snapshot` and saving it through `lock`
    ///
    /// Returns an error only for problems that make the run itself unsound:
    /// a kind without a provider (before any work starts) or a failure to
    /// persist the snapshot. Provider failures are reported per change.
    pub fn execute<P: ProgressCallback>(
        &self,
        changes: &ChangeSet,
        lock: &StateLock<'_>,
        snapshot: &mut Snapshot,
        progress: &mut P,
    ) -> Result<RunReport> {
        let providers = self.resolve_providers(changes)?;
        let graph = execution_graph(changes)?;
        let nodes = &changes.changes;
        let position: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str(), i))
            .collect();
        let dependents: Vec<Vec<usize>> = nodes
            .iter()
            .map(|c| graph.dependents(&c.id).iter().map(|d| position[d]).collect())
            .collect();

        let mut slots: Vec<Slot> = nodes
            .iter()
            .map(|c| {
                if c.action == Action::Noop {
                    Slot::Done(Outcome::Noop)
                } else {
                    Slot::Pending
                }
            })
            .collect();
        // Upstream changes still to succeed; no-ops are already satisfied
        let mut waiting: Vec<usize> = nodes
            .iter()
            .map(|c| {
                graph
                    .dependencies(&c.id)
                    .iter()
                    .filter(|d| nodes[position[*d]].action != Action::Noop)
                    .count()
            })
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..nodes.len())
            .filter(|&i| slots[i] == Slot::Pending && waiting[i] == 0)
            .map(Reverse)
            .collect();

        let mut dirty = refresh_unchanged(changes, snapshot);
        let actionable = slots.iter().filter(|s| **s == Slot::Pending).count();
        progress.on_run_start(actionable);
        log::info!(
            "Executing {} change(s) with up to {} job(s)",
            actionable,
            self.options.jobs
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .thread_name(|i| format!("provision-worker-{i}"))
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(format!("failed to create thread pool: {e}"))))?;

        let (tx, rx) = mpsc::channel::<Event>();
        let mut halted = false;

        let result: Result<()> = pool.in_place_scope(|scope| {
            let mut in_flight = 0usize;
            loop {
                while in_flight < self.options.jobs.max(1) && !halted && !self.cancel.is_cancelled() {
                    let Some(Reverse(node)) = ready.pop() else {
                        break;
                    };
                    let change = &nodes[node];
                    slots[node] = Slot::InProgress;
                    progress.on_change_start(&change.id, change.action);

                    match self.job(node, change, &providers, snapshot, &tx) {
                        Ok(job) => {
                            log::debug!("Dispatching {} {}", change.action, change.id);
                            in_flight += 1;
                            scope.spawn(move |_| run_job(job));
                        }
                        Err(error) => {
                            // Nothing was attempted; treat like a terminal provider failure
                            let outcome = Outcome::Failed { error, attempts: 0 };
                            self.fail(node, outcome, nodes, &dependents, &mut slots, progress, &mut halted);
                        }
                    }
                }

                if in_flight == 0 {
                    break;
                }

                let Ok(event) = rx.recv() else {
                    break;
                };
                match event {
                    Event::Retry {
                        node,
                        attempt,
                        error,
                        delay,
                    } => {
                        log::warn!(
                            "{} attempt {} failed: {}; retrying in {:?}",
                            nodes[node].id,
                            attempt,
                            error,
                            delay
                        );
                        progress.on_retry(&nodes[node].id, attempt, &error, delay);
                    }
                    Event::Finished {
                        node,
                        effect,
                        error,
                        attempts,
                    } => {
                        in_flight -= 1;
                        let change = &nodes[node];
                        if record_effect(change, &effect, snapshot) {
                            lock.save(snapshot)?;
                            dirty = false;
                        }

                        match error {
                            None => {
                                log::info!("{} {}: done", change.action, change.id);
                                let outcome = Outcome::Succeeded { attempts };
                                progress.on_change_complete(&change.id, change.action, &outcome);
                                slots[node] = Slot::Done(outcome);
                                for &next in &dependents[node] {
                                    waiting[next] = waiting[next].saturating_sub(1);
                                    if waiting[next] == 0 && slots[next] == Slot::Pending {
                                        ready.push(Reverse(next));
                                    }
                                }
                            }
                            Some(error) => {
                                log::warn!("{} {} failed: {}", change.action, change.id, error);
                                let outcome = Outcome::Failed { error, attempts };
                                self.fail(node, outcome, nodes, &dependents, &mut slots, progress, &mut halted);
                            }
                        }
                    }
                }
            }
            Ok(())
        });
        result?;

        let cancelled = self.cancel.is_cancelled();
        let mut report = RunReport {
            changes: Vec::with_capacity(nodes.len()),
            cancelled: false,
        };
        for (node, slot) in slots.into_iter().enumerate() {
            let change = &nodes[node];
            let outcome = match slot {
                Slot::Done(outcome) => outcome,
                Slot::Pending | Slot::InProgress => {
                    let reason = if cancelled {
                        report.cancelled = true;
                        BlockReason::Cancelled
                    } else {
                        BlockReason::Halted
                    };
                    let outcome = Outcome::Blocked { reason };
                    progress.on_change_complete(&change.id, change.action, &outcome);
                    outcome
                }
            };
            report.changes.push(ChangeReport {
                id: change.id.clone(),
                action: change.action,
                outcome,
            });
        }

        if dirty {
            lock.save(snapshot)?;
        }

        let summary = report.summary();
        log::info!(
            "Run finished: {} succeeded, {} failed, {} blocked, {} unchanged",
            summary.succeeded,
            summary.failed,
            summary.blocked,
            summary.noop
        );
        progress.on_run_complete(&summary);
        Ok(report)
    }

    /// Look up a provider for every change that needs one
    fn resolve_providers(&self, changes: &ChangeSet) -> Result<HashMap<String, Arc<dyn Provider>>> {
        let mut providers = HashMap::new();
        for change in changes.actionable() {
            let prior_kind = change.prior.as_ref().map(|p| &p.kind);
            for kind in std::iter::once(&change.kind).chain(prior_kind) {
                if providers.contains_key(kind) {
                    continue;
                }
                let provider = self.providers.get(kind).ok_or_else(|| Error::UnknownKind {
                    kind: kind.clone(),
                    id: change.id.clone(),
                })?;
                providers.insert(kind.clone(), provider);
            }
        }
        Ok(providers)
    }

    /// Prepare a job, resolving references against the current snapshot
    fn job(
        &self,
        node: usize,
        change: &Change,
        providers: &HashMap<String, Arc<dyn Provider>>,
        snapshot: &Snapshot,
        events: &Sender<Event>,
    ) -> std::result::Result<Job, ProviderError> {
        let lookup = |kind: &str| {
            providers
                .get(kind)
                .cloned()
                .ok_or_else(|| ProviderError::Unsupported(format!("kind {kind}")))
        };
        let prior_kind = change
            .prior
            .as_ref()
            .map_or_else(|| change.kind.clone(), |p| p.kind.clone());
        let provider = lookup(&change.kind)?;
        let prior_provider = lookup(&prior_kind)?;

        let properties = match &change.desired {
            Some(desired) => resolve_properties(&desired.properties, &|target| {
                snapshot.physical_id(target).map(String::from)
            })
            .map_err(|target| {
                ProviderError::Permanent(format!("reference to {target} has no physical id"))
            })?,
            None => Properties::new(),
        };

        Ok(Job {
            node,
            id: change.id.clone(),
            kind: change.kind.clone(),
            action: change.action,
            strategy: change.replace.unwrap_or_default(),
            properties,
            prior_physical: match &change.deposed_of {
                Some(_) => change.prior.as_ref().map(|p| p.physical_id.clone()),
                None => snapshot.physical_id(&change.id).map(String::from),
            },
            prior_kind,
            provider,
            prior_provider,
            timeout: self.options.timeout,
            retry: self.options.retry.clone(),
            events: events.clone(),
        })
    }

    /// Record a failure and block everything downstream of it
    #[allow(clippy::too_many_arguments)]
    fn fail<P: ProgressCallback>(
        &self,
        node: usize,
        outcome: Outcome,
        nodes: &[Change],
        dependents: &[Vec<usize>],
        slots: &mut [Slot],
        progress: &mut P,
        halted: &mut bool,
    ) {
        let id = &nodes[node].id;
        progress.on_change_complete(id, nodes[node].action, &outcome);
        slots[node] = Slot::Done(outcome);

        let mut stack = dependents[node].clone();
        while let Some(next) = stack.pop() {
            if slots[next] != Slot::Pending {
                continue;
            }
            let outcome = Outcome::Blocked {
                reason: BlockReason::UpstreamFailed(id.clone()),
            };
            log::info!("{} blocked: {} failed", nodes[next].id, id);
            progress.on_change_complete(&nodes[next].id, nodes[next].action, &outcome);
            slots[next] = Slot::Done(outcome);
            stack.extend(dependents[next].iter().copied());
        }

        if self.options.failure_policy == FailurePolicy::Halt {
            *halted = true;
        }
    }
}

/// Build the execution graph of a change set
///
/// Creates, updates and replaces wait for the changes of their desired
/// dependencies. A delete of X waits for the change of every resource that
/// depended on X when last applied.
pub fn execution_graph(changes: &ChangeSet) -> Result<Dag> {
    let nodes = changes.changes.iter().map(|c| c.id.clone());
    let mut edges: Vec<(String, String)> = Vec::new();

    for change in &changes.changes {
        if change.action == Action::Delete {
            continue;
        }
        for dep in change.requires() {
            if changes.get(&dep).is_some() {
                edges.push((change.id.clone(), dep));
            }
        }
    }

    for delete in changes.changes.iter().filter(|c| c.action == Action::Delete) {
        for other in &changes.changes {
            let was_dependent = other
                .prior
                .as_ref()
                .is_some_and(|p| p.dependencies.iter().any(|d| *d == delete.id));
            if was_dependent && other.id != delete.id {
                edges.push((delete.id.clone(), other.id.clone()));
            }
        }
    }

    // An old object goes only after everything that used its owner has moved on
    for deposed in &changes.changes {
        let Some(owner) = &deposed.deposed_of else {
            continue;
        };
        for other in &changes.changes {
            if other.id == deposed.id || other.deposed_of.is_some() {
                continue;
            }
            let uses_owner = other.requires().iter().any(|d| d == owner)
                || other
                    .prior
                    .as_ref()
                    .is_some_and(|p| p.dependencies.iter().any(|d| d == owner));
            if uses_owner {
                edges.push((deposed.id.clone(), other.id.clone()));
            }
        }
    }

    Dag::new(nodes, edges)
}

/// Bring unchanged entries in line with their declarations
///
/// Properties can differ textually (a literal id vs a reference) while
/// resolving to the same value, and dependency lists can change without a
/// property change. Returns true if the snapshot was modified.
fn refresh_unchanged(changes: &ChangeSet, snapshot: &mut Snapshot) -> bool {
    let mut dirty = false;
    for change in changes.changes.iter().filter(|c| c.action == Action::Noop) {
        let (Some(desired), Some(entry)) = (&change.desired, snapshot.resources.get_mut(&change.id))
        else {
            continue;
        };
        let dependencies: Vec<String> = desired.references().into_iter().map(String::from).collect();
        if entry.properties != desired.properties || entry.dependencies != dependencies {
            entry.properties = desired.properties.clone();
            entry.dependencies = dependencies;
            dirty = true;
        }
    }
    dirty
}

/// Apply a job's effect to the snapshot; true if anything changed
fn record_effect(change: &Change, effect: &Effect, snapshot: &mut Snapshot) -> bool {
    let entry = |physical_id: String| {
        change.desired.as_ref().map(|desired| SnapshotEntry {
            kind: desired.kind.clone(),
            properties: desired.properties.clone(),
            physical_id,
            dependencies: desired.references().into_iter().map(String::from).collect(),
        })
    };

    match effect {
        Effect::None => false,
        Effect::Created(physical_id) => match entry(physical_id.clone()) {
            Some(entry) => {
                snapshot.insert(change.id.clone(), entry);
                true
            }
            None => false,
        },
        Effect::Updated => {
            let physical = snapshot.physical_id(&change.id).map(String::from);
            match physical.and_then(entry) {
                Some(entry) => {
                    snapshot.insert(change.id.clone(), entry);
                    true
                }
                None => false,
            }
        }
        Effect::Superseded { created, old } => {
            let kind = change
                .prior
                .as_ref()
                .map_or_else(|| change.kind.clone(), |p| p.kind.clone());
            snapshot.depose(
                change.id.clone(),
                Deposed {
                    physical_id: old.clone(),
                    kind,
                },
            );
            if let Some(entry) = entry(created.clone()) {
                snapshot.insert(change.id.clone(), entry);
            }
            true
        }
        Effect::Deleted => match (&change.deposed_of, &change.prior) {
            (Some(owner), Some(prior)) => snapshot.forget_deposed(owner, &prior.physical_id),
            _ => snapshot.remove(&change.id).is_some(),
        },
    }
}

/// Worker body: perform the provider calls for one change and report back
fn run_job(job: Job) {
    let (effect, error, attempts) = match job.action {
        Action::Create => {
            let out = job.create();
            match out.result {
                Ok(physical) => (Effect::Created(physical), None, out.attempts),
                Err(e) => (Effect::None, Some(e), out.attempts),
            }
        }
        Action::Update => job.update(),
        Action::Replace => job.replace(),
        Action::Delete => {
            let out = job.delete();
            match out.result {
                Ok(()) => (Effect::Deleted, None, out.attempts),
                Err(e) => (Effect::None, Some(e), out.attempts),
            }
        }
        Action::Noop => (Effect::None, None, 0),
    };
    let _ = job.events.send(Event::Finished {
        node: job.node,
        effect,
        error,
        attempts,
    });
}

impl Job {
    fn attempt<T: Send + 'static>(
        &self,
        op: Arc<dyn Fn() -> ProviderResult<T> + Send + Sync>,
    ) -> Attempted<T> {
        let callback = ForwardRetry {
            node: self.node,
            events: &self.events,
        };
        with_retry(&self.retry, &callback, || {
            let op = Arc::clone(&op);
            call_with_timeout(self.timeout, move || op())
        })
    }

    fn create(&self) -> Attempted<String> {
        let provider = Arc::clone(&self.provider);
        let (id, kind, properties) = (self.id.clone(), self.kind.clone(), self.properties.clone());
        self.attempt(Arc::new(move || provider.create(&id, &kind, &properties)))
    }

    fn update(&self) -> (Effect, Option<ProviderError>, u32) {
        let Some(physical) = self.prior_physical.clone() else {
            return (Effect::None, Some(missing_physical(&self.id)), 0);
        };
        let provider = Arc::clone(&self.provider);
        let (kind, properties) = (self.kind.clone(), self.properties.clone());
        let out = self.attempt(Arc::new(move || provider.update(&physical, &kind, &properties)));
        match out.result {
            Ok(()) => (Effect::Updated, None, out.attempts),
            Err(e) => (Effect::None, Some(e), out.attempts),
        }
    }

    /// Delete the prior physical object; an already-missing object is fine
    fn delete(&self) -> Attempted<()> {
        let Some(physical) = self.prior_physical.clone() else {
            return Attempted {
                result: Ok(()),
                attempts: 0,
            };
        };
        let provider = Arc::clone(&self.prior_provider);
        let kind = self.prior_kind.clone();
        let mut out = self.attempt(Arc::new(move || provider.delete(&physical, &kind)));
        if let Err(ProviderError::NotFound(what)) = &out.result {
            log::debug!("{} already gone ({})", self.id, what);
            out.result = Ok(());
        }
        out
    }

    fn replace(&self) -> (Effect, Option<ProviderError>, u32) {
        match self.strategy {
            ReplaceStrategy::DeleteBeforeCreate => {
                let deleted = self.delete();
                if let Err(e) = deleted.result {
                    return (Effect::None, Some(e), deleted.attempts);
                }
                let created = self.create();
                let attempts = deleted.attempts + created.attempts;
                match created.result {
                    Ok(physical) => (Effect::Created(physical), None, attempts),
                    Err(e) => (Effect::Deleted, Some(e), attempts),
                }
            }
            ReplaceStrategy::CreateBeforeDelete => {
                let created = self.create();
                let physical = match created.result {
                    Ok(physical) => physical,
                    Err(e) => return (Effect::None, Some(e), created.attempts),
                };
                let deleted = self.delete();
                let attempts = created.attempts + deleted.attempts;
                if let Err(e) = deleted.result {
                    let Some(old) = self.prior_physical.clone() else {
                        return (Effect::Created(physical), Some(e), attempts);
                    };
                    log::warn!(
                        "{}: replacement {} created but old object {} could not be deleted; it will be retried on the next run",
                        self.id,
                        physical,
                        old
                    );
                    return (
                        Effect::Superseded {
                            created: physical,
                            old,
                        },
                        Some(e),
                        attempts,
                    );
                }
                (Effect::Created(physical), None, attempts)
            }
        }
    }
}

fn missing_physical(id: &str) -> ProviderError {
    ProviderError::Permanent(format!("{id} has no physical id in the snapshot"))
}

/// Run `op` on a helper thread, giving up after `timeout`
///
/// A timed-out operation is abandoned, not killed; providers are required
/// to be idempotent so a retry racing the abandoned attempt is harmless.
fn call_with_timeout<T, F>(timeout: Duration, op: F) -> ProviderResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ProviderResult<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("provision-op".into())
        .spawn(move || {
            let _ = tx.send(op());
        })
        .map_err(|e| ProviderError::Transient(format!("failed to start operation: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ProviderError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(ProviderError::Permanent("provider operation panicked".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::diff;
    use crate::model::{Model, props};
    use crate::schema::Schemas;
    use crate::state::StateStore;
    use crate::value::Value;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every call; fails creates for ids in `fail`
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
        fail: Vec<String>,
        counter: AtomicUsize,
    }

    impl Provider for Recording {
        fn create(&self, id: &str, _: &str, _: &Properties) -> ProviderResult<String> {
            self.calls.lock().unwrap().push(format!("create {id}"));
            if self.fail.iter().any(|f| f == id) {
                return Err(ProviderError::Permanent(format!("{id} rejected")));
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}-{n}", id.to_lowercase()))
        }
        fn update(&self, physical: &str, _: &str, _: &Properties) -> ProviderResult<()> {
            self.calls.lock().unwrap().push(format!("update {physical}"));
            Ok(())
        }
        fn delete(&self, physical: &str, _: &str) -> ProviderResult<()> {
            self.calls.lock().unwrap().push(format!("delete {physical}"));
            Ok(())
        }
    }

    fn options() -> ExecuteOptions {
        ExecuteOptions {
            jobs: 2,
            retry: crate::retry::RetryConfig::no_retry(),
            timeout: Duration::from_secs(5),
            ..ExecuteOptions::default()
        }
    }

    fn chain() -> Model {
        let mut model = Model::new();
        model
            .declare("network", "Vpc", props([("cidr", Value::from("10.0.0.0/16"))]))
            .unwrap();
        model
            .declare("subnet", "Subnet", props([("network", Value::reference("Vpc"))]))
            .unwrap();
        model
    }

    #[test]
    fn test_dependencies_created_first_and_references_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let lock = store.lock().unwrap();
        let mut snapshot = lock.load().unwrap();

        let provider = Arc::new(Recording::default());
        let registry = ProviderRegistry::single(provider.clone());
        let changes = diff::plan(&chain(), &snapshot, &Schemas::new()).unwrap();

        let report = Executor::new(&registry, options())
            .execute(&changes, &lock, &mut snapshot, &mut NoProgress)
            .unwrap();

        assert!(report.is_success());
        assert_eq!(
            *provider.calls.lock().unwrap(),
            vec!["create Vpc", "create Subnet"]
        );
        assert_eq!(snapshot.physical_id("Vpc"), Some("vpc-0"));
        assert_eq!(store.load().unwrap(), snapshot);
    }

    #[test]
    fn test_failure_blocks_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let lock = store.lock().unwrap();
        let mut snapshot = Snapshot::new();

        let provider = Arc::new(Recording {
            fail: vec!["Vpc".into()],
            ..Recording::default()
        });
        let registry = ProviderRegistry::single(provider.clone());
        let changes = diff::plan(&chain(), &snapshot, &Schemas::new()).unwrap();

        let report = Executor::new(&registry, options())
            .execute(&changes, &lock, &mut snapshot, &mut NoProgress)
            .unwrap();

        assert!(report.outcome("Vpc").unwrap().is_failed());
        assert_eq!(
            report.outcome("Subnet"),
            Some(&Outcome::Blocked {
                reason: BlockReason::UpstreamFailed("Vpc".into())
            })
        );
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_missing_provider_fails_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let lock = store.lock().unwrap();
        let mut snapshot = Snapshot::new();
        let changes = diff::plan(&chain(), &snapshot, &Schemas::new()).unwrap();

        let err = Executor::new(&ProviderRegistry::new(), options())
            .execute(&changes, &lock, &mut snapshot, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownKind { .. }));
    }

    #[test]
    fn test_timeout_is_reported_as_timeout() {
        let result: ProviderResult<()> = call_with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[test]
    fn test_execution_graph_orders_delete_after_dependent_update() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "Old",
            SnapshotEntry {
                kind: "network".into(),
                properties: Properties::new(),
                physical_id: "old-1".into(),
                dependencies: vec![],
            },
        );
        snapshot.insert(
            "Subnet",
            SnapshotEntry {
                kind: "subnet".into(),
                properties: props([("network", Value::reference("Old"))]),
                physical_id: "subnet-1".into(),
                dependencies: vec!["Old".into()],
            },
        );
        let mut model = Model::new();
        model.declare("network", "Vpc", Properties::new()).unwrap();
        model
            .declare("subnet", "Subnet", props([("network", Value::reference("Vpc"))]))
            .unwrap();

        let changes = diff::plan(&model, &snapshot, &Schemas::new()).unwrap();
        let graph = execution_graph(&changes).unwrap();
        assert_eq!(graph.dependencies("Old"), vec!["Subnet"]);
        assert_eq!(graph.dependencies("Subnet"), vec!["Vpc"]);
    }
}
