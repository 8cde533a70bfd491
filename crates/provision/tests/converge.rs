use provision::model::props;
use provision::{
    Action, BlockReason, CancelToken, Deposed, Error, ExecuteOptions, Executor, FailurePolicy, KindSchema,
    Model, NoProgress, Outcome, Properties, Provider, ProviderError, ProviderRegistry,
    ProviderResult, ReplaceStrategy, RetryConfig, RunReport, Schemas, StateStore, Value, diff,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

// --- Scripted provider ---

/// In-memory provider with scripted failures
#[derive(Default)]
struct Cloud {
    objects: Mutex<HashMap<String, Properties>>,
    calls: Mutex<Vec<String>>,
    counter: AtomicUsize,
    /// Logical ids whose create always fails permanently
    reject: Vec<String>,
    /// Logical id -> number of transient failures before success
    flaky: Mutex<HashMap<String, u32>>,
    /// Logical id -> number of creates that hang past the deadline
    slow: Mutex<HashMap<String, u32>>,
    /// Physical id -> number of deletes refused before success
    stuck: Mutex<HashMap<String, u32>>,
    /// Cancelled when the named logical id is created
    cancel_on: Option<(String, CancelToken)>,
}

impl Cloud {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn live(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn take(map: &Mutex<HashMap<String, u32>>, id: &str) -> bool {
        let mut map = map.lock().unwrap();
        match map.get_mut(id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Provider for Cloud {
    fn create(&self, id: &str, kind: &str, properties: &Properties) -> ProviderResult<String> {
        if Self::take(&self.slow, id) {
            thread::sleep(Duration::from_millis(300));
            return Err(ProviderError::Transient("late reply discarded".into()));
        }
        if Self::take(&self.flaky, id) {
            return Err(ProviderError::Transient(format!("throttled creating {id}")));
        }
        self.calls.lock().unwrap().push(format!("create {id}"));
        if self.reject.iter().any(|r| r == id) {
            return Err(ProviderError::Permanent(format!("{id}: quota exceeded")));
        }
        let physical = format!("{kind}-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.objects
            .lock()
            .unwrap()
            .insert(physical.clone(), properties.clone());
        if let Some((target, token)) = &self.cancel_on
            && target == id
        {
            token.cancel();
        }
        Ok(physical)
    }

    fn update(&self, physical_id: &str, _: &str, properties: &Properties) -> ProviderResult<()> {
        self.calls.lock().unwrap().push(format!("update {physical_id}"));
        let mut objects = self.objects.lock().unwrap();
        match objects.get_mut(physical_id) {
            Some(props) => {
                *props = properties.clone();
                Ok(())
            }
            None => Err(ProviderError::NotFound(physical_id.to_string())),
        }
    }

    fn delete(&self, physical_id: &str, _: &str) -> ProviderResult<()> {
        self.calls.lock().unwrap().push(format!("delete {physical_id}"));
        if Self::take(&self.stuck, physical_id) {
            return Err(ProviderError::Permanent(format!("{physical_id} is still in use")));
        }
        match self.objects.lock().unwrap().remove(physical_id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(physical_id.to_string())),
        }
    }

    fn read(&self, physical_id: &str, _: &str) -> ProviderResult<Option<Properties>> {
        Ok(self.objects.lock().unwrap().get(physical_id).cloned())
    }
}

// --- Helpers ---

fn options() -> ExecuteOptions {
    ExecuteOptions {
        jobs: 4,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
        },
        timeout: Duration::from_secs(5),
        failure_policy: FailurePolicy::ContinueIndependent,
    }
}

fn schemas() -> Schemas {
    Schemas::new()
        .with("network", KindSchema::new(["cidr"]))
        .with("subnet", KindSchema::new(["cidr", "network"]))
        .with(
            "function",
            KindSchema::new(["runtime"]).with_replace(ReplaceStrategy::CreateBeforeDelete),
        )
}

fn network(cidr: &str) -> Model {
    let mut model = Model::new();
    model
        .declare("network", "Vpc", props([("cidr", Value::from(cidr))]))
        .unwrap();
    model
        .declare(
            "subnet",
            "Private",
            props([
                ("cidr", Value::from("10.0.1.0/24")),
                ("network", Value::reference("Vpc")),
            ]),
        )
        .unwrap();
    model
        .declare(
            "security_group",
            "LambdaSg",
            props([
                ("network", Value::reference("Vpc")),
                ("description", Value::from("Outbound-only SG for Lambda functions")),
            ]),
        )
        .unwrap();
    model
}

fn run(store: &StateStore, cloud: &Arc<Cloud>, model: &Model, options: ExecuteOptions) -> RunReport {
    run_with(store, cloud, model, options, CancelToken::new())
}

fn run_with(
    store: &StateStore,
    cloud: &Arc<Cloud>,
    model: &Model,
    options: ExecuteOptions,
    cancel: CancelToken,
) -> RunReport {
    let registry = ProviderRegistry::single(cloud.clone());
    let lock = store.lock().unwrap();
    let mut snapshot = lock.load().unwrap();
    let changes = diff::plan(model, &snapshot, &schemas()).unwrap();
    Executor::new(&registry, options)
        .with_cancel(cancel)
        .execute(&changes, &lock, &mut snapshot, &mut NoProgress)
        .unwrap()
}

// --- Tests ---

#[test]
fn test_apply_then_plan_is_all_noop() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud::default());
    let model = network("10.0.0.0/16");

    let report = run(&store, &cloud, &model, options());
    assert!(report.is_success());
    assert_eq!(report.summary().succeeded, 3);
    assert_eq!(cloud.live(), 3);

    let snapshot = store.load().unwrap();
    let again = diff::plan(&model, &snapshot, &schemas()).unwrap();
    assert!(!again.has_changes());

    let report = run(&store, &cloud, &model, options());
    assert_eq!(report.summary().noop, 3);
    assert_eq!(cloud.calls().len(), 3);
}

#[test]
fn test_partial_failure_blocks_only_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud {
        reject: vec!["A".into()],
        ..Cloud::default()
    });

    let mut model = Model::new();
    model.declare("network", "A", Properties::new()).unwrap();
    model
        .declare("subnet", "B", props([("network", Value::reference("A"))]))
        .unwrap();
    model.declare("network", "C", Properties::new()).unwrap();

    let report = run(&store, &cloud, &model, options());

    assert!(matches!(
        report.outcome("A"),
        Some(Outcome::Failed {
            error: ProviderError::Permanent(_),
            attempts: 1
        })
    ));
    assert_eq!(
        report.outcome("B"),
        Some(&Outcome::Blocked {
            reason: BlockReason::UpstreamFailed("A".into())
        })
    );
    assert!(matches!(report.outcome("C"), Some(Outcome::Succeeded { .. })));

    // Only C reached the snapshot, and it was persisted
    let snapshot = store.load().unwrap();
    assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec!["C"]);

    let summary = report.summary();
    assert_eq!((summary.succeeded, summary.failed, summary.blocked), (1, 1, 1));
}

#[test]
fn test_halt_policy_stops_independent_work() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud {
        reject: vec!["A".into()],
        ..Cloud::default()
    });

    let mut model = Model::new();
    model.declare("network", "A", Properties::new()).unwrap();
    model.declare("network", "C", Properties::new()).unwrap();

    let opts = ExecuteOptions {
        jobs: 1,
        failure_policy: FailurePolicy::Halt,
        ..options()
    };
    let report = run(&store, &cloud, &model, opts);
    assert!(report.outcome("A").unwrap().is_failed());
    assert_eq!(
        report.outcome("C"),
        Some(&Outcome::Blocked {
            reason: BlockReason::Halted
        })
    );
}

#[test]
fn test_replace_propagates_and_old_objects_are_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud::default());

    run(&store, &cloud, &network("10.0.0.0/16"), options());
    let before = store.load().unwrap();
    let old_vpc = before.physical_id("Vpc").unwrap().to_string();
    let old_subnet = before.physical_id("Private").unwrap().to_string();
    let sg = before.physical_id("LambdaSg").unwrap().to_string();

    let changed = network("10.1.0.0/16");
    let plan = diff::plan(&changed, &before, &schemas()).unwrap();
    assert_eq!(plan.action("Vpc"), Some(Action::Replace));
    assert_eq!(plan.action("Private"), Some(Action::Replace));
    assert_eq!(plan.action("LambdaSg"), Some(Action::Update));

    let report = run(&store, &cloud, &changed, options());
    assert!(report.is_success(), "{report:?}");

    let after = store.load().unwrap();
    let new_vpc = after.physical_id("Vpc").unwrap();
    assert_ne!(new_vpc, old_vpc);
    assert_ne!(after.physical_id("Private").unwrap(), old_subnet);
    assert_eq!(after.physical_id("LambdaSg").unwrap(), sg);

    // The security group now points at the new network
    let live = cloud.read(&sg, "security_group").unwrap().unwrap();
    assert_eq!(live["network"], Value::from(new_vpc));

    let calls = cloud.calls();
    assert!(calls.contains(&format!("delete {old_vpc}")));
    assert!(calls.contains(&format!("delete {old_subnet}")));
    assert_eq!(cloud.live(), 3);
}

#[test]
fn test_create_before_delete_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud::default());

    let function = |runtime: &str| {
        let mut model = Model::new();
        model
            .declare("function", "TestVpcLambda", props([("runtime", Value::from(runtime))]))
            .unwrap();
        model
    };

    run(&store, &cloud, &function("nodejs18.x"), options());
    let old = store.load().unwrap().physical_id("TestVpcLambda").unwrap().to_string();

    run(&store, &cloud, &function("nodejs20.x"), options());
    let calls = cloud.calls();
    let created = calls
        .iter()
        .rposition(|c| c == "create TestVpcLambda")
        .unwrap();
    let deleted = calls.iter().position(|c| *c == format!("delete {old}")).unwrap();
    assert!(created < deleted, "{calls:?}");
}

#[test]
fn test_old_object_kept_when_delete_fails_and_removed_on_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud::default());

    let stack = |runtime: &str| {
        let mut model = Model::new();
        model
            .declare("function", "TestVpcLambda", props([("runtime", Value::from(runtime))]))
            .unwrap();
        model
            .declare(
                "trigger",
                "Nightly",
                props([("function", Value::reference("TestVpcLambda"))]),
            )
            .unwrap();
        model
    };

    assert!(run(&store, &cloud, &stack("nodejs18.x"), options()).is_success());
    let old = store.load().unwrap().physical_id("TestVpcLambda").unwrap().to_string();
    let trigger = store.load().unwrap().physical_id("Nightly").unwrap().to_string();
    cloud.stuck.lock().unwrap().insert(old.clone(), 1);

    // The replacement exists but the old function cannot be deleted yet
    let report = run(&store, &cloud, &stack("nodejs20.x"), options());
    assert!(!report.is_success());
    assert!(matches!(report.outcome("TestVpcLambda"), Some(Outcome::Failed { .. })));
    let snapshot = store.load().unwrap();
    let new = snapshot.physical_id("TestVpcLambda").unwrap().to_string();
    assert_ne!(new, old);
    assert_eq!(
        snapshot.deposed_of("TestVpcLambda"),
        &[Deposed {
            physical_id: old.clone(),
            kind: "function".into(),
        }]
    );
    assert_eq!(cloud.live(), 3);

    // Next run moves the trigger to the new function, then deletes the old one
    let changes = diff::plan(&stack("nodejs20.x"), &snapshot, &schemas()).unwrap();
    assert_eq!(changes.action("TestVpcLambda"), Some(Action::Noop));
    assert_eq!(changes.action("Nightly"), Some(Action::Update));
    assert_eq!(
        changes.action(&diff::deposed_key("TestVpcLambda", &old)),
        Some(Action::Delete)
    );

    let report = run(&store, &cloud, &stack("nodejs20.x"), options());
    assert!(report.is_success(), "{report:?}");
    let calls = cloud.calls();
    let moved = calls.iter().rposition(|c| *c == format!("update {trigger}")).unwrap();
    let deleted = calls.iter().rposition(|c| *c == format!("delete {old}")).unwrap();
    assert!(moved < deleted, "{calls:?}");

    let snapshot = store.load().unwrap();
    assert!(snapshot.deposed.is_empty());
    assert_eq!(cloud.live(), 2);
    let settled = diff::plan(&stack("nodejs20.x"), &snapshot, &schemas()).unwrap();
    assert!(!settled.has_changes());
}

#[test]
fn test_removed_resources_are_deleted_and_missing_objects_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud::default());

    run(&store, &cloud, &network("10.0.0.0/16"), options());
    // Someone deleted the subnet out of band
    let subnet = store.load().unwrap().physical_id("Private").unwrap().to_string();
    cloud.objects.lock().unwrap().remove(&subnet);

    let report = run(&store, &cloud, &Model::new(), options());
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.summary().succeeded, 3);
    assert!(store.load().unwrap().is_empty());
    assert_eq!(cloud.live(), 0);

    // Dependents are removed before the network
    let calls = cloud.calls();
    let vpc_delete = calls.iter().rposition(|c| c.starts_with("delete network")).unwrap();
    let last_delete = calls.iter().rposition(|c| c.starts_with("delete")).unwrap();
    assert_eq!(vpc_delete, last_delete);
}

#[test]
fn test_transient_errors_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud {
        flaky: Mutex::new(HashMap::from([("Vpc".to_string(), 2)])),
        ..Cloud::default()
    });

    let report = run(&store, &cloud, &network("10.0.0.0/16"), options());
    assert_eq!(
        report.outcome("Vpc"),
        Some(&Outcome::Succeeded { attempts: 3 })
    );
    assert!(report.is_success());
}

#[test]
fn test_retries_are_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud {
        flaky: Mutex::new(HashMap::from([("Vpc".to_string(), 10)])),
        ..Cloud::default()
    });

    let report = run(&store, &cloud, &network("10.0.0.0/16"), options());
    assert!(matches!(
        report.outcome("Vpc"),
        Some(Outcome::Failed {
            error: ProviderError::Transient(_),
            attempts: 3
        })
    ));
    assert_eq!(report.summary().blocked, 2);
}

#[test]
fn test_timeout_counts_as_transient() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud {
        slow: Mutex::new(HashMap::from([("Vpc".to_string(), 1)])),
        ..Cloud::default()
    });

    let opts = ExecuteOptions {
        timeout: Duration::from_millis(50),
        ..options()
    };
    let report = run(&store, &cloud, &network("10.0.0.0/16"), opts);
    assert_eq!(
        report.outcome("Vpc"),
        Some(&Outcome::Succeeded { attempts: 2 })
    );
}

#[test]
fn test_cancellation_lets_running_work_finish() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let token = CancelToken::new();
    let cloud = Arc::new(Cloud {
        cancel_on: Some(("Vpc".into(), token.clone())),
        ..Cloud::default()
    });

    let opts = ExecuteOptions {
        jobs: 1,
        ..options()
    };
    let report = run_with(&store, &cloud, &network("10.0.0.0/16"), opts, token);

    assert!(report.cancelled);
    assert!(matches!(report.outcome("Vpc"), Some(Outcome::Succeeded { .. })));
    for id in ["Private", "LambdaSg"] {
        assert_eq!(
            report.outcome(id),
            Some(&Outcome::Blocked {
                reason: BlockReason::Cancelled
            })
        );
    }
    // The completed change was saved
    assert!(store.load().unwrap().contains("Vpc"));
}

#[test]
fn test_second_run_is_rejected_while_locked() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let cloud = Arc::new(Cloud::default());
    run(&store, &cloud, &network("10.0.0.0/16"), options());
    let before = std::fs::read(store.snapshot_path()).unwrap();

    let _held = store.lock().unwrap();
    let other = StateStore::new(dir.path());
    let err = other.lock().unwrap_err();
    assert!(matches!(err, Error::ConcurrentRun { .. }));
    assert_eq!(std::fs::read(store.snapshot_path()).unwrap(), before);
}
