//! Diff engine - desired model vs last snapshot
//!
//! Resources are compared in topological order so that every decision about
//! a dependency is known before its dependents are examined. A reference to
//! a resource that is being created or replaced resolves to a provisional
//! identifier that never equals an existing physical id, which is how a
//! Replace propagates: the referencing field changes, so the dependent is at
//! least updated, and replaced when that field is immutable.

use crate::error::Result;
use crate::graph::Dag;
use crate::model::{Model, Resource};
use crate::schema::{ReplaceStrategy, Schemas};
use crate::state::{Snapshot, SnapshotEntry};
use crate::value::{Properties, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// What happens to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
    Noop,
}

impl Action {
    /// Symbol used when rendering plans
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
            Self::Noop => " ",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Noop)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Noop => "no-op",
        };
        f.write_str(name)
    }
}

/// Why a change was planned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// Declared but never applied
    FirstProvision,
    /// Declared properties differ from the snapshot
    Changed,
    /// A dependency is being replaced
    UpstreamReplaced,
    /// The kind of the resource changed
    KindChanged,
    /// In the snapshot but no longer declared
    Orphaned,
    /// An old object a replacement could not delete
    Deposed,
    /// Nothing to do
    InSync,
}

/// One differing property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
    /// The field is immutable for this kind
    pub forces_replace: bool,
    /// The new value depends on an identifier only known after apply
    pub provisional: bool,
}

/// A planned change for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub kind: String,
    pub action: Action,
    pub cause: Cause,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDiff>,
    /// Strategy for Replace changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<ReplaceStrategy>,
    /// Desired declaration (absent for deletes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Resource>,
    /// Last-known state (absent for creates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<SnapshotEntry>,
    /// Owning logical id when this deletes a deposed object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposed_of: Option<String>,
}

impl Change {
    /// Logical ids this change waits for, from the side of the diff it acts on
    pub fn requires(&self) -> Vec<String> {
        match (&self.desired, &self.prior) {
            (Some(desired), _) => desired.references().into_iter().map(String::from).collect(),
            (None, Some(prior)) => prior.dependencies.clone(),
            (None, None) => Vec::new(),
        }
    }
}

/// Counts per action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub noops: usize,
}

impl DiffSummary {
    /// Total number of changes (excluding no-ops)
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Ordered list of changes
///
/// Creates, updates, replaces and no-ops come first in topological order of
/// the model, deletes follow in reverse topological order of the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn get(&self, id: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.id == id)
    }

    pub fn action(&self, id: &str) -> Option<Action> {
        self.get(id).map(|c| c.action)
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for change in &self.changes {
            match change.action {
                Action::Create => summary.creates += 1,
                Action::Update => summary.updates += 1,
                Action::Replace => summary.replaces += 1,
                Action::Delete => summary.deletes += 1,
                Action::Noop => summary.noops += 1,
            }
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action.is_change())
    }

    /// Changes that require provider work
    pub fn actionable(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.action.is_change())
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Group changes by resource kind, kinds in first-appearance order
    pub fn group_by_kind(&self) -> Vec<(&str, Vec<&Change>)> {
        let mut groups: Vec<(&str, Vec<&Change>)> = Vec::new();
        for change in &self.changes {
            match groups.iter_mut().find(|(kind, _)| *kind == change.kind) {
                Some((_, group)) => group.push(change),
                None => groups.push((change.kind.as_str(), vec![change])),
            }
        }
        groups
    }
}

/// Build the graph and compute the change set in one step
pub fn plan(model: &Model, snapshot: &Snapshot, schemas: &Schemas) -> Result<ChangeSet> {
    let graph = Dag::from_model(model)?;
    compute(model, &graph, snapshot, schemas)
}

/// Compute the change set for a model against a snapshot
pub fn compute(
    model: &Model,
    graph: &Dag,
    snapshot: &Snapshot,
    schemas: &Schemas,
) -> Result<ChangeSet> {
    let mut changes = Vec::with_capacity(model.len() + snapshot.len());
    // Resources whose physical id will change
    let mut provisional: HashSet<String> = HashSet::new();
    // Resources that must be re-evaluated because something upstream is replaced
    let mut invalidated: HashSet<String> = HashSet::new();
    // Resources with deposed objects; dependents may still point at those
    let stale: HashSet<String> = snapshot
        .deposed
        .keys()
        .filter(|id| model.contains(id))
        .cloned()
        .collect();

    for id in graph.topological_order() {
        let Some(resource) = model.get(id) else {
            continue;
        };
        let change = match snapshot.get(id) {
            None => create_change(resource),
            Some(prior) => {
                let resolver = Resolver {
                    snapshot,
                    provisional: &provisional,
                    stale: &stale,
                };
                compare(resource, prior, &resolver, schemas, &invalidated)
            }
        };

        if matches!(change.action, Action::Create | Action::Replace) {
            provisional.insert(change.id.clone());
        }
        if change.action == Action::Replace || change.cause == Cause::UpstreamReplaced {
            invalidated.insert(change.id.clone());
        }
        log::trace!("{}: {} ({:?})", change.id, change.action, change.cause);
        changes.push(change);
    }

    changes.extend(delete_changes(model, snapshot)?);
    changes.extend(deposed_changes(snapshot));

    let set = ChangeSet { changes };
    let summary = set.summary();
    log::debug!(
        "Diff: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
        summary.creates,
        summary.updates,
        summary.replaces,
        summary.deletes,
        summary.noops
    );
    Ok(set)
}

fn create_change(resource: &Resource) -> Change {
    Change {
        id: resource.id.clone(),
        kind: resource.kind.clone(),
        action: Action::Create,
        cause: Cause::FirstProvision,
        fields: resource
            .properties
            .iter()
            .map(|(field, value)| FieldDiff {
                field: field.clone(),
                old: None,
                new: Some(value.clone()),
                forces_replace: false,
                provisional: false,
            })
            .collect(),
        replace: None,
        desired: Some(resource.clone()),
        prior: None,
        deposed_of: None,
    }
}

fn compare(
    resource: &Resource,
    prior: &SnapshotEntry,
    resolver: &Resolver<'_>,
    schemas: &Schemas,
    invalidated: &HashSet<String>,
) -> Change {
    let schema = schemas.get(&resource.kind);
    let mut change = Change {
        id: resource.id.clone(),
        kind: resource.kind.clone(),
        action: Action::Noop,
        cause: Cause::InSync,
        fields: Vec::new(),
        replace: None,
        desired: Some(resource.clone()),
        prior: Some(prior.clone()),
        deposed_of: None,
    };

    if prior.kind != resource.kind {
        change.action = Action::Replace;
        change.cause = Cause::KindChanged;
        change.replace = Some(schema.replace);
        return change;
    }

    let keys: BTreeSet<&String> = resource
        .properties
        .keys()
        .chain(prior.properties.keys())
        .collect();

    let mut declared_change = false;
    for key in keys {
        let new = resource.properties.get(key);
        let old = prior.properties.get(key);
        let equal = match (new, old) {
            (Some(new), Some(old)) => resolver.equivalent(new, old),
            (None, None) => true,
            _ => false,
        };
        if equal {
            continue;
        }
        if new != old {
            declared_change = true;
        }
        change.fields.push(FieldDiff {
            field: key.clone(),
            old: old.cloned(),
            new: new.cloned(),
            forces_replace: schema.is_immutable(key),
            provisional: new.is_some_and(|v| resolver.is_provisional(v)),
        });
    }

    let upstream_replaced = resource
        .references()
        .iter()
        .any(|dep| invalidated.contains(*dep));

    if change.fields.is_empty() && !upstream_replaced {
        return change;
    }

    change.cause = if declared_change {
        Cause::Changed
    } else {
        Cause::UpstreamReplaced
    };
    if change.fields.iter().any(|f| f.forces_replace) {
        change.action = Action::Replace;
        change.replace = Some(schema.replace);
    } else {
        change.action = Action::Update;
    }
    change
}

/// Deletes for snapshot entries no longer declared, dependents first
fn delete_changes(model: &Model, snapshot: &Snapshot) -> Result<Vec<Change>> {
    let graph = snapshot_graph(snapshot)?;
    let mut order = graph.topological_order();
    order.reverse();

    Ok(order
        .into_iter()
        .filter(|id| !model.contains(id))
        .filter_map(|id| snapshot.get(id).map(|entry| (id, entry)))
        .map(|(id, entry)| Change {
            id: id.to_string(),
            kind: entry.kind.clone(),
            action: Action::Delete,
            cause: Cause::Orphaned,
            fields: Vec::new(),
            replace: None,
            desired: None,
            prior: Some(entry.clone()),
            deposed_of: None,
        })
        .collect())
}

/// Deletes for old objects that earlier replacements left behind
fn deposed_changes(snapshot: &Snapshot) -> Vec<Change> {
    snapshot
        .deposed
        .iter()
        .flat_map(|(owner, objects)| {
            objects.iter().map(move |object| Change {
                id: deposed_key(owner, &object.physical_id),
                kind: object.kind.clone(),
                action: Action::Delete,
                cause: Cause::Deposed,
                fields: Vec::new(),
                replace: None,
                desired: None,
                prior: Some(SnapshotEntry {
                    kind: object.kind.clone(),
                    properties: Properties::new(),
                    physical_id: object.physical_id.clone(),
                    dependencies: Vec::new(),
                }),
                deposed_of: Some(owner.clone()),
            })
        })
        .collect()
}

/// Change id of a deposed object's delete
pub fn deposed_key(owner: &str, physical_id: &str) -> String {
    format!("{owner} (deposed {physical_id})")
}

/// Dependency graph of the snapshot as it was applied
///
/// Dependencies pointing outside the snapshot are ignored.
pub fn snapshot_graph(snapshot: &Snapshot) -> Result<Dag> {
    let nodes = snapshot.ids().map(String::from);
    let edges: Vec<(String, String)> = snapshot
        .resources
        .iter()
        .flat_map(|(id, entry)| {
            entry
                .dependencies
                .iter()
                .filter(|dep| snapshot.contains(dep))
                .map(move |dep| (id.clone(), dep.clone()))
        })
        .collect();
    Dag::new(nodes, edges)
}

/// Compares desired values with applied values after resolving references
struct Resolver<'a> {
    snapshot: &'a Snapshot,
    provisional: &'a HashSet<String>,
    /// Targets whose applied references may name a deposed object
    stale: &'a HashSet<String>,
}

impl Resolver<'_> {
    /// Physical id a reference resolves to, `None` if provisional or unknown
    fn physical(&self, target: &str) -> Option<&str> {
        if self.provisional.contains(target) {
            None
        } else {
            self.snapshot.physical_id(target)
        }
    }

    fn is_provisional(&self, value: &Value) -> bool {
        let mut found = false;
        value.for_each_ref(&mut |target| {
            if self.provisional.contains(target) {
                found = true;
            }
        });
        found
    }

    /// `new` (desired) and `old` (applied) resolve to the same thing
    fn equivalent(&self, new: &Value, old: &Value) -> bool {
        match (new, old) {
            (Value::Ref(n), _)
                if self.provisional.contains(&n.target) || self.stale.contains(&n.target) =>
            {
                false
            }
            (Value::Ref(n), Value::Ref(o)) => {
                n.target == o.target
                    || matches!(
                        (self.physical(&n.target), self.snapshot.physical_id(&o.target)),
                        (Some(a), Some(b)) if a == b
                    )
            }
            (Value::Ref(n), Value::String(s)) => self.physical(&n.target) == Some(s.as_str()),
            (Value::String(s), Value::Ref(o)) => {
                self.snapshot.physical_id(&o.target) == Some(s.as_str())
            }
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.equivalent(x, y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .all(|(k, x)| b.get(k).is_some_and(|y| self.equivalent(x, y)))
            }
            (a, b) => a == b,
        }
    }
}

/// Map of logical id to action, handy for assertions and rendering
pub fn actions(set: &ChangeSet) -> HashMap<&str, Action> {
    set.changes
        .iter()
        .map(|c| (c.id.as_str(), c.action))
        .collect()
}
