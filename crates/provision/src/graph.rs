//! Dependency graph builder
//!
//! Derives a DAG from cross-resource references. An edge `a -> b` means
//! "a requires b first". The same [`Dag`] type orders the snapshot for
//! deletes and the change set inside the executor.

use crate::error::{Error, Result};
use crate::model::Model;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// A directed acyclic graph over logical identifiers
///
/// Nodes keep their insertion index, which breaks ties in the topological
/// order so the result is deterministic.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// `deps[i]` = nodes that node `i` requires
    deps: Vec<Vec<usize>>,
    /// `rdeps[i]` = nodes that require node `i`
    rdeps: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl Dag {
    /// Build and validate a graph
    ///
    /// `edges` holds `(from, to)` pairs meaning `from` requires `to`. Edges
    /// naming unknown nodes fail with [`Error::UnknownResource`]; cycles
    /// fail with [`Error::CyclicDependency`].
    pub fn new<I, E>(nodes: I, edges: E) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
        E: IntoIterator<Item = (String, String)>,
    {
        let mut dag = Self::default();
        for node in nodes {
            if dag.index.contains_key(&node) {
                return Err(Error::DuplicateId { id: node });
            }
            dag.index.insert(node.clone(), dag.nodes.len());
            dag.nodes.push(node);
        }
        dag.deps = vec![Vec::new(); dag.nodes.len()];
        dag.rdeps = vec![Vec::new(); dag.nodes.len()];

        for (from, to) in edges {
            let from_idx = dag.lookup(&from, None)?;
            let to_idx = dag.lookup(&to, Some(from.as_str()))?;
            if !dag.deps[from_idx].contains(&to_idx) {
                dag.deps[from_idx].push(to_idx);
                dag.rdeps[to_idx].push(from_idx);
            }
        }

        dag.detect_cycles()?;
        dag.order = dag.kahn();
        Ok(dag)
    }

    /// Build the reference graph of a model
    pub fn from_model(model: &Model) -> Result<Self> {
        model.check_references()?;
        let nodes = model.all_resources().map(|r| r.id.clone());
        let edges: Vec<(String, String)> = model
            .all_resources()
            .flat_map(|r| {
                r.references()
                    .into_iter()
                    .map(|t| (r.id.clone(), t.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();
        let dag = Self::new(nodes, edges)?;
        log::debug!(
            "Built dependency graph: {} nodes, {} edges",
            dag.len(),
            dag.edge_count()
        );
        Ok(dag)
    }

    fn lookup(&self, id: &str, from: Option<&str>) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownResource {
                from: from.map(str::to_string),
                target: id.to_string(),
            })
    }

    /// Three-colour depth-first search
    fn detect_cycles(&self) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path: Vec<usize> = Vec::new();

        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            // Explicit stack of (node, next dependency index) to avoid recursion depth limits
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::InProgress;
            path.push(start);

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                if let Some(&dep) = self.deps[node].get(next) {
                    top.1 += 1;
                    match marks[dep] {
                        Mark::Unvisited => {
                            marks[dep] = Mark::InProgress;
                            path.push(dep);
                            stack.push((dep, 0));
                        }
                        Mark::InProgress => {
                            let begin = path.iter().position(|&n| n == dep).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[begin..].iter().map(|&n| self.nodes[n].clone()).collect();
                            cycle.push(self.nodes[dep].clone());
                            return Err(Error::CyclicDependency { cycle });
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    path.pop();
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm; among ready nodes the earliest inserted goes first
    fn kahn(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &self.rdeps[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
        order
    }

    /// Logical ids in dependency order (dependencies first)
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.nodes[i].as_str()).collect()
    }

    /// Position of `id` in the topological order
    pub fn position(&self, id: &str) -> Option<usize> {
        let node = *self.index.get(id)?;
        self.order.iter().position(|&n| n == node)
    }

    /// Map of id to topological position, for sorting
    pub fn positions(&self) -> HashMap<&str, usize> {
        self.order
            .iter()
            .enumerate()
            .map(|(pos, &n)| (self.nodes[n].as_str(), pos))
            .collect()
    }

    /// Direct dependencies of `id`
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.deps[i].iter().map(|&d| self.nodes[d].as_str()).collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `id`
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.rdeps[i].iter().map(|&d| self.nodes[d].as_str()).collect())
            .unwrap_or_default()
    }

    /// Every node that requires `id`, directly or transitively, in topological order
    pub fn transitive_dependents(&self, id: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &dependent in &self.rdeps[node] {
                if !seen[dependent] {
                    seen[dependent] = true;
                    stack.push(dependent);
                }
            }
        }
        self.order
            .iter()
            .filter(|&&n| seen[n])
            .map(|&n| self.nodes[n].as_str())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.deps.iter().map(Vec::len).sum()
    }
}
