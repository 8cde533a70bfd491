//! Resource model - the typed desired state
//!
//! A [`Model`] is an insertion-ordered set of [`Resource`] declarations keyed
//! by logical identifier. References between resources are either implicit
//! (a [`Value::Ref`] anywhere in the properties) or explicit (`depends_on`).
//! Targets are validated in a second pass so declarations may appear in any
//! order.

use crate::error::{Error, Result};
use crate::value::{Properties, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A declared infrastructure object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// User-assigned stable name, unique within the model
    pub id: String,
    /// Resource kind (e.g. "network", "subnet", "security_group", "function")
    pub kind: String,
    /// Declared properties; values may reference other resources
    pub properties: Properties,
    /// Explicit dependencies in addition to property references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Provider-assigned identifier, present only after creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_id: Option<String>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, properties: Properties) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            properties,
            depends_on: Vec::new(),
            physical_id: None,
        }
    }

    /// Every logical id this resource requires, in first-appearance order
    ///
    /// Property references come first (in key order), then explicit
    /// dependencies. Duplicates are removed.
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::new();
        for value in self.properties.values() {
            value.for_each_ref(&mut |target| {
                if !refs.contains(&target) {
                    refs.push(target);
                }
            });
        }
        for target in &self.depends_on {
            if !refs.contains(&target.as_str()) {
                refs.push(target);
            }
        }
        refs
    }

    /// Short description for plans and logs
    pub fn description(&self) -> String {
        format!("{} {}", self.kind, self.id)
    }
}

/// The desired-state model
#[derive(Debug, Clone, Default)]
pub struct Model {
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource
    ///
    /// Fails with [`Error::DuplicateId`] if `id` is already declared.
    pub fn declare(
        &mut self,
        kind: impl Into<String>,
        id: impl Into<String>,
        properties: Properties,
    ) -> Result<&Resource> {
        self.insert(Resource::new(kind, id, properties))
    }

    /// Add a fully built resource
    pub fn insert(&mut self, resource: Resource) -> Result<&Resource> {
        if self.index.contains_key(&resource.id) {
            return Err(Error::DuplicateId { id: resource.id });
        }
        let pos = self.resources.len();
        self.index.insert(resource.id.clone(), pos);
        self.resources.push(resource);
        Ok(&self.resources[pos])
    }

    /// Record an explicit dependency edge `resource -> target`
    ///
    /// The target may be declared later; it is checked by
    /// [`Model::check_references`].
    pub fn reference(&mut self, resource: &str, target: &str) -> Result<()> {
        let pos = *self.index.get(resource).ok_or_else(|| Error::UnknownResource {
            from: None,
            target: resource.to_string(),
        })?;
        let deps = &mut self.resources[pos].depends_on;
        if !deps.iter().any(|d| d == target) {
            deps.push(target.to_string());
        }
        Ok(())
    }

    /// Second pass: every referenced target must be declared
    pub fn check_references(&self) -> Result<()> {
        for resource in &self.resources {
            for target in resource.references() {
                if !self.contains(target) {
                    return Err(Error::UnknownResource {
                        from: Some(resource.id.clone()),
                        target: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// All resources in declaration order
    pub fn all_resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.index.get(id).map(|&pos| &self.resources[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Logical ids `id` requires, or `None` if it is not declared
    pub fn references_of(&self, id: &str) -> Option<Vec<&str>> {
        self.get(id).map(Resource::references)
    }

    /// Declaration index of a resource
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Attach a provider-assigned identifier
    pub fn set_physical_id(&mut self, id: &str, physical_id: impl Into<String>) -> Result<()> {
        let pos = *self.index.get(id).ok_or_else(|| Error::UnknownResource {
            from: None,
            target: id.to_string(),
        })?;
        self.resources[pos].physical_id = Some(physical_id.into());
        Ok(())
    }
}

/// Convenience for building property maps in code and tests
pub fn props<I, K>(entries: I) -> Properties
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
