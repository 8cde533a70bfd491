//! Per-kind property schemas
//!
//! The engine knows nothing about concrete resource kinds. A [`KindSchema`]
//! tells the diff engine which properties force a replacement and how that
//! replacement is carried out, and lists properties a declaration must set.

use crate::error::{Error, Result};
use crate::model::Resource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a Replace change is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Delete the old object, then create the new one
    #[default]
    DeleteBeforeCreate,
    /// Create the new object first, then delete the old one (zero-downtime cutover)
    CreateBeforeDelete,
}

/// Property rules for one resource kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSchema {
    /// Properties that cannot be changed in place
    #[serde(default)]
    pub immutable: BTreeSet<String>,
    /// Properties every declaration of this kind must set
    #[serde(default)]
    pub required: BTreeSet<String>,
    /// Replacement strategy
    #[serde(default)]
    pub replace: ReplaceStrategy,
}

impl KindSchema {
    pub fn new<I, S>(immutable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            immutable: immutable.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_required<I, S>(mut self, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = required.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_replace(mut self, replace: ReplaceStrategy) -> Self {
        self.replace = replace;
        self
    }

    pub fn is_immutable(&self, field: &str) -> bool {
        self.immutable.contains(field)
    }
}

/// Schemas for every known kind
///
/// Kinds without an entry use [`KindSchema::default`]: every property is
/// mutable and replacements delete first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schemas {
    kinds: BTreeMap<String, KindSchema>,
}

impl Schemas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the schema for a kind
    pub fn insert(&mut self, kind: impl Into<String>, schema: KindSchema) {
        self.kinds.insert(kind.into(), schema);
    }

    pub fn with(mut self, kind: impl Into<String>, schema: KindSchema) -> Self {
        self.insert(kind, schema);
        self
    }

    /// Schema for a kind, falling back to the permissive default
    pub fn get(&self, kind: &str) -> &KindSchema {
        static DEFAULT: std::sync::OnceLock<KindSchema> = std::sync::OnceLock::new();
        self.kinds
            .get(kind)
            .unwrap_or_else(|| DEFAULT.get_or_init(KindSchema::default))
    }

    /// Merge `other` over this set; entries in `other` win
    pub fn merge(&mut self, other: Schemas) {
        self.kinds.extend(other.kinds);
    }

    /// Check a declaration against its kind's required properties
    pub fn validate(&self, resource: &Resource) -> Result<()> {
        let schema = self.get(&resource.kind);
        let missing: Vec<&str> = schema
            .required
            .iter()
            .filter(|field| !resource.properties.contains_key(*field))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Document {
                message: format!(
                    "resource {} ({}) is missing required properties: {}",
                    resource.id,
                    resource.kind,
                    missing.join(", ")
                ),
            })
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}
