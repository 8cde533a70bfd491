//! Provider interface and registry
//!
//! A provider performs the actual create/update/delete calls for one or
//! more resource kinds. The engine never sees request or response formats;
//! it passes resolved properties (references replaced by physical ids) and
//! receives physical ids back.
//!
//! Every operation must be idempotent: the executor may retry it after a
//! transient failure or a timeout, possibly while an earlier attempt is
//! still finishing.

use crate::error::{Error, ProviderError};
use crate::model::Model;
use crate::value::Properties;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result type for provider operations
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Operations for a resource kind
pub trait Provider: Send + Sync {
    /// Create the object and return its physical identifier
    fn create(&self, logical_id: &str, kind: &str, properties: &Properties)
    -> ProviderResult<String>;

    /// Update the object in place
    fn update(&self, physical_id: &str, kind: &str, properties: &Properties) -> ProviderResult<()>;

    /// Delete the object
    ///
    /// Returning [`ProviderError::NotFound`] is treated as success.
    fn delete(&self, physical_id: &str, kind: &str) -> ProviderResult<()>;

    /// Read live properties for drift detection
    ///
    /// `Ok(None)` means the object no longer exists.
    fn read(&self, physical_id: &str, kind: &str) -> ProviderResult<Option<Properties>> {
        let _ = physical_id;
        Err(ProviderError::Unsupported(format!("read for kind {kind}")))
    }
}

/// Maps resource kinds to providers
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    fallback: Option<Arc<dyn Provider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.providers.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for one kind
    pub fn register(&mut self, kind: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(kind.into(), provider);
    }

    /// Register a provider that serves every kind without a specific entry
    pub fn set_fallback(&mut self, provider: Arc<dyn Provider>) {
        self.fallback = Some(provider);
    }

    /// Registry where one provider serves every kind
    pub fn single(provider: Arc<dyn Provider>) -> Self {
        Self {
            providers: BTreeMap::new(),
            fallback: Some(provider),
        }
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .get(kind)
            .or(self.fallback.as_ref())
            .map(Arc::clone)
    }

    /// Fail before execution if any kind in the model has no provider
    pub fn check_model(&self, model: &Model) -> Result<(), Error> {
        for resource in model.all_resources() {
            if self.get(&resource.kind).is_none() {
                return Err(Error::UnknownKind {
                    kind: resource.kind.clone(),
                    id: resource.id.clone(),
                });
            }
        }
        Ok(())
    }
}
