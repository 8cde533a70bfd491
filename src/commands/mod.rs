pub mod apply;
pub mod drift;
pub mod graph;
pub mod output;
pub mod plan;
pub mod state;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};
use provision::{Document, Model, ProviderRegistry, StateStore, document};
use std::path::PathBuf;
use std::sync::Arc;

use crate::Context;
use crate::config::KeelConfig;
use crate::paths;
use crate::sandbox::SandboxProvider;

/// A document plus the state and sandbox directories that belong to it
pub struct Stack {
    pub name: String,
    pub document_path: PathBuf,
    pub overlays: Vec<PathBuf>,
    pub config: KeelConfig,
    pub store: StateStore,
    pub sandbox_dir: PathBuf,
}

impl Stack {
    /// Resolve directories for the stack named by `ctx.file`
    ///
    /// Does not read the document, so state commands work without one.
    pub fn locate(ctx: &Context) -> Result<Self> {
        let config = KeelConfig::load()?;
        Self::with_config(ctx, config)
    }

    pub fn with_config(ctx: &Context, config: KeelConfig) -> Result<Self> {
        let name = paths::stack_name(&ctx.file);
        let state_dir = match &ctx.state_dir {
            Some(dir) => dir.clone(),
            None => config.state_root()?.join(&name),
        };
        let sandbox_dir = config.sandbox_dir(&state_dir);
        log::debug!(
            "Stack {name}: state {}, sandbox {}",
            state_dir.display(),
            sandbox_dir.display()
        );
        Ok(Self {
            name,
            document_path: ctx.file.clone(),
            overlays: ctx.overlays.clone(),
            config,
            store: StateStore::new(state_dir),
            sandbox_dir,
        })
    }

    /// Load the document with overlays applied
    pub fn document(&self) -> Result<Document> {
        document::load_with_overlays(&self.document_path, &self.overlays)
            .with_context(|| format!("Could not load {}", self.document_path.display()))
    }

    /// Load the document and build the validated model
    pub fn model(&self) -> Result<(Document, Model)> {
        let doc = self.document()?;
        let model = doc
            .to_model()
            .with_context(|| format!("Invalid stack {}", self.document_path.display()))?;
        Ok((doc, model))
    }

    pub fn sandbox(&self) -> Arc<SandboxProvider> {
        Arc::new(SandboxProvider::new(&self.sandbox_dir))
    }

    /// Every kind is served by the sandbox provider
    pub fn providers(&self) -> ProviderRegistry {
        ProviderRegistry::single(self.sandbox())
    }
}
