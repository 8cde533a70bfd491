//! User configuration (`<config dir>/config.toml`)
//!
//! ```toml
//! [apply]
//! jobs = 8
//! max_attempts = 5
//! base_delay_ms = 250
//! timeout_secs = 600
//! halt_on_failure = false
//!
//! [paths]
//! state_dir = "~/infra/state"
//! sandbox_dir = "~/infra/sandbox"
//! ```
//!
//! Command-line flags win over the file; the file wins over built-in
//! defaults. `KEEL_STATE_DIR` wins over `[paths] state_dir`.

use anyhow::{Context, Result};
use provision::{ExecuteOptions, FailurePolicy, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::ApplyArgs;
use crate::paths;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeelConfig {
    pub apply: ApplyConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplyConfig {
    pub jobs: Option<usize>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub halt_on_failure: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub state_dir: Option<String>,
    pub sandbox_dir: Option<String>,
}

impl KeelConfig {
    /// Location of the config file
    pub fn path() -> Result<PathBuf> {
        Ok(paths::config_dir()?.join(CONFIG_FILE))
    }

    /// Load the user config; a missing file means defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Execution options: flags, then config, then defaults
    pub fn execute_options(&self, args: &ApplyArgs) -> ExecuteOptions {
        let defaults = ExecuteOptions::default();
        let retry_defaults = RetryConfig::default();

        let max_attempts = args
            .max_attempts
            .or(self.apply.max_attempts)
            .unwrap_or(retry_defaults.max_attempts);
        let base_delay = self
            .apply
            .base_delay_ms
            .map_or(retry_defaults.base_delay, Duration::from_millis);

        let halt = args.halt || self.apply.halt_on_failure.unwrap_or(false);

        ExecuteOptions {
            jobs: args.jobs.or(self.apply.jobs).unwrap_or(defaults.jobs).max(1),
            retry: RetryConfig::new(max_attempts, base_delay, retry_defaults.backoff_factor),
            timeout: args
                .timeout
                .or(self.apply.timeout_secs)
                .map_or(defaults.timeout, Duration::from_secs),
            failure_policy: if halt {
                FailurePolicy::Halt
            } else {
                FailurePolicy::ContinueIndependent
            },
        }
    }

    /// Root directory holding one state directory per stack
    pub fn state_root(&self) -> Result<PathBuf> {
        if std::env::var_os(paths::ENV_STATE_DIR).is_none()
            && let Some(dir) = &self.paths.state_dir
        {
            return Ok(paths::expand(dir));
        }
        paths::state_dir()
    }

    /// Directory for sandbox provider records of a stack
    pub fn sandbox_dir(&self, stack_state: &Path) -> PathBuf {
        self.paths
            .sandbox_dir
            .as_deref()
            .map_or_else(|| stack_state.join("sandbox"), paths::expand)
    }
}
