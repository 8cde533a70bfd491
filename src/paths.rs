//! Centralized path resolution for keel
//!
//! # Environment Variables
//!
//! - `KEEL_CONFIG_DIR` - Override config directory (e.g., `~/dotfiles/keel`)
//! - `KEEL_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `KEEL_CONFIG_DIR` environment variable
//! 2. Existing `~/.config/keel/`
//! 3. `XDG_CONFIG_HOME/keel` (if set)
//! 4. Platform default:
//!    - Windows: `%APPDATA%\keel`
//!    - macOS/Linux: `~/.config/keel`
//!
//! For state_dir():
//! 1. `KEEL_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/keel` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\keel`
//!    - macOS/Linux: `~/.local/state/keel`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "KEEL_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "KEEL_STATE_DIR";

/// Get the keel config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Some(home) = dirs::home_dir() {
        let existing = home.join(".config").join("keel");
        if existing.exists() {
            log::debug!("Using existing config dir: {}", existing.display());
            return Ok(existing);
        }
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("keel");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join("keel");
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("keel");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the keel state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("keel");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("keel");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("keel");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Stack name derived from the document path (`network.toml` -> `network`)
pub fn stack_name(document: &Path) -> String {
    document
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("default")
        .to_string()
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as-is.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
