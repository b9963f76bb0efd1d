//! Engine configuration.
//!
//! ```toml
//! unresolved_targets = "warn"   # or "fail"
//! singleton_locking = true
//! ```

use crate::error::{ClabjectError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What `unfold` does with association targets or extension parents the
/// registry cannot resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedTargetPolicy {
    /// Drop the target and report it.
    #[default]
    Warn,
    /// Fail the unfold with `TypeNotFound`.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub unresolved_targets: UnresolvedTargetPolicy,
    /// Hold the registry's per-key lease around singleton instantiation
    /// and refresh.
    pub singleton_locking: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unresolved_targets: UnresolvedTargetPolicy::Warn,
            singleton_locking: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ClabjectError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ClabjectError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
