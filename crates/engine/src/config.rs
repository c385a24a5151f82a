use std::path::Path;

use serde::Deserialize;

use conduit_core::chord::DEFAULT_CHORD_TIMEOUT_MS;

use crate::error::EngineError;

pub const DEFAULT_UNDO_HISTORY_LIMIT: usize = 100;

/// Tunables for a bulk-edit session, usually loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of worker threads a commit spreads its conditional writes over.
    pub commit_parallelism: usize,
    /// Committed operations whose undo records are retained, oldest evicted first.
    pub undo_history_limit: usize,
    /// When set, `undo` is refused and callers must use `undo_with_token`.
    pub require_undo_token: bool,
    pub chord_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_parallelism: 1,
            undo_history_limit: DEFAULT_UNDO_HISTORY_LIMIT,
            require_undo_token: false,
            chord_timeout_ms: DEFAULT_CHORD_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.commit_parallelism == 0 {
            return Err(EngineError::Config("commit_parallelism must be at least 1".into()));
        }
        if self.undo_history_limit == 0 {
            return Err(EngineError::Config("undo_history_limit must be at least 1".into()));
        }
        Ok(())
    }
}
