//! Host-provided table of external commands

use crate::errors::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Commands the host allows to be started, addressed by 1-based index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTable {
    #[serde(default)]
    commands: Vec<Option<PathBuf>>,
}

impl CommandTable {
    pub fn new<I, P>(commands: I) -> Self
    where
        I: IntoIterator<Item = Option<P>>,
        P: Into<PathBuf>,
    {
        Self {
            commands: commands.into_iter().map(|c| c.map(Into::into)).collect(),
        }
    }

    /// Parse a JSON table such as `{"commands": ["/bin/cat", null]}`
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| BridgeError::InvalidConfig(format!("command table: {}", e)))
    }

    /// Load a JSON table from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            BridgeError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Resolve a 1-based index to a usable executable path
    pub fn resolve(&self, index: i64) -> Result<&Path> {
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.commands.get(i))
            .and_then(|entry| entry.as_deref());

        match slot {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(BridgeError::BadCommandIndex(index)),
        }
    }

    /// Iterate `(index, entry)` pairs with 1-based indices
    pub fn entries(&self) -> impl Iterator<Item = (usize, Option<&Path>)> {
        self.commands
            .iter()
            .enumerate()
            .map(|(i, entry)| (i + 1, entry.as_deref()))
    }
}
