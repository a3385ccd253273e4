//! Durable persistence of the repeater configuration.
//!
//! One JSON blob at a fixed path, written whole and flushed to disk before
//! `save` returns — a crash after `save` cannot lose the write. Single
//! writer within a process run; the blob only exists to carry configuration
//! across restarts.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::Configuration;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt config blob: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// File-backed configuration store.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize and durably persist the configuration.
    pub fn save(&self, config: &Configuration) -> Result<(), StoreError> {
        let blob = serde_json::to_vec_pretty(config)?;
        let mut file = File::create(&self.path)?;
        file.write_all(&blob)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load the persisted configuration, `None` if no blob exists.
    pub fn load(&self) -> Result<Option<Configuration>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let blob = std::fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&blob)?))
    }
}
