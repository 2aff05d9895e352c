//! Persistence of the selected mode

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{tc::ModeParseError, Mode};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Somewhere the selected mode survives a restart.
pub trait ModeStore: Send + Sync {
    /// The persisted mode, `None` if nothing has been persisted yet.
    fn load(&self) -> Result<Option<Mode>, ModeStoreError>;

    fn save(&self, mode: Mode) -> Result<(), ModeStoreError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A one line text file holding the mode name, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct RecoveryFile {
    path: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ModeStoreError {
    #[error("Could not read the recovery file {0:?}: {1}")]
    ReadError(PathBuf, std::io::Error),

    #[error("Could not write the recovery file {0:?}: {1}")]
    WriteError(PathBuf, std::io::Error),

    #[error("The recovery file {0:?} does not hold a mode: {1}")]
    InvalidContent(PathBuf, ModeParseError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RecoveryFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModeStore for RecoveryFile {
    fn load(&self) -> Result<Option<Mode>, ModeStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| ModeStoreError::ReadError(self.path.clone(), e))?;

        Mode::from_token(&text)
            .map(Some)
            .map_err(|e| ModeStoreError::InvalidContent(self.path.clone(), e))
    }

    fn save(&self, mode: Mode) -> Result<(), ModeStoreError> {
        util::fs::atomic_write(&self.path, format!("{}\n", mode).as_bytes())
            .map_err(|e| ModeStoreError::WriteError(self.path.clone(), e))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
