//! Atomic persistence of the shipping position.
//!
//! `status.json` is a single-writer (agent), multi-reader (cleanup)
//! file; consistency for concurrent readers comes from the write-temp
//! plus rename protocol, not from locks.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::PersistedState;

const STATE_FILE: &str = "status.json";

#[derive(Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed state file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Stores [`PersistedState`] as `<dir>/status.json`, written via a
/// `.tmp` sibling and an atomic rename within the same directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Loads the persisted state. An absent file is a fresh start, not
    /// an error.
    pub fn load(&self) -> Result<PersistedState, StateError> {
        let data = match fs::read(self.path()) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(PersistedState::default());
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Persists the state atomically: write `status.json.tmp` with mode
    /// 0600, then rename over the destination.
    pub fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path();
        let tmp = self.dir.join(format!("{STATE_FILE}.tmp"));
        let data = serde_json::to_vec_pretty(state)?;

        let mut file = open_private(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
