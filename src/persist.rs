//! Artifact persistence
//!
//! The synthesizer hands finished text to an [`ArtifactStore`]; it never
//! touches the file system directly. Paths are relative, `/`-separated.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::error::CrudifyError;

/// Destination for generated artifacts
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, path: &str) -> Result<bool, CrudifyError>;

    /// Write `content` to `path`
    ///
    /// With `overwrite == false` the existence check and the write are one
    /// atomic step; an occupied path fails with `ArtifactExists` and is left
    /// untouched.
    fn write_artifact(&self, path: &str, content: &str, overwrite: bool) -> Result<(), CrudifyError>;
}

/// Artifacts written below a root directory
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, CrudifyError> {
        let relative = Path::new(path);
        let clean = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !clean {
            return Err(CrudifyError::validation(
                path,
                "artifact path must be relative and stay inside the output directory",
            ));
        }
        Ok(self.root.join(relative))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Drop the entry for `path` once no other writer holds it
    fn release(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }

    fn write_locked(&self, full: &Path, path: &str, content: &str, overwrite: bool) -> Result<(), CrudifyError> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let mut file = options.open(full).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => CrudifyError::ArtifactExists {
                path: path.to_string(),
            },
            _ => CrudifyError::Output(e),
        })?;
        file.write_all(content.as_bytes())?;

        debug!(path = ?full, bytes = content.len(), "Wrote artifact");
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, path: &str) -> Result<bool, CrudifyError> {
        Ok(self.full_path(path)?.exists())
    }

    fn write_artifact(&self, path: &str, content: &str, overwrite: bool) -> Result<(), CrudifyError> {
        let full = self.full_path(path)?;
        let lock = self.lock_for(&full);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.write_locked(&full, path, content, overwrite)
        };
        self.release(&full, lock);
        outcome
    }
}

/// Artifacts kept in memory, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<BTreeMap<String, String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Stored paths in sorted order
    pub fn paths(&self) -> Vec<String> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn exists(&self, path: &str) -> Result<bool, CrudifyError> {
        Ok(self
            .artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path))
    }

    fn write_artifact(&self, path: &str, content: &str, overwrite: bool) -> Result<(), CrudifyError> {
        let mut artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        if !overwrite && artifacts.contains_key(path) {
            return Err(CrudifyError::ArtifactExists {
                path: path.to_string(),
            });
        }
        artifacts.insert(path.to_string(), content.to_string());
        trace!(path = %path, bytes = content.len(), "Stored artifact in memory");
        Ok(())
    }
}
