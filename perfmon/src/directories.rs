//! Working-directory bootstrap.
//!
//! Ensures the data, log and heap-dump directories exist relative to the
//! working directory. Existing directories are left alone, so bootstrapping is
//! idempotent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum BootstrapError {
    /// A directory could not be created (permissions, path occupied by a file)
    #[error("Failed to create directory '{path}': {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Create a single directory and its missing parents.
///
/// Returns `true` if the directory was created, `false` if it already existed.
pub fn ensure_dir(path: &Path) -> BootstrapResult<bool> {
    if path.is_dir() {
        debug!("Directory already present: {}", path.display());
        return Ok(false);
    }

    fs::create_dir_all(path).map_err(|source| BootstrapError::CreateFailed {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(true)
}

/// Create every directory in `dirs` that does not exist yet, printing one line
/// per directory created. Returns the directories that were created.
pub fn bootstrap<P: AsRef<Path>>(dirs: &[P]) -> BootstrapResult<Vec<PathBuf>> {
    let mut created = Vec::new();

    for dir in dirs {
        let dir = dir.as_ref();
        if ensure_dir(dir)? {
            println!("📁 Created directory: {}", dir.display());
            created.push(dir.to_path_buf());
        }
    }

    Ok(created)
}
