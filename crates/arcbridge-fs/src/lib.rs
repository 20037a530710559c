//! File system helpers for archive transfers.
//!
//! Archive items carry timestamps and an attribute bitmask that are lost when
//! their content is written through a plain stream. [`FileStamp`] records the
//! values at the moment the target is created and re-applies them after the
//! handle is closed.

mod attributes;
mod error;
mod times;

pub use attributes::Attributes;
pub use error::{Error, Result};
pub use times::FileTimes;

use std::path::{Path, PathBuf};

/// Metadata to stamp onto a path once its writer has been closed.
#[derive(Clone, Debug)]
pub struct FileStamp {
    path: PathBuf,
    times: FileTimes,
    attributes: Option<Attributes>,
}

impl FileStamp {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            times: FileTimes::default(),
            attributes: None,
        }
    }

    pub fn times(mut self, times: FileTimes) -> Self {
        self.times = times;
        self
    }

    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply timestamps, then attributes.
    ///
    /// Attributes go last: a read-only flag would otherwise block the
    /// timestamp update on some platforms.
    pub fn apply(&self) -> Result<()> {
        self.times.apply_to_path(&self.path)?;
        if let Some(attributes) = self.attributes {
            attributes.apply_to_path(&self.path)?;
        }
        Ok(())
    }
}

/// Create `path` and any missing parents.
pub fn create_dir_all(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path).map_err(|source| Error::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove a file, ignoring failures. Returns whether the file is gone.
pub fn remove_file_quiet(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => e.kind() == std::io::ErrorKind::NotFound,
    }
}
