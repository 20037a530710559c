use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;

use filetime::FileTime;

use crate::{Error, Result};

/// The three timestamps an archive records for an item.
///
/// Writing an item through a generic stream leaves the target with the
/// time of extraction, so the recorded values are stamped back onto the
/// path once its handle has been closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

impl FileTimes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(mut self, time: SystemTime) -> Self {
        self.created = Some(time);
        self
    }

    pub fn accessed(mut self, time: SystemTime) -> Self {
        self.accessed = Some(time);
        self
    }

    pub fn modified(mut self, time: SystemTime) -> Self {
        self.modified = Some(time);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_none() && self.accessed.is_none() && self.modified.is_none()
    }

    /// Snapshot the timestamps of an existing file.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            created: metadata.created().ok(),
            accessed: metadata.accessed().ok(),
            modified: metadata.modified().ok(),
        }
    }

    /// Apply the timestamps to a closed file or directory.
    ///
    /// The creation time is only settable on Windows; elsewhere it is ignored.
    pub fn apply_to_path(&self, path: &Path) -> Result<()> {
        let to_err = |source| Error::Times {
            path: path.to_path_buf(),
            source,
        };

        match (self.accessed, self.modified) {
            (Some(accessed), Some(modified)) => filetime::set_file_times(
                path,
                FileTime::from_system_time(accessed),
                FileTime::from_system_time(modified),
            )
            .map_err(to_err)?,
            (Some(accessed), None) => {
                filetime::set_file_atime(path, FileTime::from_system_time(accessed))
                    .map_err(to_err)?
            }
            (None, Some(modified)) => {
                filetime::set_file_mtime(path, FileTime::from_system_time(modified))
                    .map_err(to_err)?
            }
            (None, None) => {}
        }

        #[cfg(windows)]
        if let Some(created) = self.created {
            set_created(path, created).map_err(to_err)?;
        }

        Ok(())
    }
}

#[cfg(windows)]
fn set_created(path: &Path, created: SystemTime) -> std::io::Result<()> {
    use std::os::windows::fs::{FileTimesExt, OpenOptionsExt};

    // FILE_FLAG_BACKUP_SEMANTICS, required to open directories.
    const BACKUP_SEMANTICS: u32 = 0x0200_0000;

    let file = std::fs::OpenOptions::new()
        .write(true)
        .custom_flags(BACKUP_SEMANTICS)
        .open(path)?;
    file.set_times(std::fs::FileTimes::new().set_created(created))
}
