use std::fs::Metadata;
use std::path::Path;

use crate::{Error, Result};

/// Archive attribute bitmask.
///
/// The low 16 bits follow the Windows file attribute layout. When
/// [`Attributes::UNIX_EXTENSION`] is set, the high 16 bits carry the Unix
/// mode of the item, which is how archivers record permissions portably.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Attributes(u32);

impl Attributes {
    pub const READONLY: u32 = 0x0001;
    pub const HIDDEN: u32 = 0x0002;
    pub const SYSTEM: u32 = 0x0004;
    pub const DIRECTORY: u32 = 0x0010;
    pub const ARCHIVE: u32 = 0x0020;
    pub const NORMAL: u32 = 0x0080;
    pub const UNIX_EXTENSION: u32 = 0x8000;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn is_readonly(self) -> bool {
        self.contains(Self::READONLY)
    }

    pub fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    /// Unix mode bits, if the item carries them.
    pub fn unix_mode(self) -> Option<u32> {
        self.contains(Self::UNIX_EXTENSION).then_some(self.0 >> 16)
    }

    pub fn with_unix_mode(self, mode: u32) -> Self {
        Self((self.0 & 0x7FFF) | Self::UNIX_EXTENSION | ((mode & 0xFFFF) << 16))
    }

    /// Attributes of an existing file, as an archiver would record them.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mut bits = 0;
        if metadata.permissions().readonly() {
            bits |= Self::READONLY;
        }
        if metadata.is_dir() {
            bits |= Self::DIRECTORY;
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::MetadataExt;
            bits |= metadata.file_attributes() & 0x7FFF;
        }

        let attributes = Self(bits);

        #[cfg(unix)]
        let attributes = {
            use std::os::unix::fs::PermissionsExt;
            attributes.with_unix_mode(metadata.permissions().mode())
        };

        attributes
    }

    /// Apply the attributes to a closed file or directory.
    ///
    /// # Platform Behavior
    /// - **Unix**: the embedded Unix mode is applied when present, otherwise
    ///   only the read-only flag is honoured by clearing the write bits.
    /// - **Windows**: the settable attribute bits are applied verbatim.
    pub fn apply_to_path(self, path: &Path) -> Result<()> {
        let to_err = |source| Error::Attributes {
            path: path.to_path_buf(),
            source,
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let permissions = match self.unix_mode() {
                Some(mode) => std::fs::Permissions::from_mode(mode & 0o7777),
                None if self.is_readonly() => {
                    let mut perms = std::fs::metadata(path)
                        .map_err(|source| Error::Metadata {
                            path: path.to_path_buf(),
                            source,
                        })?
                        .permissions();
                    perms.set_readonly(true);
                    perms
                }
                None => return Ok(()),
            };
            std::fs::set_permissions(path, permissions).map_err(to_err)?;
        }

        #[cfg(windows)]
        {
            use std::os::windows::prelude::OsStrExt;
            use windows::Win32::Storage::FileSystem::{
                FILE_FLAGS_AND_ATTRIBUTES, SetFileAttributesW,
            };
            use windows::core::PCWSTR;

            // Bits SetFileAttributesW accepts; DIRECTORY and the Unix flag are not among them.
            const SETTABLE: u32 =
                0x0001 | 0x0002 | 0x0004 | 0x0020 | 0x0080 | 0x0100 | 0x1000 | 0x2000;

            let settable = self.0 & SETTABLE;
            if settable == 0 {
                return Ok(());
            }

            let wide: Vec<u16> = path
                .as_os_str()
                .encode_wide()
                .chain(std::iter::once(0))
                .collect();

            unsafe {
                SetFileAttributesW(
                    PCWSTR::from_raw(wide.as_ptr()),
                    FILE_FLAGS_AND_ATTRIBUTES(settable),
                )
            }
            .map_err(|e| to_err(std::io::Error::other(e)))?;
        }

        Ok(())
    }
}

impl From<u32> for Attributes {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}
