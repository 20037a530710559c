//! Item descriptors on both sides of the engine.
//!
//! [`ArchiveItem`] is the read side: an immutable snapshot of one entry of
//! an open archive, addressed by its index. [`UpdateItem`] is the write side:
//! where the bytes of one output entry come from.

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use arcbridge_fs::{Attributes, FileTimes};

use crate::engine::{ArchiveEngine, InStream, PropId, PropValue, Status};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveItem {
    pub index: u32,
    /// Path inside the archive, '/' separated. May be empty.
    pub path: String,
    pub size: u64,
    pub attributes: Attributes,
    pub times: FileTimes,
    pub is_dir: bool,
    pub is_encrypted: bool,
    pub crc: Option<u32>,
    pub comment: Option<String>,
}

impl ArchiveItem {
    /// Query every modelled property of item `index`.
    pub fn from_engine(
        engine: &dyn ArchiveEngine,
        index: u32,
    ) -> std::result::Result<Self, Status> {
        let prop = |id| engine.property(index, id);

        let attributes = Attributes::from_bits(prop(PropId::Attributes)?.as_u32().unwrap_or(0));
        let is_dir = prop(PropId::IsDir)?.as_bool().unwrap_or(false) || attributes.is_directory();

        Ok(Self {
            index,
            path: prop(PropId::Path)?.as_str().unwrap_or_default().to_owned(),
            size: prop(PropId::Size)?.as_u64().unwrap_or(0),
            attributes,
            times: FileTimes {
                created: prop(PropId::Created)?.as_time(),
                accessed: prop(PropId::Accessed)?.as_time(),
                modified: prop(PropId::Modified)?.as_time(),
            },
            is_dir,
            is_encrypted: prop(PropId::Encrypted)?.as_bool().unwrap_or(false),
            crc: prop(PropId::Crc)?.as_u32(),
            comment: prop(PropId::Comment)?.as_str().map(str::to_owned),
        })
    }

    /// Extension of the last path component, without the dot.
    pub fn extension(&self) -> Option<&str> {
        path_extension(&self.path)
    }

    /// This item's value for `prop`, as the engine would answer it.
    pub fn property(&self, prop: PropId) -> PropValue {
        ItemProps {
            path: Cow::Borrowed(&self.path),
            is_dir: self.is_dir,
            size: self.size,
            attributes: self.attributes,
            times: self.times,
        }
        .answer(prop)
    }
}

/// Where the content of an [`UpdateItem`] comes from.
pub enum ItemSource {
    File(PathBuf),
    Stream(Box<dyn InStream>),
    Directory,
}

impl fmt::Debug for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Directory => f.write_str("Directory"),
        }
    }
}

/// One entry to write during an update.
#[derive(Debug)]
pub struct UpdateItem {
    pub source: ItemSource,
    /// Path inside the archive, '/' separated.
    pub archive_path: String,
    pub size: u64,
    pub attributes: Attributes,
    pub times: FileTimes,
}

impl UpdateItem {
    /// A host file, with size, times and attributes read from its metadata.
    pub fn file(path: impl Into<PathBuf>, archive_path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path).map_err(|source| arcbridge_fs::Error::Metadata {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            size: metadata.len(),
            attributes: Attributes::from_metadata(&metadata),
            times: FileTimes::from_metadata(&metadata),
            source: ItemSource::File(path),
            archive_path: archive_path.into(),
        })
    }

    /// A host file stored under its own file name.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(Error::InvalidPath)?;
        Self::file(path, name)
    }

    /// An open stream stored under a synthetic name. Its length is measured
    /// by seeking, and the stream is rewound.
    pub fn stream(
        mut stream: Box<dyn InStream>,
        archive_path: impl Into<String>,
    ) -> io::Result<Self> {
        let size = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(0))?;
        Ok(Self {
            source: ItemSource::Stream(stream),
            archive_path: archive_path.into(),
            size,
            attributes: Attributes::from_bits(Attributes::ARCHIVE),
            times: FileTimes::default(),
        })
    }

    pub fn directory(archive_path: impl Into<String>) -> Self {
        Self {
            source: ItemSource::Directory,
            archive_path: archive_path.into(),
            size: 0,
            attributes: Attributes::from_bits(Attributes::DIRECTORY),
            times: FileTimes::default(),
        }
    }

    pub fn times(mut self, times: FileTimes) -> Self {
        self.times = times;
        self
    }

    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.source, ItemSource::Directory)
    }

    /// Every file and directory below `root`, with archive paths relative
    /// to it. Entries are sorted so parents precede their children.
    pub fn from_directory_tree(root: impl AsRef<Path>) -> Result<Vec<Self>> {
        let root = root.as_ref();
        let mut items = Vec::new();
        walk(root, "", &mut items)?;
        Ok(items)
    }

    /// Split into property metadata and the content source.
    pub(crate) fn into_parts(self) -> (ItemProps<'static>, ItemSource) {
        let is_dir = self.is_dir();
        (
            ItemProps {
                path: self.archive_path.into(),
                is_dir,
                size: self.size,
                attributes: self.attributes,
                times: self.times,
            },
            self.source,
        )
    }
}

fn walk(dir: &Path, prefix: &str, items: &mut Vec<UpdateItem>) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let archive_path = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            let metadata = entry.metadata()?;
            items.push(
                UpdateItem::directory(archive_path.clone())
                    .times(FileTimes::from_metadata(&metadata))
                    .attributes(Attributes::from_metadata(&metadata)),
            );
            walk(&path, &archive_path, items)?;
        } else {
            items.push(UpdateItem::file(path, archive_path)?);
        }
    }
    Ok(())
}

/// Property view shared by both item kinds.
pub(crate) struct ItemProps<'a> {
    pub path: Cow<'a, str>,
    pub is_dir: bool,
    pub size: u64,
    pub attributes: Attributes,
    pub times: FileTimes,
}

impl ItemProps<'_> {
    pub(crate) fn answer(&self, prop: PropId) -> PropValue {
        match prop {
            PropId::Path => PropValue::Str(self.path.clone().into_owned()),
            PropId::Extension => path_extension(&self.path)
                .map(|e| PropValue::Str(e.to_owned()))
                .unwrap_or_default(),
            PropId::IsDir => PropValue::Bool(self.is_dir),
            PropId::IsAnti => PropValue::Bool(false),
            PropId::Size => PropValue::U64(self.size),
            PropId::Attributes => PropValue::U32(self.attributes.bits()),
            PropId::Created => self.times.created.map(PropValue::Time).unwrap_or_default(),
            PropId::Accessed => self.times.accessed.map(PropValue::Time).unwrap_or_default(),
            PropId::Modified => self.times.modified.map(PropValue::Time).unwrap_or_default(),
            _ => PropValue::Empty,
        }
    }
}

fn path_extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    match name.rfind('.') {
        Some(0) | None => None,
        Some(dot) => Some(&name[dot + 1..]),
    }
}
