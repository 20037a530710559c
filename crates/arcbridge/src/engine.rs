//! Capability surface of the external archive engine.
//!
//! The engine is opaque: it parses containers and runs codecs, and knows
//! nothing about files. It drives the host through the callback traits in
//! this module, asking for streams per item index, querying properties and
//! reporting per-item results. Every callback answers with a [`Status`];
//! host failures never unwind into the engine.

use std::fmt;
use std::io::{self, Cursor, Read, Seek, Write};
use std::time::SystemTime;

/// Result code exchanged with the engine.
///
/// Mirrors the HRESULT convention: non-negative values are success,
/// negative values are failures. [`Status::ABORT`] is the cooperative
/// cancellation signal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Self = Self(0);
    pub const FALSE: Self = Self(1);
    pub const ABORT: Self = Self(0x8000_4004_u32 as i32);
    pub const FAIL: Self = Self(0x8000_4005_u32 as i32);
    pub const INVALID_ARG: Self = Self(0x8007_0057_u32 as i32);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub fn is_abort(self) -> bool {
        self == Self::ABORT
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status(0x{:08X})", self.0 as u32)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OK => f.write_str("ok"),
            Self::FALSE => f.write_str("false"),
            Self::ABORT => f.write_str("aborted"),
            Self::FAIL => f.write_str("failed"),
            Self::INVALID_ARG => f.write_str("invalid argument"),
            Self(code) => write!(f, "status 0x{:08X}", code as u32),
        }
    }
}

/// What the engine intends to do with the stream it asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AskMode {
    Extract,
    Test,
    Skip,
}

/// Per-item outcome reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationResult {
    Ok,
    UnsupportedMethod,
    DataError,
    CrcError,
    Unavailable,
    UnexpectedEnd,
    DataAfterEnd,
    IsNotArchive,
    HeadersError,
    WrongPassword,
}

/// Item and archive property identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropId {
    Path,
    Extension,
    IsDir,
    Size,
    PackedSize,
    Attributes,
    Created,
    Accessed,
    Modified,
    Solid,
    Encrypted,
    Crc,
    Comment,
    IsAnti,
    /// An identifier this layer does not model.
    Other(u32),
}

/// A property value as exchanged with the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PropValue {
    #[default]
    Empty,
    Bool(bool),
    U32(u32),
    U64(u64),
    Str(String),
    Time(SystemTime),
}

impl PropValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            Self::U64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U32(v) => Some(u64::from(*v)),
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<SystemTime> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }
}

/// Readable, seekable stream handed to the engine.
pub trait InStream: Read + Seek {}

impl<T: Read + Seek + ?Sized> InStream for T {}

/// Writable, seekable stream handed to the engine.
pub trait OutStream: Write + Seek {
    /// Truncate or extend the stream.
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl OutStream for std::fs::File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        std::fs::File::set_len(self, len)
    }
}

impl OutStream for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(io::Error::other)?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

impl OutStream for Cursor<&mut Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(io::Error::other)?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

impl<T: OutStream + ?Sized> OutStream for &mut T {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }
}

impl<T: OutStream + ?Sized> OutStream for Box<T> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }
}

/// Callback used while the engine opens an archive.
pub trait ArchiveOpenCallback {
    fn set_total(&mut self, files: Option<u64>, bytes: Option<u64>) -> Status;
    fn set_completed(&mut self, files: Option<u64>, bytes: Option<u64>) -> Status;
    /// Passphrase for encrypted headers.
    fn password(&mut self) -> Result<String, Status>;
}

/// Callback driven by [`ArchiveEngine::extract`].
///
/// For each item the engine calls `get_stream`, writes into the returned
/// stream (if any), then calls `set_operation_result`.
pub trait ArchiveExtractCallback {
    fn set_total(&mut self, total: u64) -> Status;
    fn set_completed(&mut self, completed: u64) -> Status;
    fn get_stream(
        &mut self,
        index: u32,
        mode: AskMode,
    ) -> Result<Option<&mut dyn OutStream>, Status>;
    fn set_operation_result(&mut self, result: OperationResult) -> Status;
    fn password(&mut self) -> Result<String, Status>;
}

/// `index_in_archive` value for items that do not exist in the source archive.
pub const NO_INDEX: u32 = u32::MAX;

/// How the engine should build output item `index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateItemInfo {
    pub new_data: bool,
    pub new_properties: bool,
    pub index_in_archive: u32,
}

/// Callback driven by [`UpdateEngine::update_items`].
pub trait ArchiveUpdateCallback {
    fn set_total(&mut self, total: u64) -> Status;
    fn set_completed(&mut self, completed: u64) -> Status;
    fn update_item_info(&mut self, index: u32) -> Result<UpdateItemInfo, Status>;
    fn property(&mut self, index: u32, prop: PropId) -> Result<PropValue, Status>;
    fn get_stream(&mut self, index: u32) -> Result<Option<&mut dyn InStream>, Status>;
    fn set_operation_result(&mut self, result: OperationResult) -> Status;
    /// Passphrase for encryption, `None` for an unencrypted archive.
    fn password(&mut self) -> Result<Option<String>, Status>;
}

/// Read-side engine capability.
pub trait ArchiveEngine {
    fn open(&mut self, stream: Box<dyn InStream>, callback: &mut dyn ArchiveOpenCallback) -> Status;
    fn item_count(&self) -> Result<u32, Status>;
    fn property(&self, index: u32, prop: PropId) -> Result<PropValue, Status>;
    fn archive_property(&self, prop: PropId) -> Result<PropValue, Status>;
    /// Decode `indices` (all items when `None`) in ascending order.
    fn extract(
        &mut self,
        indices: Option<&[u32]>,
        test_mode: bool,
        callback: &mut dyn ArchiveExtractCallback,
    ) -> Status;
    fn close(&mut self);
}

/// Write-side engine capability.
pub trait UpdateEngine {
    fn update_items(
        &mut self,
        out: &mut dyn OutStream,
        count: u32,
        callback: &mut dyn ArchiveUpdateCallback,
    ) -> Status;
}
