//! Errors recorded during an engine call and surfaced after it returns.
//!
//! The call stack between a callback and the engine belongs to the engine,
//! so callbacks append here and answer with a status code instead of
//! failing. The owning operation reports the list once control is back in
//! host code.

use std::fmt;

use crate::engine::OperationResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeferredErrorKind {
    /// Checksum mismatch, the item is corrupted.
    Crc,
    /// Generic data error reported by the codec.
    Data,
    UnsupportedMethod,
    /// Creating, opening or closing a host file failed.
    Io,
    /// A property could not be answered.
    Property,
}

impl DeferredErrorKind {
    /// Kind recorded for a non-`Ok` engine result.
    pub fn from_result(result: OperationResult) -> Option<Self> {
        match result {
            OperationResult::Ok => None,
            OperationResult::CrcError => Some(Self::Crc),
            OperationResult::UnsupportedMethod => Some(Self::UnsupportedMethod),
            OperationResult::DataError
            | OperationResult::Unavailable
            | OperationResult::UnexpectedEnd
            | OperationResult::DataAfterEnd
            | OperationResult::IsNotArchive
            | OperationResult::HeadersError
            | OperationResult::WrongPassword => Some(Self::Data),
        }
    }
}

impl fmt::Display for DeferredErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Crc => "CRC mismatch",
            Self::Data => "data error",
            Self::UnsupportedMethod => "unsupported method",
            Self::Io => "I/O failure",
            Self::Property => "property error",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeferredError {
    pub kind: DeferredErrorKind,
    pub index: Option<u32>,
    pub message: String,
}

impl DeferredError {
    pub fn new(kind: DeferredErrorKind, index: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeferredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{} on item {}: {}", self.kind, index, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for DeferredError {}

/// Append-only, ordered list of [`DeferredError`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeferredErrorList(Vec<DeferredError>);

impl DeferredErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: DeferredError) {
        tracing::debug!(%error, "deferred");
        self.0.push(error);
    }

    pub fn record(
        &mut self,
        kind: DeferredErrorKind,
        index: Option<u32>,
        message: impl Into<String>,
    ) {
        self.push(DeferredError::new(kind, index, message));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&DeferredError> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeferredError> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<DeferredError> {
        self.0
    }
}

impl<'a> IntoIterator for &'a DeferredErrorList {
    type Item = &'a DeferredError;
    type IntoIter = std::slice::Iter<'a, DeferredError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
