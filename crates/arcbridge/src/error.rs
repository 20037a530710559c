use std::io;
use std::path::PathBuf;

use crate::deferred::DeferredErrorList;
use crate::engine::Status;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("engine failed to {operation}: {status}")]
    Protocol {
        operation: &'static str,
        status: Status,
    },

    #[error("engine stopped the operation: {0}")]
    Engine(Status),

    #[error("volume number {number} of '{base}' is outside .001 to .999")]
    VolumeCapacity { base: PathBuf, number: u32 },

    #[error("volume not found: '{0}'")]
    VolumeMissing(PathBuf),

    #[error("volume size must be greater than zero")]
    ZeroVolumeSize,

    #[error("entry '{entry}' resolves outside the destination: '{resolved}'")]
    PathEscape { entry: PathBuf, resolved: PathBuf },

    #[error("entry path is empty or contains a null byte")]
    InvalidPath,

    #[error(
        "{} item(s) failed, first: {}",
        .0.len(),
        .0.first().map(ToString::to_string).unwrap_or_default()
    )]
    ItemsFailed(DeferredErrorList),

    #[error(transparent)]
    Fs(#[from] arcbridge_fs::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => io,
            other => io::Error::other(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
