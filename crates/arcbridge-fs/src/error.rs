use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read metadata of '{path}': {source}")]
    Metadata { path: PathBuf, source: io::Error },

    #[error("failed to set timestamps on '{path}': {source}")]
    Times { path: PathBuf, source: io::Error },

    #[error("failed to set attributes on '{path}': {source}")]
    Attributes { path: PathBuf, source: io::Error },

    #[error("failed to create directory '{path}': {source}")]
    CreateDir { path: PathBuf, source: io::Error },
}

impl Error {
    /// True when the path vanished before it could be stamped.
    pub fn is_not_found(&self) -> bool {
        let source = match self {
            Self::Metadata { source, .. }
            | Self::Times { source, .. }
            | Self::Attributes { source, .. }
            | Self::CreateDir { source, .. } => source,
        };
        source.kind() == io::ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, Error>;
