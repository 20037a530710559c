//! Callback bridge between archive codec engines and host files and streams.
//!
//! The engine parses containers and runs codecs; it only sees byte streams
//! and item indices. This crate implements the callbacks it drives: it maps
//! indices to host files or caller streams, reports progress, and keeps host
//! failures out of the engine's call stack.
//!
//! # Architecture
//!
//! - `engine.rs` - Engine capability traits and status codes
//! - `progress.rs` - Byte counts to percentage events
//! - `stream/` - Stream adapters, null sink, multi-volume streams
//! - `extract/` - Extraction callback and target path resolution
//! - `update.rs` - Update callback (create, append, modify)
//! - `session.rs` - Open, extract, test and update drivers
//! - `deferred.rs` - Errors recorded inside callbacks
//! - `observer.rs` - Host event trait

pub use deferred::{DeferredError, DeferredErrorKind, DeferredErrorList};
pub use error::{Error, Result};
pub use extract::{ExtractReport, ExtractedItem, ExtractionCallback};
pub use hash::HashStrategy;
pub use item::{ArchiveItem, ItemSource, UpdateItem};
pub use observer::{
    Flow, ItemFinished, ItemStarted, OverwriteConflict, OverwriteDecision, TransferObserver,
};
pub use options::{ExtractOptions, UpdateOptions};
pub use progress::{ProgressAccumulator, ProgressEvent, ProgressState};
pub use session::{ArchiveSession, compress, solid_run};
pub use update::{UpdateCallback, UpdateMode, UpdateReport};

pub use arcbridge_fs::{Attributes, FileStamp, FileTimes};

pub mod deferred;
pub mod engine;
mod error;
pub mod extract;
mod hash;
pub mod item;
pub mod observer;
pub mod options;
pub mod progress;
pub mod session;
pub mod stream;
pub mod update;
