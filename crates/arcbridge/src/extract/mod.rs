//! Extraction callback: routes each item the engine decodes to a host file,
//! a caller stream or a discarding sink.
//!
//! Per item the engine calls `get_stream`, writes, then reports the result
//! with `set_operation_result`. Failures on the host side never reach the
//! engine as errors: they are recorded in a [`DeferredErrorList`] and the
//! item is decoded into a [`NullSink`] instead.

mod target;

pub use target::{resolve_target, sanitize_entry_path, synthesize_name};

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcbridge_fs::FileStamp;

use crate::deferred::{DeferredErrorKind, DeferredErrorList};
use crate::engine::{ArchiveExtractCallback, AskMode, OperationResult, OutStream, Status};
use crate::item::ArchiveItem;
use crate::observer::{Flow, ItemFinished, ItemStarted, OverwriteConflict, OverwriteDecision};
use crate::options::ExtractOptions;
use crate::progress::ProgressAccumulator;
use crate::stream::{NullSink, OutStreamAdapter};
use crate::{Error, Result};

enum Destination<'s> {
    Directory(PathBuf),
    /// Only `index` reaches the caller's stream.
    Stream {
        index: u32,
        stream: Option<&'s mut dyn OutStream>,
    },
    Discard,
}

/// Where the engine is in the per-item protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExtractState {
    /// `set_total` not seen yet.
    Idle,
    /// Between items.
    Opened,
    /// `get_stream` answered for this index, result pending.
    Writing(u32),
}

enum ItemStream<'s> {
    File(OutStreamAdapter<File>),
    Caller(OutStreamAdapter<&'s mut dyn OutStream>),
    Sink(NullSink),
}

impl ItemStream<'_> {
    fn as_out(&mut self) -> &mut dyn OutStream {
        match self {
            Self::File(adapter) => adapter,
            Self::Caller(adapter) => adapter,
            Self::Sink(sink) => sink,
        }
    }
}

struct Pending<'s> {
    index: u32,
    target: Option<PathBuf>,
    is_dir: bool,
    stream: Option<ItemStream<'s>>,
}

/// One item that was written to its destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedItem {
    pub index: u32,
    /// Host path, `None` when written to a caller stream.
    pub target: Option<PathBuf>,
    pub bytes: u64,
    pub hash: Option<String>,
    pub is_dir: bool,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub extracted: Vec<ExtractedItem>,
    /// Items decoded without being kept.
    pub sunk: Vec<u32>,
    pub errors: DeferredErrorList,
    pub cancelled: bool,
    /// Extract-mode items handled, sunk ones included.
    pub done: u32,
}

impl ExtractReport {
    /// Fail if any item error was recorded. Cancellation alone is not a
    /// failure.
    pub fn into_result(self) -> Result<Self> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::ItemsFailed(self.errors))
        }
    }

    pub fn target_of(&self, index: u32) -> Option<&Path> {
        self.extracted
            .iter()
            .find(|item| item.index == index)
            .and_then(|item| item.target.as_deref())
    }
}

pub struct ExtractionCallback<'s> {
    items: &'s [ArchiveItem],
    archive_name: Option<String>,
    destination: Destination<'s>,
    selection: Option<BTreeSet<u32>>,
    expected: u32,
    options: ExtractOptions,
    progress: Arc<ProgressAccumulator>,
    state: ExtractState,
    pending: Option<Pending<'s>>,
    dir_stamps: Vec<FileStamp>,
    report: ExtractReport,
}

impl<'s> ExtractionCallback<'s> {
    fn new(
        items: &'s [ArchiveItem],
        destination: Destination<'s>,
        options: ExtractOptions,
    ) -> Self {
        let progress = Arc::new(ProgressAccumulator::new(options.observer.clone()));
        Self {
            items,
            archive_name: None,
            destination,
            selection: None,
            expected: u32::try_from(items.len()).unwrap_or(u32::MAX),
            options,
            progress,
            state: ExtractState::Idle,
            pending: None,
            dir_stamps: Vec::new(),
            report: ExtractReport::default(),
        }
    }

    /// Write items below `dest`, mirroring their archive paths.
    pub fn to_directory(
        items: &'s [ArchiveItem],
        dest: impl Into<PathBuf>,
        options: ExtractOptions,
    ) -> Self {
        Self::new(items, Destination::Directory(dest.into()), options)
    }

    /// Write item `index` into `stream`; every other item is discarded.
    pub fn to_stream(
        items: &'s [ArchiveItem],
        index: u32,
        stream: &'s mut dyn OutStream,
        options: ExtractOptions,
    ) -> Self {
        Self::new(
            items,
            Destination::Stream {
                index,
                stream: Some(stream),
            },
            options,
        )
        .expected_items(1)
    }

    /// Decode without keeping anything, for integrity checks.
    pub fn discarding(items: &'s [ArchiveItem], options: ExtractOptions) -> Self {
        Self::new(items, Destination::Discard, options)
    }

    /// Archive file name, used to name a single unnamed item.
    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.archive_name = Some(name.into());
        self
    }

    /// Keep only these indices; anything else the engine decodes is sunk.
    pub fn selection(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.selection = Some(indices.into_iter().collect());
        self
    }

    /// Item count the completion fraction is measured against.
    pub fn expected_items(mut self, count: u32) -> Self {
        self.expected = count;
        self
    }

    pub fn progress(&self) -> &Arc<ProgressAccumulator> {
        &self.progress
    }

    pub fn is_cancelled(&self) -> bool {
        self.report.cancelled
    }

    /// Close any open item and hand over the report.
    pub fn finish(mut self) -> ExtractReport {
        self.abandon_pending();

        // Children first: stamping a parent last keeps its mtime.
        for stamp in self.dir_stamps.drain(..).rev() {
            if let Err(e) = stamp.apply() {
                if !e.is_not_found() {
                    self.report
                        .errors
                        .record(DeferredErrorKind::Io, None, e.to_string());
                }
            }
        }
        if let Some(observer) = &self.options.observer {
            observer.on_finished();
        }
        std::mem::take(&mut self.report)
    }

    fn sink(&self) -> ItemStream<'s> {
        ItemStream::Sink(NullSink::new().progress(self.progress.clone()))
    }

    fn stamp_for(&self, item: &ArchiveItem, target: &Path) -> Option<FileStamp> {
        let times = self.options.preserve_times && !item.times.is_empty();
        let attributes = self.options.preserve_attributes && item.attributes.bits() != 0;
        if !times && !attributes {
            return None;
        }

        let mut stamp = FileStamp::new(target);
        if times {
            stamp = stamp.times(item.times);
        }
        if attributes {
            stamp = stamp.attributes(item.attributes);
        }
        Some(stamp)
    }

    /// Close an item the engine never reported a result for.
    fn abandon_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!(index = pending.index, "item left without a result");
            if let Some(stream) = pending.stream {
                self.close_stream(pending.index, stream);
            }
        }
    }

    /// Close the per-item stream, returning bytes written and digest.
    fn close_stream(&mut self, index: u32, stream: ItemStream<'s>) -> (u64, Option<String>) {
        let (result, bytes, digest) = match stream {
            ItemStream::File(mut adapter) => {
                let result = adapter.close();
                (result, adapter.bytes_written(), adapter.digest().map(str::to_owned))
            }
            ItemStream::Caller(mut adapter) => {
                let result = adapter.close();
                (result, adapter.bytes_written(), adapter.digest().map(str::to_owned))
            }
            ItemStream::Sink(sink) => return (sink.bytes_written(), None),
        };

        if let Err(e) = result {
            tracing::warn!(index, error = %e, "closing item stream failed");
            self.report
                .errors
                .record(DeferredErrorKind::Io, Some(index), e.to_string());
        }
        (bytes, digest)
    }

    /// Record a host failure for `index` and fall back to the sink.
    fn fail_to_sink(&mut self, index: u32, error: impl std::fmt::Display) -> ItemStream<'s> {
        tracing::warn!(index, %error, "item sunk");
        self.report
            .errors
            .record(DeferredErrorKind::Io, Some(index), error.to_string());
        self.sink()
    }

    /// Resolve where item `index` goes. `Err` means cancel.
    fn open_target(
        &mut self,
        item: &ArchiveItem,
    ) -> std::result::Result<(Option<PathBuf>, ItemStream<'s>), Status> {
        let index = item.index;

        if self
            .selection
            .as_ref()
            .is_some_and(|selection| !selection.contains(&index))
        {
            return Ok((None, self.sink()));
        }

        let dest = match &mut self.destination {
            Destination::Discard => return Ok((None, self.sink())),
            Destination::Stream { index: wanted, stream } => {
                if *wanted != index || item.is_dir {
                    return Ok((None, self.sink()));
                }
                let Some(stream) = stream.take() else {
                    return Ok((None, self.sink()));
                };
                let adapter = OutStreamAdapter::new(stream)
                    .leave_open(true)
                    .progress(self.progress.clone())
                    .hash(self.options.hash_strategy);
                return Ok((None, ItemStream::Caller(adapter)));
            }
            Destination::Directory(dest) => dest.clone(),
        };

        let name = if item.path.is_empty() {
            let count = u32::try_from(self.items.len()).unwrap_or(u32::MAX);
            synthesize_name(self.archive_name.as_deref(), count, index)
        } else {
            item.path.clone()
        };
        let mut target = match resolve_target(&dest, &name) {
            Ok(target) => target,
            Err(e) => return Ok((None, self.fail_to_sink(index, e))),
        };

        if item.is_dir {
            if let Err(e) = arcbridge_fs::create_dir_all(&target) {
                return Ok((None, self.fail_to_sink(index, e)));
            }
            if let Some(stamp) = self.stamp_for(item, &target) {
                self.dir_stamps.push(stamp);
            }
            return Ok((Some(target), self.sink()));
        }

        if target.exists() {
            let decision = match &self.options.observer {
                Some(observer) => observer.on_overwrite(&OverwriteConflict {
                    index,
                    path: &target,
                }),
                None => OverwriteDecision::Overwrite,
            };
            tracing::debug!(index, ?decision, "target exists");
            match decision {
                OverwriteDecision::Overwrite => {}
                OverwriteDecision::Rename(renamed) => target = renamed,
                OverwriteDecision::Skip => return Ok((None, self.sink())),
                OverwriteDecision::Cancel => return Err(Status::ABORT),
            }
        }

        if let Some(parent) = target.parent() {
            if let Err(e) = arcbridge_fs::create_dir_all(parent) {
                return Ok((None, self.fail_to_sink(index, e)));
            }
        }
        let file = match File::create(&target) {
            Ok(file) => file,
            Err(e) => {
                let e = format!("cannot create '{}': {e}", target.display());
                return Ok((None, self.fail_to_sink(index, e)));
            }
        };

        let mut adapter = OutStreamAdapter::new(file)
            .progress(self.progress.clone())
            .hash(self.options.hash_strategy);
        if let Some(stamp) = self.stamp_for(item, &target) {
            adapter = adapter.stamp(stamp);
        }
        Ok((Some(target), ItemStream::File(adapter)))
    }

    fn status(&self) -> Status {
        if self.report.cancelled {
            Status::ABORT
        } else {
            Status::OK
        }
    }

    fn cancel(&mut self) -> Status {
        tracing::debug!("extraction cancelled");
        self.report.cancelled = true;
        Status::ABORT
    }
}

impl ArchiveExtractCallback for ExtractionCallback<'_> {
    fn set_total(&mut self, total: u64) -> Status {
        self.progress.set_total(total);
        self.state = ExtractState::Opened;
        if let Some(observer) = &self.options.observer {
            observer.on_open(total);
        }
        Status::OK
    }

    fn set_completed(&mut self, _completed: u64) -> Status {
        self.status()
    }

    fn get_stream(
        &mut self,
        index: u32,
        mode: AskMode,
    ) -> std::result::Result<Option<&mut dyn OutStream>, Status> {
        if self.report.cancelled {
            return Err(Status::ABORT);
        }
        match self.state {
            ExtractState::Idle => tracing::debug!(index, "stream requested before the total"),
            ExtractState::Writing(open) => {
                tracing::debug!(index, open, "stream requested before the previous result");
            }
            ExtractState::Opened => {}
        }
        self.abandon_pending();

        let items = self.items;
        let Some(item) = items.get(index as usize) else {
            self.report.errors.record(
                DeferredErrorKind::Property,
                Some(index),
                "engine asked for an unknown item",
            );
            return Err(Status::INVALID_ARG);
        };
        self.state = ExtractState::Writing(index);

        if mode != AskMode::Extract {
            self.pending = Some(Pending {
                index,
                target: None,
                is_dir: item.is_dir,
                stream: None,
            });
            return Ok(None);
        }
        self.report.done += 1;

        let (target, stream) = match self.open_target(item) {
            Ok(opened) => opened,
            Err(_) => return Err(self.cancel()),
        };
        let mut pending = Pending {
            index,
            target,
            is_dir: item.is_dir,
            stream: Some(stream),
        };
        tracing::debug!(index, target = ?pending.target, "item opened");

        if let Some(observer) = &self.options.observer {
            let path = pending
                .target
                .clone()
                .unwrap_or_else(|| PathBuf::from(&item.path));
            let flow = observer.on_item_started(&ItemStarted {
                index,
                path: &path,
                done: self.report.done,
                total: self.expected,
            });
            if flow == Flow::Cancel {
                if let Some(stream) = pending.stream.take() {
                    let created = matches!(stream, ItemStream::File(_));
                    self.close_stream(index, stream);
                    if let (true, Some(target)) = (created, &pending.target) {
                        if !arcbridge_fs::remove_file_quiet(target) {
                            tracing::warn!(
                                path = %target.display(),
                                "failed to remove cancelled item"
                            );
                        }
                    }
                }
                return Err(self.cancel());
            }
        }

        let pending = self.pending.insert(pending);
        Ok(pending.stream.as_mut().map(ItemStream::as_out))
    }

    fn set_operation_result(&mut self, result: OperationResult) -> Status {
        let ExtractState::Writing(index) = self.state else {
            tracing::debug!(state = ?self.state, ?result, "result outside an item");
            return self.status();
        };
        self.state = ExtractState::Opened;
        let Some(pending) = self.pending.take() else {
            // The item was cancelled before its stream was handed out.
            tracing::debug!(index, ?result, "result for an item without a stream");
            return self.status();
        };

        let (kept, bytes, hash) = match pending.stream {
            Some(ItemStream::Sink(sink)) => {
                // Directories are created up front and only sunk for their
                // (empty) content.
                let kept = pending.is_dir && pending.target.is_some();
                if !kept {
                    self.report.sunk.push(index);
                }
                (kept, sink.bytes_written(), None)
            }
            Some(stream) => {
                let (bytes, hash) = self.close_stream(index, stream);
                (true, bytes, hash)
            }
            None => (false, 0, None),
        };

        match DeferredErrorKind::from_result(result) {
            None => {
                if kept {
                    if let Some(observer) = &self.options.observer {
                        observer.on_item_finished(&ItemFinished {
                            index,
                            path: pending.target.as_deref(),
                            bytes,
                        });
                    }
                    self.report.extracted.push(ExtractedItem {
                        index,
                        target: pending.target,
                        bytes,
                        hash,
                        is_dir: pending.is_dir,
                    });
                }
            }
            Some(kind) => {
                if self.options.report_errors {
                    self.report
                        .errors
                        .record(kind, Some(index), format!("engine reported {result:?}"));
                }
            }
        }

        self.status()
    }

    fn password(&mut self) -> std::result::Result<String, Status> {
        Ok(self.options.password.clone().unwrap_or_default())
    }
}
