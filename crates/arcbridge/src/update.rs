//! Update callback: answers the engine's questions while it writes an
//! archive.
//!
//! The engine walks output indices `0..count`. For each it asks how to
//! build the item (`update_item_info`), reads properties when they are
//! new, pulls content through `get_stream` when the data is new, and
//! reports the result. Which output index maps to which source is fixed up
//! front by the [`UpdateMode`].

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::deferred::{DeferredErrorKind, DeferredErrorList};
use crate::engine::{
    ArchiveUpdateCallback, InStream, NO_INDEX, OperationResult, PropId, PropValue, Status,
    UpdateItemInfo,
};
use crate::item::{ArchiveItem, ItemProps, ItemSource, UpdateItem};
use crate::observer::{Flow, ItemFinished, ItemStarted};
use crate::options::UpdateOptions;
use crate::progress::ProgressAccumulator;
use crate::stream::InStreamAdapter;
use crate::{Error, Result};

/// How the output archive relates to an existing one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Every output item is new.
    #[default]
    Create,
    /// The first `existing` items are copied unchanged, sources follow.
    Append { existing: u32 },
    /// No new data. A `Some` entry renames the item, a `None` entry deletes
    /// it.
    Modify {
        renames: BTreeMap<u32, Option<String>>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Slot {
    New(usize),
    Keep(u32),
    Rename { index: u32, name: String },
}

/// Output slots of a modification.
///
/// Survivors keep their index where it is still in range. Every slot left
/// by a deleted item is filled with the highest surviving index that would
/// otherwise fall off the end, so the mapping stays one to one.
fn modify_plan(existing: u32, renames: &BTreeMap<u32, Option<String>>) -> Vec<Slot> {
    let deleted = |index: u32| matches!(renames.get(&index), Some(None));
    let survivors = (0..existing).filter(|&i| !deleted(i)).count() as u32;

    let mut tail: Vec<u32> = (survivors..existing).filter(|&i| !deleted(i)).collect();

    (0..survivors)
        .map(|slot| {
            let index = if deleted(slot) {
                tail.pop().unwrap_or(0)
            } else {
                slot
            };
            match renames.get(&index) {
                Some(Some(name)) => Slot::Rename {
                    index,
                    name: name.clone(),
                },
                _ => Slot::Keep(index),
            }
        })
        .collect()
}

enum Content {
    File(std::path::PathBuf),
    /// Caller stream, absent while an adapter holds it.
    Stream(Option<Box<dyn InStream>>),
    Empty,
}

struct Source {
    props: ItemProps<'static>,
    content: Content,
}

impl From<UpdateItem> for Source {
    fn from(item: UpdateItem) -> Self {
        let (props, source) = item.into_parts();
        let content = match source {
            ItemSource::File(path) => Content::File(path),
            ItemSource::Stream(stream) => Content::Stream(Some(stream)),
            ItemSource::Directory => Content::Empty,
        };
        Self { props, content }
    }
}

struct Current {
    output: u32,
    source: usize,
    adapter: InStreamAdapter<Box<dyn InStream>>,
}

pub struct UpdateReport {
    /// Items whose content was streamed to the engine.
    pub items_written: u32,
    pub bytes_read: u64,
    pub errors: DeferredErrorList,
    pub cancelled: bool,
    /// Caller streams handed back after the engine released them.
    pub streams: Vec<Box<dyn InStream>>,
}

impl fmt::Debug for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateReport")
            .field("items_written", &self.items_written)
            .field("bytes_read", &self.bytes_read)
            .field("errors", &self.errors)
            .field("cancelled", &self.cancelled)
            .field("streams", &self.streams.len())
            .finish()
    }
}

impl UpdateReport {
    pub fn into_result(self) -> Result<Self> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::ItemsFailed(self.errors))
        }
    }
}

pub struct UpdateCallback<'s> {
    existing: &'s [ArchiveItem],
    slots: Vec<Slot>,
    sources: Vec<Source>,
    options: UpdateOptions,
    progress: Arc<ProgressAccumulator>,
    current: Option<Current>,
    /// Adapters kept alive until `finish`.
    disposal: Vec<(usize, InStreamAdapter<Box<dyn InStream>>)>,
    last_index: Option<u32>,
    new_total: u32,
    done: u32,
    bytes_read: u64,
    errors: DeferredErrorList,
    cancelled: bool,
}

impl<'s> UpdateCallback<'s> {
    fn new(
        existing: &'s [ArchiveItem],
        slots: Vec<Slot>,
        sources: Vec<UpdateItem>,
        options: UpdateOptions,
    ) -> Self {
        let progress = Arc::new(ProgressAccumulator::new(options.observer.clone()));
        let new_total = slots.iter().filter(|s| matches!(s, Slot::New(_))).count() as u32;
        Self {
            existing,
            slots,
            sources: sources.into_iter().map(Source::from).collect(),
            options,
            progress,
            current: None,
            disposal: Vec::new(),
            last_index: None,
            new_total,
            done: 0,
            bytes_read: 0,
            errors: DeferredErrorList::new(),
            cancelled: false,
        }
    }

    /// A fresh archive holding `sources`.
    pub fn create(sources: Vec<UpdateItem>, options: UpdateOptions) -> Self {
        let slots = (0..sources.len()).map(Slot::New).collect();
        Self::new(&[], slots, sources, options)
    }

    /// `existing` copied unchanged, followed by `sources`.
    pub fn append(
        existing: &'s [ArchiveItem],
        sources: Vec<UpdateItem>,
        options: UpdateOptions,
    ) -> Self {
        let slots = (0..existing.len() as u32)
            .map(Slot::Keep)
            .chain((0..sources.len()).map(Slot::New))
            .collect();
        Self::new(existing, slots, sources, options)
    }

    /// Rename or delete items of `existing` without touching their data.
    pub fn modify(
        existing: &'s [ArchiveItem],
        renames: &BTreeMap<u32, Option<String>>,
        options: UpdateOptions,
    ) -> Self {
        let slots = modify_plan(existing.len() as u32, renames);
        Self::new(existing, slots, Vec::new(), options)
    }

    pub fn with_mode(
        existing: &'s [ArchiveItem],
        mode: &UpdateMode,
        sources: Vec<UpdateItem>,
        options: UpdateOptions,
    ) -> Self {
        match mode {
            UpdateMode::Create => Self::create(sources, options),
            UpdateMode::Append { existing: count } => {
                let count = (*count as usize).min(existing.len());
                Self::append(&existing[..count], sources, options)
            }
            UpdateMode::Modify { renames } => Self::modify(existing, renames, options),
        }
    }

    /// Number of items in the output archive.
    pub fn item_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn progress(&self) -> &Arc<ProgressAccumulator> {
        &self.progress
    }

    /// Total bytes of new content, for progress before the engine reports
    /// its own total.
    pub fn new_bytes(&self) -> u64 {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::New(source) => self.sources.get(*source).map(|s| s.props.size),
                _ => None,
            })
            .sum()
    }

    /// Release every source stream and hand over the report.
    pub fn finish(mut self) -> UpdateReport {
        if let Some(current) = self.current.take() {
            self.release(current.source, current.adapter);
        }
        for (source, adapter) in std::mem::take(&mut self.disposal) {
            self.release(source, adapter);
        }
        if let Some(observer) = &self.options.observer {
            observer.on_finished();
        }

        let streams = self
            .sources
            .iter_mut()
            .filter_map(|source| match &mut source.content {
                Content::Stream(stream) => stream.take(),
                _ => None,
            })
            .collect();

        UpdateReport {
            items_written: self.done,
            bytes_read: self.bytes_read,
            errors: std::mem::take(&mut self.errors),
            cancelled: self.cancelled,
            streams,
        }
    }

    /// Close an adapter and put a caller stream back in its slot.
    fn release(&mut self, source: usize, mut adapter: InStreamAdapter<Box<dyn InStream>>) {
        self.bytes_read += adapter.bytes_read();
        adapter.close();
        if let Some(stream) = adapter.into_inner() {
            if let Some(Source {
                content: Content::Stream(slot),
                ..
            }) = self.sources.get_mut(source)
            {
                *slot = Some(stream);
            }
        }
    }

    fn slot(&mut self, index: u32) -> std::result::Result<&Slot, Status> {
        match self.slots.get(index as usize) {
            Some(slot) => Ok(slot),
            None => {
                self.errors.record(
                    DeferredErrorKind::Property,
                    Some(index),
                    "engine asked for an unknown output item",
                );
                Err(Status::INVALID_ARG)
            }
        }
    }

    fn abort_or_ok(&self) -> Status {
        if self.cancelled { Status::ABORT } else { Status::OK }
    }
}

impl ArchiveUpdateCallback for UpdateCallback<'_> {
    fn set_total(&mut self, total: u64) -> Status {
        self.progress.set_total(total);
        if let Some(observer) = &self.options.observer {
            observer.on_open(total);
        }
        self.abort_or_ok()
    }

    fn set_completed(&mut self, _completed: u64) -> Status {
        self.abort_or_ok()
    }

    fn update_item_info(&mut self, index: u32) -> std::result::Result<UpdateItemInfo, Status> {
        if self.cancelled {
            return Err(Status::ABORT);
        }
        let info = match self.slot(index)? {
            Slot::New(_) => UpdateItemInfo {
                new_data: true,
                new_properties: true,
                index_in_archive: NO_INDEX,
            },
            Slot::Keep(existing) => UpdateItemInfo {
                new_data: false,
                new_properties: false,
                index_in_archive: *existing,
            },
            Slot::Rename { index: existing, .. } => UpdateItemInfo {
                new_data: false,
                new_properties: true,
                index_in_archive: *existing,
            },
        };
        Ok(info)
    }

    fn property(&mut self, index: u32, prop: PropId) -> std::result::Result<PropValue, Status> {
        if let PropId::Other(id) = prop {
            tracing::debug!(index, id, "unmodelled property requested");
            return Ok(PropValue::Empty);
        }

        let Some(slot) = self.slots.get(index as usize) else {
            self.errors.record(
                DeferredErrorKind::Property,
                Some(index),
                format!("{prop:?} requested for an unknown output item"),
            );
            return Ok(PropValue::Empty);
        };

        let value = match slot {
            Slot::New(source) => self.sources.get(*source).map(|s| s.props.answer(prop)),
            Slot::Keep(existing) => self
                .existing
                .get(*existing as usize)
                .map(|item| item.property(prop)),
            Slot::Rename { index: existing, name } => match prop {
                PropId::Path => Some(PropValue::Str(name.clone())),
                _ => self.existing.get(*existing as usize).map(|item| item.property(prop)),
            },
        };

        match value {
            Some(value) => Ok(value),
            None => {
                self.errors.record(
                    DeferredErrorKind::Property,
                    Some(index),
                    format!("no source item answers {prop:?}"),
                );
                Ok(PropValue::Empty)
            }
        }
    }

    fn get_stream(&mut self, index: u32) -> std::result::Result<Option<&mut dyn InStream>, Status> {
        if self.cancelled {
            return Err(Status::ABORT);
        }
        if let Some(current) = self.current.take() {
            tracing::debug!(index = current.output, "source left without a result");
            self.release(current.source, current.adapter);
        }
        self.last_index = Some(index);

        let source_index = match self.slot(index)? {
            Slot::New(source) => *source,
            _ => return Ok(None),
        };
        let Some(source) = self.sources.get_mut(source_index) else {
            self.errors.record(DeferredErrorKind::Io, Some(index), "source item missing");
            return Err(Status::FAIL);
        };

        let (reader, caller_owned): (Box<dyn InStream>, bool) = match &mut source.content {
            Content::Empty => return Ok(None),
            Content::File(path) => match File::open(&*path) {
                Ok(file) => (Box::new(file), false),
                Err(e) => {
                    let message = format!("cannot open '{}': {e}", path.display());
                    tracing::warn!(index, %message, "source unavailable");
                    self.errors.record(DeferredErrorKind::Io, Some(index), message);
                    return Err(Status::FAIL);
                }
            },
            Content::Stream(stream) => match stream.take() {
                Some(stream) => (stream, true),
                None => {
                    self.errors.record(
                        DeferredErrorKind::Io,
                        Some(index),
                        "source stream already consumed",
                    );
                    return Err(Status::FAIL);
                }
            },
        };
        self.done += 1;

        if !self.options.fast_mode {
            if let Some(observer) = &self.options.observer {
                let path = Path::new(&*self.sources[source_index].props.path);
                let flow = observer.on_item_started(&ItemStarted {
                    index,
                    path,
                    done: self.done,
                    total: self.new_total,
                });
                if flow == Flow::Cancel {
                    tracing::debug!(index, "update cancelled");
                    self.cancelled = true;
                    let adapter = InStreamAdapter::new(reader).leave_open(caller_owned);
                    self.release(source_index, adapter);
                    return Err(Status::ABORT);
                }
            }
        }

        let adapter = InStreamAdapter::new(reader)
            .progress(self.progress.clone())
            .leave_open(caller_owned);
        let current = self.current.insert(Current {
            output: index,
            source: source_index,
            adapter,
        });
        Ok(Some(&mut current.adapter))
    }

    fn set_operation_result(&mut self, result: OperationResult) -> Status {
        let current = self.current.take();
        let index = current.as_ref().map(|c| c.output).or(self.last_index);

        if let Some(Current { output, source, adapter }) = current {
            let bytes = adapter.bytes_read();
            if self.options.defer_disposal {
                self.disposal.push((source, adapter));
            } else {
                self.release(source, adapter);
            }

            if result == OperationResult::Ok && !self.options.fast_mode {
                if let Some(observer) = &self.options.observer {
                    let path = Path::new(&*self.sources[source].props.path);
                    observer.on_item_finished(&ItemFinished {
                        index: output,
                        path: Some(path),
                        bytes,
                    });
                }
            }
        }

        if let Some(kind) = DeferredErrorKind::from_result(result) {
            self.errors
                .record(kind, index, format!("engine reported {result:?}"));
        }
        self.abort_or_ok()
    }

    fn password(&mut self) -> std::result::Result<Option<String>, Status> {
        Ok(self.options.password.clone())
    }
}
