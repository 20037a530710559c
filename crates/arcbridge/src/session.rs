//! Drivers that open an archive through an engine and run one callback per
//! operation.

use std::path::{Path, PathBuf};

use crate::engine::{
    ArchiveEngine, ArchiveOpenCallback, InStream, OutStream, PropId, Status, UpdateEngine,
};
use crate::extract::{ExtractReport, ExtractionCallback};
use crate::item::{ArchiveItem, UpdateItem};
use crate::options::{ExtractOptions, UpdateOptions};
use crate::stream::MultiVolumeReader;
use crate::update::{UpdateCallback, UpdateMode, UpdateReport};
use crate::{Error, Result};

/// Indices a solid archive must decode to reach every requested index.
///
/// Items of a solid block share one compressed stream, so reaching item
/// `k` means decoding everything before it.
pub fn solid_run(requested: &[u32]) -> Vec<u32> {
    match requested.iter().max() {
        Some(&last) => (0..=last).collect(),
        None => Vec::new(),
    }
}

struct OpenCallback {
    password: Option<String>,
}

impl ArchiveOpenCallback for OpenCallback {
    fn set_total(&mut self, _files: Option<u64>, _bytes: Option<u64>) -> Status {
        Status::OK
    }

    fn set_completed(&mut self, _files: Option<u64>, _bytes: Option<u64>) -> Status {
        Status::OK
    }

    fn password(&mut self) -> std::result::Result<String, Status> {
        Ok(self.password.clone().unwrap_or_default())
    }
}

/// Map an engine status to the operation outcome. An abort the host asked
/// for is a normal end.
fn check(status: Status, cancelled: bool) -> Result<()> {
    if status.is_success() || (cancelled && status.is_abort()) {
        Ok(())
    } else {
        Err(Error::Engine(status))
    }
}

/// An archive opened through an engine, with its item snapshot.
pub struct ArchiveSession<E: ArchiveEngine> {
    engine: E,
    items: Vec<ArchiveItem>,
    solid: bool,
    archive_name: Option<String>,
}

impl<E: ArchiveEngine> ArchiveSession<E> {
    /// Open `stream` and read every item's properties.
    ///
    /// Failing to open or to enumerate items is fatal; the engine is closed
    /// before the error is returned.
    pub fn open(
        mut engine: E,
        stream: Box<dyn InStream>,
        password: Option<String>,
    ) -> Result<Self> {
        let mut callback = OpenCallback { password };
        let status = engine.open(stream, &mut callback);
        if !status.is_success() {
            engine.close();
            return Err(Error::Protocol {
                operation: "open the archive",
                status,
            });
        }

        let items = match Self::snapshot(&engine) {
            Ok(items) => items,
            Err(e) => {
                engine.close();
                return Err(e);
            }
        };
        let solid = engine
            .archive_property(PropId::Solid)
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        tracing::debug!(items = items.len(), solid, "archive opened");
        Ok(Self {
            engine,
            items,
            solid,
            archive_name: None,
        })
    }

    /// Open an archive file, following `.001` volumes.
    pub fn open_path(engine: E, path: impl AsRef<Path>, password: Option<String>) -> Result<Self> {
        let path = path.as_ref();
        let reader = MultiVolumeReader::open(path)?;
        let mut session = Self::open(engine, Box::new(reader), password)?;
        session.archive_name = archive_name(path);
        Ok(session)
    }

    fn snapshot(engine: &E) -> Result<Vec<ArchiveItem>> {
        let count = engine.item_count().map_err(|status| Error::Protocol {
            operation: "count items",
            status,
        })?;
        (0..count)
            .map(|index| ArchiveItem::from_engine(engine, index))
            .collect::<std::result::Result<Vec<_>, Status>>()
            .map_err(|status| Error::Protocol {
                operation: "read item properties",
                status,
            })
    }

    /// Name used for a single unnamed item.
    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.archive_name = Some(name.into());
        self
    }

    pub fn items(&self) -> &[ArchiveItem] {
        &self.items
    }

    pub fn is_solid(&self) -> bool {
        self.solid
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Indices handed to the engine for `requested`, sorted and unique.
    fn driven(&self, requested: &[u32]) -> Vec<u32> {
        if self.solid {
            return solid_run(requested);
        }
        let mut driven = requested.to_vec();
        driven.sort_unstable();
        driven.dedup();
        driven
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if (index as usize) < self.items.len() {
            Ok(())
        } else {
            Err(Error::Protocol {
                operation: "locate the requested item",
                status: Status::INVALID_ARG,
            })
        }
    }

    /// Extract `indices` (everything when `None`) below `dest`.
    pub fn extract_to_directory(
        &mut self,
        dest: impl Into<PathBuf>,
        indices: Option<&[u32]>,
        options: ExtractOptions,
    ) -> Result<ExtractReport> {
        let driven = indices.map(|requested| self.driven(requested));
        if let Some(requested) = indices {
            requested.iter().try_for_each(|&i| self.check_index(i))?;
        }

        let mut callback = ExtractionCallback::to_directory(&self.items, dest, options);
        if let Some(name) = &self.archive_name {
            callback = callback.archive_name(name.clone());
        }
        if let (Some(requested), Some(driven)) = (indices, &driven) {
            callback = callback
                .selection(requested.iter().copied())
                .expected_items(driven.len() as u32);
        }

        let status = self.engine.extract(driven.as_deref(), false, &mut callback);
        let report = callback.finish();
        check(status, report.cancelled)?;
        Ok(report)
    }

    /// Extract item `index` into `out`.
    pub fn extract_to_stream(
        &mut self,
        index: u32,
        out: &mut dyn OutStream,
        options: ExtractOptions,
    ) -> Result<ExtractReport> {
        self.check_index(index)?;
        let driven = self.driven(&[index]);

        let mut callback = ExtractionCallback::to_stream(&self.items, index, out, options)
            .expected_items(driven.len() as u32);
        let status = self.engine.extract(Some(&driven), false, &mut callback);
        let report = callback.finish();
        check(status, report.cancelled)?;
        Ok(report)
    }

    /// Decode `indices` (everything when `None`) without writing anything.
    pub fn test(
        &mut self,
        indices: Option<&[u32]>,
        options: ExtractOptions,
    ) -> Result<ExtractReport> {
        let driven = indices.map(|requested| self.driven(requested));

        let mut callback = ExtractionCallback::discarding(&self.items, options);
        let status = self.engine.extract(driven.as_deref(), true, &mut callback);
        let report = callback.finish();
        check(status, report.cancelled)?;
        Ok(report)
    }
}

impl<E: ArchiveEngine + UpdateEngine> ArchiveSession<E> {
    /// Write a new archive to `out`, derived from this one by `mode`.
    pub fn update(
        &mut self,
        out: &mut dyn OutStream,
        mode: &UpdateMode,
        sources: Vec<UpdateItem>,
        options: UpdateOptions,
    ) -> Result<UpdateReport> {
        let mut callback = UpdateCallback::with_mode(&self.items, mode, sources, options);
        let count = callback.item_count();
        let status = self.engine.update_items(out, count, &mut callback);
        let report = callback.finish();
        check(status, report.cancelled)?;
        Ok(report)
    }
}

impl<E: ArchiveEngine> Drop for ArchiveSession<E> {
    fn drop(&mut self) {
        self.engine.close();
    }
}

/// Write a fresh archive holding `sources` to `out`.
pub fn compress<E: UpdateEngine + ?Sized>(
    engine: &mut E,
    out: &mut dyn OutStream,
    sources: Vec<UpdateItem>,
    options: UpdateOptions,
) -> Result<UpdateReport> {
    let mut callback = UpdateCallback::create(sources, options);
    let count = callback.item_count();
    let status = engine.update_items(out, count, &mut callback);
    let report = callback.finish();
    check(status, report.cancelled)?;
    Ok(report)
}

/// File name of an archive path, without a volume suffix.
fn archive_name(path: &Path) -> Option<String> {
    let path = if path.extension().is_some_and(|ext| ext == "001") {
        path.with_extension("")
    } else {
        path.to_path_buf()
    };
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
