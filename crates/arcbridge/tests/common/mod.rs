//! In-memory store engine used to drive the callbacks.
//!
//! The container is deliberately trivial: a header listing every item
//! followed by the raw bytes of each, with an FNV checksum per item.
//!
//! ```text
//! "ARST" | version u8 | flags u8 (bit 0: solid) | count u32
//! per item: path_len u16 | path | is_dir u8 | attributes u32
//!           | modified secs u64 (0: none) | size u64 | checksum u32
//! data of item 0 | data of item 1 | ...
//! ```

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use arcbridge::engine::{
    ArchiveEngine, ArchiveExtractCallback, ArchiveOpenCallback, ArchiveUpdateCallback, AskMode,
    InStream, NO_INDEX, OperationResult, OutStream, PropId, PropValue, Status, UpdateEngine,
};
use arcbridge::{
    Flow, ItemFinished, ItemStarted, OverwriteConflict, OverwriteDecision, ProgressEvent,
    TransferObserver,
};

const MAGIC: &[u8; 4] = b"ARST";
const VERSION: u8 = 1;
const FLAG_SOLID: u8 = 1;

pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0x811c_9dc5_u32, |h, b| (h ^ u32::from(*b)).wrapping_mul(0x0100_0193))
}

/// Item description used to build test archives.
#[derive(Clone, Debug, Default)]
pub struct Entry {
    pub path: String,
    pub data: Vec<u8>,
    pub is_dir: bool,
    pub attributes: u32,
    pub modified: Option<SystemTime>,
}

impl Entry {
    pub fn file(path: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.to_owned(),
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn dir(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            is_dir: true,
            attributes: 0x10,
            ..Self::default()
        }
    }

    pub fn modified(mut self, time: SystemTime) -> Self {
        self.modified = Some(time);
        self
    }
}

fn write_container<W: Write + ?Sized>(
    out: &mut W,
    entries: &[Entry],
    solid: bool,
) -> io::Result<()> {
    out.write_all(MAGIC)?;
    out.write_all(&[VERSION, if solid { FLAG_SOLID } else { 0 }])?;
    out.write_all(&(entries.len() as u32).to_le_bytes())?;
    for entry in entries {
        let path = entry.path.as_bytes();
        out.write_all(&(path.len() as u16).to_le_bytes())?;
        out.write_all(path)?;
        out.write_all(&[u8::from(entry.is_dir)])?;
        out.write_all(&entry.attributes.to_le_bytes())?;
        let secs = entry
            .modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        out.write_all(&secs.to_le_bytes())?;
        out.write_all(&(entry.data.len() as u64).to_le_bytes())?;
        out.write_all(&checksum(&entry.data).to_le_bytes())?;
    }
    for entry in entries {
        out.write_all(&entry.data)?;
    }
    Ok(())
}

/// Serialized archive holding `entries`.
pub fn build_archive(entries: &[Entry], solid: bool) -> Vec<u8> {
    let mut out = Vec::new();
    write_container(&mut out, entries, solid).unwrap();
    out
}

#[derive(Clone, Debug)]
struct StoredItem {
    path: String,
    is_dir: bool,
    attributes: u32,
    modified: Option<SystemTime>,
    size: u64,
    checksum: u32,
    offset: u64,
}

fn read_u8<R: Read + ?Sized>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u16<R: Read + ?Sized>(r: &mut R) -> io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32<R: Read + ?Sized>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read + ?Sized>(r: &mut R) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

/// Store engine: no compression, one item after the other.
pub struct StoreEngine {
    stream: Option<Box<dyn InStream>>,
    items: Vec<StoredItem>,
    data_offset: u64,
    solid: bool,
    /// Write output archives as solid.
    pub write_solid: bool,
    /// Items reported with a CRC error.
    pub corrupt: BTreeSet<u32>,
    /// Bytes per write call into output streams.
    pub chunk: usize,
    /// Index lists passed to `extract`.
    pub extract_calls: Vec<Option<Vec<u32>>>,
    /// Every `get_stream` request during extraction.
    pub requested: Vec<(u32, AskMode)>,
    /// Source streams pulled during update.
    pub update_streams: Vec<u32>,
    pub closed: bool,
    /// Ask the open callback for a passphrase.
    pub ask_password: bool,
    /// Passphrase the open callback answered.
    pub open_password: Option<String>,
    /// Passphrase the update callback answered.
    pub update_password: Option<String>,
}

impl Default for StoreEngine {
    fn default() -> Self {
        Self {
            stream: None,
            items: Vec::new(),
            data_offset: 0,
            solid: false,
            write_solid: false,
            corrupt: BTreeSet::new(),
            chunk: 3,
            extract_calls: Vec::new(),
            requested: Vec::new(),
            update_streams: Vec::new(),
            closed: false,
            ask_password: false,
            open_password: None,
            update_password: None,
        }
    }
}

impl StoreEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn corrupt(mut self, index: u32) -> Self {
        self.corrupt.insert(index);
        self
    }

    pub fn asking_password(mut self) -> Self {
        self.ask_password = true;
        self
    }

    fn read_header<S: InStream + ?Sized>(&mut self, stream: &mut S) -> io::Result<()> {
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic)?;
        if &magic != MAGIC || read_u8(stream)? != VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a store archive"));
        }
        self.solid = read_u8(stream)? & FLAG_SOLID != 0;

        let count = read_u32(stream)?;
        let mut offset = 0;
        self.items.clear();
        for _ in 0..count {
            let len = read_u16(stream)? as usize;
            let mut path = vec![0u8; len];
            stream.read_exact(&mut path)?;
            let is_dir = read_u8(stream)? != 0;
            let attributes = read_u32(stream)?;
            let secs = read_u64(stream)?;
            let size = read_u64(stream)?;
            let checksum = read_u32(stream)?;
            let path = String::from_utf8(path)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.items.push(StoredItem {
                path,
                is_dir,
                attributes,
                modified: (secs != 0).then(|| UNIX_EPOCH + Duration::from_secs(secs)),
                size,
                checksum,
                offset,
            });
            offset += size;
        }
        self.data_offset = stream.stream_position()?;
        Ok(())
    }

    fn read_item(&mut self, index: u32) -> io::Result<Vec<u8>> {
        let item = self
            .items
            .get(index as usize)
            .ok_or_else(|| io::Error::other("no such item"))?;
        let (offset, size) = (self.data_offset + item.offset, item.size);
        let stream = self.stream.as_mut().ok_or_else(|| io::Error::other("not open"))?;
        stream.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; size as usize];
        stream.read_exact(&mut data)?;
        Ok(data)
    }
}

impl ArchiveEngine for StoreEngine {
    fn open(
        &mut self,
        mut stream: Box<dyn InStream>,
        callback: &mut dyn ArchiveOpenCallback,
    ) -> Status {
        if self.read_header(stream.as_mut()).is_err() {
            return Status::FAIL;
        }
        if self.ask_password {
            match callback.password() {
                Ok(password) => self.open_password = Some(password),
                Err(status) => return status,
            }
        }
        let status = callback.set_total(Some(self.items.len() as u64), None);
        if !status.is_success() {
            return status;
        }
        self.stream = Some(stream);
        self.closed = false;
        callback.set_completed(Some(self.items.len() as u64), None)
    }

    fn item_count(&self) -> Result<u32, Status> {
        Ok(self.items.len() as u32)
    }

    fn property(&self, index: u32, prop: PropId) -> Result<PropValue, Status> {
        let item = self.items.get(index as usize).ok_or(Status::INVALID_ARG)?;
        Ok(match prop {
            PropId::Path => PropValue::Str(item.path.clone()),
            PropId::IsDir => PropValue::Bool(item.is_dir),
            PropId::Size => PropValue::U64(item.size),
            PropId::PackedSize => PropValue::U64(item.size),
            PropId::Attributes => PropValue::U32(item.attributes),
            PropId::Modified => item.modified.map(PropValue::Time).unwrap_or_default(),
            PropId::Encrypted => PropValue::Bool(false),
            PropId::Crc => PropValue::U32(item.checksum),
            _ => PropValue::Empty,
        })
    }

    fn archive_property(&self, prop: PropId) -> Result<PropValue, Status> {
        Ok(match prop {
            PropId::Solid => PropValue::Bool(self.solid),
            _ => PropValue::Empty,
        })
    }

    fn extract(
        &mut self,
        indices: Option<&[u32]>,
        test_mode: bool,
        callback: &mut dyn ArchiveExtractCallback,
    ) -> Status {
        self.extract_calls.push(indices.map(<[u32]>::to_vec));
        let list: Vec<u32> = match indices {
            Some(list) => list.to_vec(),
            None => (0..self.items.len() as u32).collect(),
        };

        // A solid stream can only be decoded from its start.
        let contiguous = list.iter().enumerate().all(|(i, &index)| i as u32 == index);
        if self.solid && indices.is_some() && !contiguous {
            return Status::FAIL;
        }

        let total = list
            .iter()
            .filter_map(|&i| self.items.get(i as usize))
            .map(|item| item.size)
            .sum();
        let status = callback.set_total(total);
        if !status.is_success() {
            return status;
        }

        let mode = if test_mode { AskMode::Test } else { AskMode::Extract };
        let mut completed = 0;
        for index in list {
            let Ok(data) = self.read_item(index) else {
                return Status::FAIL;
            };
            self.requested.push((index, mode));

            match callback.get_stream(index, mode) {
                Err(status) => return status,
                Ok(Some(out)) => {
                    for chunk in data.chunks(self.chunk.max(1)) {
                        if out.write_all(chunk).is_err() {
                            return Status::FAIL;
                        }
                    }
                }
                Ok(None) => {}
            }

            let damaged = checksum(&data) != self.items[index as usize].checksum;
            let result = if self.corrupt.contains(&index) || damaged {
                OperationResult::CrcError
            } else {
                OperationResult::Ok
            };
            let status = callback.set_operation_result(result);
            if !status.is_success() {
                return status;
            }

            completed += data.len() as u64;
            let status = callback.set_completed(completed);
            if !status.is_success() {
                return status;
            }
        }
        Status::OK
    }

    fn close(&mut self) {
        self.stream = None;
        self.closed = true;
    }
}

impl UpdateEngine for StoreEngine {
    fn update_items(
        &mut self,
        out: &mut dyn OutStream,
        count: u32,
        callback: &mut dyn ArchiveUpdateCallback,
    ) -> Status {
        match callback.password() {
            Ok(password) => self.update_password = password,
            Err(status) => return status,
        }

        let mut infos = Vec::with_capacity(count as usize);
        let mut total = 0;
        for index in 0..count {
            let info = match callback.update_item_info(index) {
                Ok(info) => info,
                Err(status) => return status,
            };
            if info.new_data {
                total += callback
                    .property(index, PropId::Size)
                    .ok()
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
            }
            infos.push(info);
        }
        let status = callback.set_total(total);
        if !status.is_success() {
            return status;
        }

        let mut entries = Vec::with_capacity(infos.len());
        for (index, info) in (0..count).zip(infos) {
            let existing = (info.index_in_archive != NO_INDEX)
                .then(|| self.items.get(info.index_in_archive as usize).cloned())
                .flatten();

            let mut entry = match &existing {
                Some(item) => Entry {
                    path: item.path.clone(),
                    data: Vec::new(),
                    is_dir: item.is_dir,
                    attributes: item.attributes,
                    modified: item.modified,
                },
                None => Entry::default(),
            };

            if info.new_properties {
                let mut prop = |id| callback.property(index, id);
                entry.path = match prop(PropId::Path) {
                    Ok(v) => v.as_str().unwrap_or_default().to_owned(),
                    Err(status) => return status,
                };
                entry.is_dir = prop(PropId::IsDir)
                    .ok()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                entry.attributes = prop(PropId::Attributes)
                    .ok()
                    .and_then(|v| v.as_u32())
                    .unwrap_or(0);
                entry.modified = prop(PropId::Modified).ok().and_then(|v| v.as_time());
                if prop(PropId::IsAnti).ok().and_then(|v| v.as_bool()) == Some(true) {
                    continue;
                }
            }

            if info.new_data {
                self.update_streams.push(index);
                match callback.get_stream(index) {
                    Ok(Some(stream)) => {
                        if stream.read_to_end(&mut entry.data).is_err() {
                            callback.set_operation_result(OperationResult::DataError);
                            continue;
                        }
                    }
                    Ok(None) => {}
                    Err(status) if status.is_abort() => return status,
                    // The source could not be opened: leave it out.
                    Err(_) => continue,
                }
                let status = callback.set_operation_result(OperationResult::Ok);
                if !status.is_success() {
                    return status;
                }
            } else if existing.is_some() {
                match self.read_item(info.index_in_archive) {
                    Ok(data) => entry.data = data,
                    Err(_) => return Status::FAIL,
                }
            }
            entries.push(entry);
        }

        match write_container(out, &entries, self.write_solid) {
            Ok(()) => Status::OK,
            Err(_) => Status::FAIL,
        }
    }
}

/// Observer that records every event and answers from scripted values.
#[derive(Default)]
pub struct Recorder {
    pub opened: Mutex<Vec<u64>>,
    pub started: Mutex<Vec<(u32, u32, u32)>>,
    pub finished_items: Mutex<Vec<(u32, u64)>>,
    pub progress: Mutex<Vec<ProgressEvent>>,
    pub overwrites: Mutex<Vec<u32>>,
    pub finished: Mutex<u32>,
    pub overwrite_answer: Mutex<Option<OverwriteDecision>>,
    pub cancel_at: Mutex<Option<u32>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer_overwrite(self: &Arc<Self>, decision: OverwriteDecision) -> Arc<Self> {
        *self.overwrite_answer.lock() = Some(decision);
        self.clone()
    }

    pub fn cancel_at(self: &Arc<Self>, index: u32) -> Arc<Self> {
        *self.cancel_at.lock() = Some(index);
        self.clone()
    }
}

impl TransferObserver for Recorder {
    fn on_open(&self, total_bytes: u64) {
        self.opened.lock().push(total_bytes);
    }

    fn on_item_started(&self, item: &ItemStarted<'_>) -> Flow {
        self.started.lock().push((item.index, item.done, item.total));
        if *self.cancel_at.lock() == Some(item.index) {
            Flow::Cancel
        } else {
            Flow::Continue
        }
    }

    fn on_item_finished(&self, item: &ItemFinished<'_>) {
        self.finished_items.lock().push((item.index, item.bytes));
    }

    fn on_progress(&self, event: &ProgressEvent) {
        self.progress.lock().push(*event);
    }

    fn on_overwrite(&self, conflict: &OverwriteConflict<'_>) -> OverwriteDecision {
        self.overwrites.lock().push(conflict.index);
        self.overwrite_answer.lock().clone().unwrap_or_default()
    }

    fn on_finished(&self) {
        *self.finished.lock() += 1;
    }
}
