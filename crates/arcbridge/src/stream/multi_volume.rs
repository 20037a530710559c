//! Split archives: volumes `name.001` to `name.999` form one logical stream.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::engine::OutStream;
use crate::{Error, Result};

/// Highest volume number the three-digit suffix can express.
pub const MAX_VOLUMES: u32 = 999;

/// Path of volume `number` (1-based) of `base`: `base.001`, `base.002`, ...
pub fn volume_path(base: impl AsRef<Path>, number: u32) -> Result<PathBuf> {
    let base = base.as_ref();
    if number == 0 || number > MAX_VOLUMES {
        return Err(Error::VolumeCapacity {
            base: base.to_path_buf(),
            number,
        });
    }
    let mut name = OsString::from(base.as_os_str());
    name.push(format!(".{number:03}"));
    Ok(PathBuf::from(name))
}

/// Logical offsets covered by each volume.
///
/// Ranges are contiguous: each volume starts where the previous one ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeMap {
    starts: Vec<u64>,
    total: u64,
}

impl VolumeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, len: u64) {
        self.starts.push(self.total);
        self.total += len;
    }

    /// Half-open logical range of volume `index`.
    pub fn bounds(&self, index: usize) -> Option<Range<u64>> {
        let start = *self.starts.get(index)?;
        let end = self.starts.get(index + 1).copied().unwrap_or(self.total);
        Some(start..end)
    }

    /// Volume holding logical `offset`, with its range.
    pub fn locate(&self, offset: u64) -> Option<(usize, Range<u64>)> {
        if offset >= self.total {
            return None;
        }
        let index = self.starts.partition_point(|&start| start <= offset) - 1;
        Some((index, self.bounds(index)?))
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn total_len(&self) -> u64 {
        self.total
    }
}

/// Reads a sequence of volumes as one seekable stream.
pub struct MultiVolumeReader<S = File> {
    volumes: Vec<S>,
    map: VolumeMap,
    position: u64,
    /// Volume whose cursor sits at `position`.
    synced: Option<usize>,
}

impl MultiVolumeReader<File> {
    /// Open `first` and every contiguous sibling volume after it.
    ///
    /// A path ending in `.001` starts discovery; any other path is read as
    /// a single volume.
    pub fn open(first: impl AsRef<Path>) -> Result<Self> {
        let first = first.as_ref();
        let mut reader = Self::from_volumes(Vec::new())?;
        reader.push_volume(open_volume(first)?)?;

        if first.extension().is_some_and(|ext| ext == "001") {
            let base = first.with_extension("");
            for number in 2..=MAX_VOLUMES {
                let path = volume_path(&base, number)?;
                if !path.is_file() {
                    break;
                }
                reader.push_volume(open_volume(&path)?)?;
            }
        }

        tracing::debug!(
            first = %first.display(),
            volumes = reader.map.len(),
            bytes = reader.map.total_len(),
            "opened volumes"
        );
        Ok(reader)
    }
}

fn open_volume(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::VolumeMissing(path.to_path_buf()),
        _ => Error::Io(e),
    })
}

impl<S: Read + Seek> MultiVolumeReader<S> {
    pub fn from_volumes(volumes: Vec<S>) -> Result<Self> {
        let mut reader = Self {
            volumes: Vec::with_capacity(volumes.len()),
            map: VolumeMap::new(),
            position: 0,
            synced: None,
        };
        for volume in volumes {
            reader.push_volume(volume)?;
        }
        Ok(reader)
    }

    /// Append a volume; its length is measured by seeking to the end.
    pub fn push_volume(&mut self, mut volume: S) -> Result<()> {
        let len = volume.seek(SeekFrom::End(0))?;
        self.volumes.push(volume);
        self.map.push(len);
        self.synced = None;
        Ok(())
    }

    pub fn volume_map(&self) -> &VolumeMap {
        &self.map
    }

    pub fn len(&self) -> u64 {
        self.map.total_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Read + Seek> Read for MultiVolumeReader<S> {
    /// Fills `buf` across volume boundaries; returns short only at the end
    /// of the last volume.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let Some((index, range)) = self.map.locate(self.position) else {
                break;
            };
            let volume = &mut self.volumes[index];
            if self.synced != Some(index) {
                volume.seek(SeekFrom::Start(self.position - range.start))?;
                self.synced = Some(index);
            }

            let remaining = (range.end - self.position).min((buf.len() - filled) as u64) as usize;
            let n = volume.read(&mut buf[filled..filled + remaining])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("volume {} ended before its recorded length", index + 1),
                ));
            }
            filled += n;
            self.position += n as u64;

            if self.position == range.end {
                tracing::trace!(volume = index + 1, "volume exhausted");
                self.synced = None;
            }
        }
        Ok(filled)
    }
}

impl<S: Read + Seek> Seek for MultiVolumeReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.map.total_len().checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream"))?;

        if target != self.position {
            self.synced = None;
        }
        self.position = target;
        Ok(target)
    }
}

/// Writes one logical stream into volumes of a fixed size.
///
/// Each volume is created when the first byte for it arrives and is
/// pre-extended to the full budget. [`MultiVolumeWriter::finish`] drops
/// volumes past the logical end and truncates the last one.
pub struct MultiVolumeWriter {
    base: PathBuf,
    volume_size: u64,
    volumes: Vec<File>,
    paths: Vec<PathBuf>,
    map: VolumeMap,
    position: u64,
    len: u64,
    finished: bool,
    /// Failure hit after part of a buffer was accepted, reported by the
    /// next write.
    pending_error: Option<io::Error>,
}

impl MultiVolumeWriter {
    /// Create `base.001` and prepare to write volumes of `volume_size` bytes.
    pub fn create(base: impl Into<PathBuf>, volume_size: u64) -> Result<Self> {
        if volume_size == 0 {
            return Err(Error::ZeroVolumeSize);
        }
        let mut writer = Self {
            base: base.into(),
            volume_size,
            volumes: Vec::new(),
            paths: Vec::new(),
            map: VolumeMap::new(),
            position: 0,
            len: 0,
            finished: false,
            pending_error: None,
        };
        writer.ensure_volume(0)?;
        Ok(writer)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn volume_map(&self) -> &VolumeMap {
        &self.map
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn ensure_volume(&mut self, index: usize) -> Result<()> {
        while self.volumes.len() <= index {
            let number = u32::try_from(self.volumes.len() + 1).unwrap_or(u32::MAX);
            let path = volume_path(&self.base, number)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.set_len(self.volume_size)?;
            tracing::trace!(path = %path.display(), "created volume");

            self.volumes.push(file);
            self.paths.push(path);
            self.map.push(self.volume_size);
        }
        Ok(())
    }

    /// Number of volumes the logical length needs; at least one.
    fn needed_volumes(&self) -> usize {
        self.len.div_ceil(self.volume_size).max(1) as usize
    }

    /// Remove surplus volumes and truncate the last one. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let needed = self.needed_volumes();
        self.ensure_volume(needed - 1)?;
        for path in self.paths.drain(needed..) {
            if !arcbridge_fs::remove_file_quiet(&path) {
                tracing::warn!(path = %path.display(), "failed to remove surplus volume");
            }
        }
        self.volumes.truncate(needed);

        let last_len = self.len - (needed as u64 - 1) * self.volume_size;
        if let Some(last) = self.volumes.last_mut() {
            last.flush()?;
            last.set_len(last_len)?;
        }
        self.map = VolumeMap::new();
        for index in 0..needed {
            self.map.push(if index + 1 == needed { last_len } else { self.volume_size });
        }
        Ok(())
    }
}

impl MultiVolumeWriter {
    /// Write the part of `buf` that fits in the current volume.
    fn write_chunk(&mut self, buf: &[u8]) -> io::Result<usize> {
        let index = (self.position / self.volume_size) as usize;
        self.ensure_volume(index)?;
        let range = self
            .map
            .bounds(index)
            .ok_or_else(|| io::Error::other("volume map out of sync"))?;

        let offset = self.position - range.start;
        let chunk = (range.end - self.position).min(buf.len() as u64) as usize;
        let volume = &mut self.volumes[index];
        volume.seek(SeekFrom::Start(offset))?;
        volume.write_all(&buf[..chunk])?;

        self.position += chunk as u64;
        self.len = self.len.max(self.position);
        Ok(chunk)
    }
}

impl Write for MultiVolumeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::other("multi-volume writer is finished"));
        }
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }

        let mut written = 0;
        while written < buf.len() {
            match self.write_chunk(&buf[written..]) {
                Ok(chunk) => written += chunk,
                Err(e) if written > 0 => {
                    self.pending_error = Some(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.volumes.iter_mut().try_for_each(|v| v.flush())
    }
}

impl Seek for MultiVolumeWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream"))?;
        Ok(self.position)
    }
}

impl OutStream for MultiVolumeWriter {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        if len > 0 {
            self.ensure_volume(((len - 1) / self.volume_size) as usize)?;
        }
        self.len = len;
        Ok(())
    }
}

impl Drop for MultiVolumeWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(base = %self.base.display(), error = %e, "finishing volumes failed");
        }
    }
}
