use std::io::{self, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::engine::OutStream;
use crate::progress::ProgressAccumulator;

/// Output stream that discards everything written to it.
///
/// Items that must be decoded but not kept (skipped, unselected or failed
/// targets, and the leading items of a solid run) are written here, so they
/// still count towards progress.
#[derive(Default)]
pub struct NullSink {
    progress: Option<Arc<ProgressAccumulator>>,
    position: u64,
    len: u64,
    bytes: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, progress: Arc<ProgressAccumulator>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl Write for NullSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len() as u64;
        self.position += len;
        self.len = self.len.max(self.position);
        self.bytes += len;
        if let Some(progress) = &self.progress {
            progress.advance(len);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for NullSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
        };
        self.position = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        Ok(self.position)
    }
}

impl OutStream for NullSink {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.len = len;
        Ok(())
    }
}
