use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use arcbridge_fs::FileStamp;

use crate::engine::OutStream;
use crate::hash::{ContentHasher, HashStrategy};
use crate::progress::ProgressAccumulator;

fn closed_error() -> io::Error {
    io::Error::other("stream adapter is closed")
}

/// Read side adapter: forwards reads and counts the bytes that pass.
pub struct InStreamAdapter<R> {
    inner: Option<R>,
    progress: Option<Arc<ProgressAccumulator>>,
    bytes: u64,
    leave_open: bool,
}

impl<R: Read + Seek> InStreamAdapter<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Some(inner),
            progress: None,
            bytes: 0,
            leave_open: false,
        }
    }

    pub fn progress(mut self, progress: Arc<ProgressAccumulator>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Keep the inner stream on close so the owner can take it back with
    /// [`InStreamAdapter::into_inner`].
    pub fn leave_open(mut self, leave_open: bool) -> Self {
        self.leave_open = leave_open;
        self
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Release the inner stream. Calling it again is a no-op.
    pub fn close(&mut self) {
        if !self.leave_open {
            self.inner = None;
        }
    }

    pub fn into_inner(mut self) -> Option<R> {
        self.inner.take()
    }
}

impl<R: Read> Read for InStreamAdapter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = self.inner.as_mut().ok_or_else(closed_error)?;
        let n = inner.read(buf)?;
        if n > 0 {
            self.bytes += n as u64;
            if let Some(progress) = &self.progress {
                progress.advance(n as u64);
            }
        }
        Ok(n)
    }
}

impl<R: Seek> Seek for InStreamAdapter<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.as_mut().ok_or_else(closed_error)?.seek(pos)
    }
}

type SeekBackHook = Box<dyn FnMut(u64) + Send>;

/// Write side adapter.
///
/// Every write is forwarded whole and counted. On close the inner stream is
/// flushed and released, then the recorded timestamps and attributes are
/// stamped onto the target path, since writing through the handle would
/// otherwise leave the time of extraction behind.
pub struct OutStreamAdapter<W: OutStream> {
    inner: Option<W>,
    progress: Option<Arc<ProgressAccumulator>>,
    stamp: Option<FileStamp>,
    hasher: Option<ContentHasher>,
    digest: Option<String>,
    on_seek_back: Option<SeekBackHook>,
    position: u64,
    bytes: u64,
    leave_open: bool,
    closed: bool,
}

impl<W: OutStream> OutStreamAdapter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Some(inner),
            progress: None,
            stamp: None,
            hasher: None,
            digest: None,
            on_seek_back: None,
            position: 0,
            bytes: 0,
            leave_open: false,
            closed: false,
        }
    }

    pub fn progress(mut self, progress: Arc<ProgressAccumulator>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stamp applied to the target path after close.
    pub fn stamp(mut self, stamp: FileStamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    pub fn hash(mut self, strategy: HashStrategy) -> Self {
        self.hasher = strategy.hasher();
        self
    }

    /// Called with the new position whenever a seek moves backwards.
    pub fn on_seek_back(mut self, hook: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_seek_back = Some(Box::new(hook));
        self
    }

    pub fn leave_open(mut self, leave_open: bool) -> Self {
        self.leave_open = leave_open;
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Digest of the written content, available after close. Absent when
    /// hashing is off or the content was not written sequentially.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flush, release and stamp. Idempotent.
    ///
    /// A target that vanished before stamping is not an error.
    pub fn close(&mut self) -> crate::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let flushed = match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        };
        if !self.leave_open {
            self.inner = None;
        }
        if let Some(hasher) = self.hasher.take() {
            self.digest = Some(hasher.finalize());
        }
        flushed?;

        if let Some(stamp) = &self.stamp {
            match stamp.apply() {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(path = %stamp.path().display(), "target gone before stamping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn into_inner(mut self) -> Option<W> {
        self.inner.take()
    }

    fn inner_mut(&mut self) -> io::Result<&mut W> {
        if self.closed {
            return Err(closed_error());
        }
        self.inner.as_mut().ok_or_else(closed_error)
    }
}

impl<W: OutStream> Write for OutStreamAdapter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner_mut()?.write_all(buf)?;

        let len = buf.len() as u64;
        self.position += len;
        self.bytes += len;
        if let Some(hasher) = &mut self.hasher {
            hasher.update(buf);
        }
        if let Some(progress) = &self.progress {
            progress.advance(len);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner_mut()?.flush()
    }
}

impl<W: OutStream> Seek for OutStreamAdapter<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new = self.inner_mut()?.seek(pos)?;
        if new < self.position {
            // Rewritten content no longer matches a sequential digest.
            self.hasher = None;
            if let Some(hook) = &mut self.on_seek_back {
                hook(new);
            }
        }
        self.position = new;
        Ok(new)
    }
}

impl<W: OutStream> OutStream for OutStreamAdapter<W> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.inner_mut()?.set_len(len)
    }
}

impl<W: OutStream> Drop for OutStreamAdapter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "closing output stream failed");
        }
    }
}
