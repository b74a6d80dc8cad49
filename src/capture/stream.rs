//! Logical output streams that a capture session can redirect.
//!
//! The standard streams are addressed by their well-known descriptor
//! numbers. A [`SharedSink`] stands in for a process-wide writer object
//! that may have been replaced by something without an OS descriptor, such
//! as an in-memory buffer; sessions on such sinks substitute the writer
//! object itself instead of duplicating descriptors.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A writer that can be installed in a [`SharedSink`].
pub trait SinkWriter: Write + Send {
    /// Returns the OS descriptor behind this writer, if it has one.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

impl SinkWriter for File {
    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

impl SinkWriter for Vec<u8> {}

impl SinkWriter for io::Sink {}

/// A process-wide writer slot whose current writer can be swapped out.
///
/// Cloning yields another handle to the same slot.
#[derive(Clone)]
pub struct SharedSink {
    slot: Arc<Mutex<Box<dyn SinkWriter>>>,
}

impl SharedSink {
    /// Creates a sink that initially writes to `writer`.
    #[must_use]
    pub fn new(writer: impl SinkWriter + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Installs `writer` and returns the previously installed writer.
    pub fn replace(&self, writer: Box<dyn SinkWriter>) -> Box<dyn SinkWriter> {
        std::mem::replace(&mut *self.lock(), writer)
    }

    /// Returns the descriptor of the currently installed writer, if any.
    #[must_use]
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.lock().raw_fd()
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn SinkWriter>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SharedSink {
    fn default() -> Self {
        Self::new(io::sink())
    }
}

impl fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSink")
            .field("raw_fd", &self.raw_fd())
            .finish_non_exhaustive()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

/// A cloneable in-memory writer; all clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Creates an empty in-memory writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns everything written so far, decoded lossily.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SinkWriter for MemorySink {}

/// Identifies the output channel a session redirects.
///
/// The channel itself belongs to the process; a session only changes where
/// it currently points.
#[derive(Debug, Clone)]
pub enum LogicalStream {
    /// The process's standard output.
    Stdout,
    /// The process's standard error.
    Stderr,
    /// A caller-owned descriptor that stays open for the session's lifetime.
    Descriptor(RawFd),
    /// A swappable writer object.
    Sink(SharedSink),
}

impl LogicalStream {
    /// Returns the descriptor currently behind this stream, if any.
    #[must_use]
    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            Self::Stdout => Some(libc::STDOUT_FILENO),
            Self::Stderr => Some(libc::STDERR_FILENO),
            Self::Descriptor(fd) => Some(*fd),
            Self::Sink(sink) => sink.raw_fd(),
        }
    }

    /// Pushes any bytes buffered above the descriptor layer.
    pub(crate) fn flush(&self) -> io::Result<()> {
        match self {
            Self::Stdout => io::stdout().flush(),
            Self::Stderr => io::stderr().flush(),
            Self::Descriptor(_) => Ok(()),
            Self::Sink(sink) => sink.lock().flush(),
        }
    }
}

impl fmt::Display for LogicalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
            Self::Descriptor(fd) => write!(f, "fd {fd}"),
            Self::Sink(_) => f.write_str("sink"),
        }
    }
}
