//! The two interchangeable ways of pointing a stream at a backing file.
//!
//! Descriptor duplication aliases the stream's descriptor number to the
//! backing file, so writes that bypass any user-space buffering (child
//! processes, native code) are captured as well. Writer substitution swaps
//! the stream's writer object for a duplicate handle of the backing file;
//! it is only used when the stream has no descriptor that can be
//! duplicated. The strategy is chosen once, when a session is opened.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};

use super::error::CaptureError;
use super::stream::{LogicalStream, SharedSink, SinkWriter};

/// How a session redirects its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectStrategy {
    /// The stream's descriptor is re-pointed with `dup2`.
    DescriptorDuplication,
    /// The stream's writer object is swapped for a backing file handle.
    WriterSubstitution,
}

#[derive(Debug)]
pub(crate) enum Redirection {
    Descriptor(DescriptorSwap),
    Substitution(WriterSwap),
}

impl Redirection {
    /// Chooses a strategy for `stream`, saving its current destination.
    pub(crate) fn select(stream: &LogicalStream) -> Result<Self, CaptureError> {
        let duplicated = stream.raw_fd().map(DescriptorSwap::save);
        match (duplicated, stream) {
            (Some(Ok(swap)), _) => Ok(Self::Descriptor(swap)),
            (duplicated, LogicalStream::Sink(sink)) => {
                if let Some(Err(error)) = duplicated {
                    tracing::debug!("sink descriptor cannot be duplicated ({error}); substituting");
                }
                Ok(Self::Substitution(WriterSwap::new(sink.clone())))
            }
            (Some(Err(error)), _) => Err(error),
            (None, _) => Err(CaptureError::UnsupportedPlatform),
        }
    }

    pub(crate) const fn strategy(&self) -> RedirectStrategy {
        match self {
            Self::Descriptor(_) => RedirectStrategy::DescriptorDuplication,
            Self::Substitution(_) => RedirectStrategy::WriterSubstitution,
        }
    }

    /// Sends the stream's output to `backing`.
    pub(crate) fn engage(&mut self, backing: &File) -> Result<(), CaptureError> {
        match self {
            Self::Descriptor(swap) => swap.point_at(backing.as_raw_fd()),
            Self::Substitution(swap) => swap.install(backing),
        }
    }

    /// Sends the stream's output back to where it went before `engage`.
    pub(crate) fn restore(&mut self) -> Result<(), CaptureError> {
        match self {
            Self::Descriptor(swap) => swap.point_at(swap.saved.as_raw_fd()),
            Self::Substitution(swap) => swap.uninstall(),
        }
    }
}

/// Saved copy of a stream's original descriptor.
#[derive(Debug)]
pub(crate) struct DescriptorSwap {
    target: RawFd,
    saved: OwnedFd,
}

impl DescriptorSwap {
    fn save(target: RawFd) -> Result<Self, CaptureError> {
        // SAFETY: the descriptor is only borrowed for the duration of the
        // duplication call; the caller guarantees it is open.
        let borrowed = unsafe { BorrowedFd::borrow_raw(target) };
        let saved = borrowed
            .try_clone_to_owned()
            .map_err(|error| CaptureError::io("failed to duplicate stream descriptor", &error))?;
        Ok(Self { target, saved })
    }

    fn point_at(&self, source: RawFd) -> Result<(), CaptureError> {
        loop {
            // SAFETY: both descriptors are open; dup2 atomically closes and
            // replaces `target`, which the process keeps using by number.
            let result = unsafe { libc::dup2(source, self.target) };
            if result >= 0 {
                return Ok(());
            }
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(CaptureError::io("failed to redirect stream descriptor", &error));
            }
        }
    }
}

/// Writer displaced from a [`SharedSink`] while a capture handle is installed.
pub(crate) struct WriterSwap {
    sink: SharedSink,
    displaced: Option<Box<dyn SinkWriter>>,
}

impl WriterSwap {
    const fn new(sink: SharedSink) -> Self {
        Self {
            sink,
            displaced: None,
        }
    }

    fn install(&mut self, backing: &File) -> Result<(), CaptureError> {
        let handle = backing
            .try_clone()
            .map_err(|error| CaptureError::io("failed to duplicate backing file", &error))?;
        self.displaced = Some(self.sink.replace(Box::new(handle)));
        Ok(())
    }

    fn uninstall(&mut self) -> Result<(), CaptureError> {
        let Some(previous) = self.displaced.take() else {
            return Ok(());
        };
        let mut handle = self.sink.replace(previous);
        handle
            .flush()
            .map_err(|error| CaptureError::io("failed to flush capture handle", &error))
    }
}

impl std::fmt::Debug for WriterSwap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterSwap")
            .field("sink", &self.sink)
            .field("installed", &self.displaced.is_some())
            .finish()
    }
}
