//! Capture session state machine.

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;

use camino::{Utf8Path, Utf8PathBuf};

use super::error::CaptureError;
use super::redirect::{RedirectStrategy, Redirection};
use super::stream::LogicalStream;
use crate::summary::{BoundedSummaryReader, Summary};

/// Observable state of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No backing file is open.
    Idle,
    /// Started, with the stream restored to its original destination.
    Paused,
    /// Started, with the stream writing into the backing file.
    Active,
}

#[derive(Debug)]
struct BackingFile {
    file: File,
    path: Utf8PathBuf,
}

/// Opens a capture session for `stream`.
///
/// The redirection strategy is fixed here: descriptor duplication when the
/// stream's descriptor can be duplicated, writer substitution otherwise.
///
/// # Errors
///
/// Returns [`CaptureError::UnsupportedPlatform`] when descriptors cannot be
/// duplicated at all and [`CaptureError::Io`] when saving the stream's
/// current destination fails.
pub fn open_session(
    stream: LogicalStream,
    line_limit: NonZeroUsize,
) -> Result<CaptureSession, CaptureError> {
    CaptureSession::open(stream, line_limit)
}

/// Redirects one logical stream into a sequence of backing files.
///
/// A session is reused across capture phases: each `start` ... `stop` (or
/// `abort`) cycle writes to a new backing file. Only one session may be
/// active on a given stream at a time; callers are responsible for that.
///
/// Dropping a started session aborts it.
#[derive(Debug)]
pub struct CaptureSession {
    stream: LogicalStream,
    redirection: Redirection,
    reader: BoundedSummaryReader,
    backing: Option<BackingFile>,
    active: bool,
}

impl CaptureSession {
    /// Opens a session; see [`open_session`].
    ///
    /// # Errors
    ///
    /// See [`open_session`].
    pub fn open(stream: LogicalStream, line_limit: NonZeroUsize) -> Result<Self, CaptureError> {
        let redirection = Redirection::select(&stream)?;
        tracing::debug!(
            "opened capture session for {stream} using {:?}",
            redirection.strategy()
        );
        Ok(Self {
            stream,
            redirection,
            reader: BoundedSummaryReader::new(line_limit),
            backing: None,
            active: false,
        })
    }

    /// Replaces the summary reader's chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: NonZeroUsize) -> Self {
        self.reader = BoundedSummaryReader::with_chunk_size(self.reader.line_limit(), chunk_size);
        self
    }

    /// Returns the stream this session redirects.
    #[must_use]
    pub const fn stream(&self) -> &LogicalStream {
        &self.stream
    }

    /// Returns the strategy chosen when the session was opened.
    #[must_use]
    pub const fn strategy(&self) -> RedirectStrategy {
        self.redirection.strategy()
    }

    /// Number of lines kept at each end of a trimmed summary.
    #[must_use]
    pub const fn line_limit(&self) -> NonZeroUsize {
        self.reader.line_limit()
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        match (&self.backing, self.active) {
            (None, _) => SessionState::Idle,
            (Some(_), false) => SessionState::Paused,
            (Some(_), true) => SessionState::Active,
        }
    }

    /// Returns the path of the current backing file, if started.
    #[must_use]
    pub fn backing_path(&self) -> Option<&Utf8Path> {
        self.backing.as_ref().map(|backing| backing.path.as_path())
    }

    /// Creates (or truncates) `path` and starts redirecting into it.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ProtocolViolation`] when already started and
    /// [`CaptureError::Io`] when the file cannot be created or the stream
    /// cannot be redirected. On error the session stays idle.
    pub fn start(&mut self, path: &Utf8Path) -> Result<(), CaptureError> {
        if self.backing.is_some() {
            return Err(CaptureError::protocol("start", "without calling stop"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|error| {
                CaptureError::io(&format!("failed to create capture file '{path}'"), &error)
            })?;

        switch(&self.stream, &mut self.redirection, Some(&file))?;
        tracing::debug!("capturing {} into '{path}'", self.stream);
        self.backing = Some(BackingFile {
            file,
            path: path.to_owned(),
        });
        self.active = true;
        Ok(())
    }

    /// Restores the stream's original destination without closing the
    /// backing file.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ProtocolViolation`] when not started or
    /// already paused, and [`CaptureError::Io`] when restoring fails.
    pub fn pause(&mut self) -> Result<(), CaptureError> {
        if self.backing.is_none() {
            return Err(CaptureError::protocol("pause", "without calling start"));
        }
        if !self.active {
            return Err(CaptureError::protocol("pause", "without calling resume"));
        }
        switch(&self.stream, &mut self.redirection, None)?;
        self.active = false;
        Ok(())
    }

    /// Redirects the stream back into the open backing file.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ProtocolViolation`] when not started or not
    /// paused, and [`CaptureError::Io`] when redirecting fails.
    pub fn resume(&mut self) -> Result<(), CaptureError> {
        let Some(backing) = &self.backing else {
            return Err(CaptureError::protocol(
                "resume",
                "without calling start and pause",
            ));
        };
        if self.active {
            return Err(CaptureError::protocol("resume", "without calling pause"));
        }
        switch(&self.stream, &mut self.redirection, Some(&backing.file))?;
        self.active = true;
        Ok(())
    }

    /// Stops capturing and returns the summary of the backing file.
    ///
    /// The backing file is closed and the stream restored even when
    /// summarising fails; the failure is reported afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ProtocolViolation`] when not started, and
    /// [`CaptureError::Io`] or [`CaptureError::ShortRead`] when restoring
    /// the stream or reading the backing file fails.
    pub fn stop(&mut self) -> Result<Summary, CaptureError> {
        if self.backing.is_none() {
            return Err(CaptureError::protocol("stop", "without calling start"));
        }
        let paused = if self.active { self.pause() } else { Ok(()) };
        let summary = paused.and_then(|()| self.summarise());
        self.abort();
        summary
    }

    /// Releases the backing file without summarising it.
    ///
    /// Safe in every state and never fails: an idle session is left alone,
    /// an active one is paused first. Restore failures are logged.
    pub fn abort(&mut self) {
        if self.active {
            if let Err(error) = switch(&self.stream, &mut self.redirection, None) {
                tracing::warn!("failed to restore {} while aborting: {error}", self.stream);
            }
            self.active = false;
        }
        if let Some(backing) = self.backing.take() {
            tracing::debug!("released capture file '{}'", backing.path);
        }
    }

    fn summarise(&mut self) -> Result<Summary, CaptureError> {
        let Some(backing) = self.backing.as_mut() else {
            return Err(CaptureError::protocol("stop", "without calling start"));
        };
        self.reader.summarise(&mut backing.file, &backing.path)
    }
}

/// Flushes pending stream output, then points the stream at `backing` or,
/// for `None`, back at its original destination.
fn switch(
    stream: &LogicalStream,
    redirection: &mut Redirection,
    backing: Option<&File>,
) -> Result<(), CaptureError> {
    stream
        .flush()
        .map_err(|error| CaptureError::io(&format!("failed to flush {stream}"), &error))?;
    match backing {
        Some(file) => redirection.engage(file),
        None => redirection.restore(),
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.abort();
    }
}
