//! Per-item, per-phase capture of stdout and stderr.
//!
//! A host test runner (or the `shorten-output` binary) drives a
//! [`PhaseCapture`] through the phases of each item: `begin` redirects both
//! standard streams into `<output_dir>/<item path>/<phase>-<stream>.txt`,
//! `finish` restores them and returns the summaries, and `abort` tears
//! everything down when the host is interrupted.

mod layout;

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::capture::{CaptureError, CaptureSession, LogicalStream};
use crate::telemetry::{NoopTelemetrySink, TelemetryEvent, TelemetrySink};

pub use layout::{create_dir_all, item_dir};

/// A phase of running one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPhase {
    /// Preparing the item.
    Setup,
    /// Running the item itself.
    Call,
    /// Cleaning up after the item.
    Teardown,
}

impl TestPhase {
    /// All phases in execution order.
    pub const ALL: [Self; 3] = [Self::Setup, Self::Call, Self::Teardown];

    /// Lowercase phase name used in file names and report headings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Call => "call",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestPhase {
    type Err = CaptureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == value)
            .ok_or_else(|| CaptureError::Configuration {
                message: format!("unknown phase '{value}' (expected setup, call or teardown)"),
            })
    }
}

/// Summary of one stream for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// File holding the untruncated output.
    pub backing_file: Utf8PathBuf,
    /// Verbatim output, or the trimmed head/tail digest.
    pub text: String,
    /// Whether lines were omitted from `text`.
    pub trimmed: bool,
}

/// Summaries of both streams for one finished phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutput {
    /// Identifier of the captured item.
    pub node_id: String,
    /// Phase that was captured.
    pub phase: TestPhase,
    /// Standard output summary.
    pub stdout: StreamSummary,
    /// Standard error summary.
    pub stderr: StreamSummary,
}

impl PhaseOutput {
    /// Renders report sections for the non-empty streams.
    ///
    /// Each section is headed `----- Captured <stream> <phase> -----`.
    #[must_use]
    pub fn render(&self) -> String {
        [("stdout", &self.stdout), ("stderr", &self.stderr)]
            .into_iter()
            .filter(|(_, summary)| !summary.text.is_empty())
            .map(|(name, summary)| {
                format!(
                    "----- Captured {name} {} -----\n{}",
                    self.phase,
                    summary.text.strip_suffix('\n').unwrap_or(&summary.text)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Captures stdout and stderr for the phases of successive items.
pub struct PhaseCapture {
    output_dir: Utf8PathBuf,
    stdout: CaptureSession,
    stderr: CaptureSession,
    telemetry: Box<dyn TelemetrySink>,
    current: Option<(String, TestPhase)>,
}

impl PhaseCapture {
    /// Opens sessions on the process's standard streams.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::UnsupportedPlatform`] or [`CaptureError::Io`]
    /// when either stream's destination cannot be saved.
    pub fn new(
        output_dir: impl Into<Utf8PathBuf>,
        line_limit: NonZeroUsize,
    ) -> Result<Self, CaptureError> {
        Self::with_streams(
            output_dir,
            LogicalStream::Stdout,
            LogicalStream::Stderr,
            line_limit,
        )
    }

    /// Opens sessions on arbitrary streams standing in for stdout/stderr.
    ///
    /// # Errors
    ///
    /// See [`PhaseCapture::new`].
    pub fn with_streams(
        output_dir: impl Into<Utf8PathBuf>,
        stdout: LogicalStream,
        stderr: LogicalStream,
        line_limit: NonZeroUsize,
    ) -> Result<Self, CaptureError> {
        Ok(Self {
            output_dir: output_dir.into(),
            stdout: CaptureSession::open(stdout, line_limit)?,
            stderr: CaptureSession::open(stderr, line_limit)?,
            telemetry: Box::new(NoopTelemetrySink),
            current: None,
        })
    }

    /// Records a [`TelemetryEvent`] per stream after each finished phase.
    #[must_use]
    pub fn with_telemetry(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.telemetry = Box::new(sink);
        self
    }

    /// Root directory for backing files.
    #[must_use]
    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    /// Directory holding the backing files of `node_id`.
    #[must_use]
    pub fn item_dir(&self, node_id: &str) -> Utf8PathBuf {
        item_dir(&self.output_dir, node_id)
    }

    /// The phase currently being captured, if any.
    #[must_use]
    pub fn current(&self) -> Option<(&str, TestPhase)> {
        self.current
            .as_ref()
            .map(|(node_id, phase)| (node_id.as_str(), *phase))
    }

    /// Starts capturing both streams for `phase` of `node_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ProtocolViolation`] when a phase is already
    /// being captured and [`CaptureError::Io`] when the item directory or a
    /// backing file cannot be created. On error neither stream is captured.
    pub fn begin(&mut self, node_id: &str, phase: TestPhase) -> Result<(), CaptureError> {
        if self.current.is_some() {
            return Err(CaptureError::protocol("begin", "without calling finish"));
        }
        let dir = self.item_dir(node_id);
        create_dir_all(&dir)?;

        self.stdout.start(&dir.join(format!("{phase}-stdout.txt")))?;
        if let Err(error) = self.stderr.start(&dir.join(format!("{phase}-stderr.txt"))) {
            self.stdout.abort();
            return Err(error);
        }
        self.current = Some((node_id.to_owned(), phase));
        Ok(())
    }

    /// Lets both streams reach their original destinations until
    /// [`PhaseCapture::resume`].
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ProtocolViolation`] when not capturing or
    /// already suspended.
    pub fn suspend(&mut self) -> Result<(), CaptureError> {
        self.stdout.pause()?;
        if let Err(error) = self.stderr.pause() {
            if let Err(rollback) = self.stdout.resume() {
                tracing::warn!("failed to resume stdout after stderr pause failed: {rollback}");
            }
            return Err(error);
        }
        Ok(())
    }

    /// Resumes capturing after [`PhaseCapture::suspend`].
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ProtocolViolation`] when not suspended.
    pub fn resume(&mut self) -> Result<(), CaptureError> {
        self.stdout.resume()?;
        if let Err(error) = self.stderr.resume() {
            if let Err(rollback) = self.stdout.pause() {
                tracing::warn!("failed to pause stdout after stderr resume failed: {rollback}");
            }
            return Err(error);
        }
        Ok(())
    }

    /// Stops both streams and returns their summaries.
    ///
    /// Both sessions are stopped even when the first fails; the first
    /// failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ProtocolViolation`] when no phase is being
    /// captured, or the error of a failed [`CaptureSession::stop`].
    pub fn finish(&mut self) -> Result<PhaseOutput, CaptureError> {
        let Some((node_id, phase)) = self.current.take() else {
            return Err(CaptureError::protocol("finish", "without calling begin"));
        };
        let stdout = stop_stream(&mut self.stdout);
        let stderr = stop_stream(&mut self.stderr);
        let output = PhaseOutput {
            node_id,
            phase,
            stdout: stdout?,
            stderr: stderr?,
        };

        for (name, summary) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            self.telemetry.record(TelemetryEvent::PhaseCaptured {
                node_id: output.node_id.clone(),
                phase: phase.to_string(),
                stream: name.to_owned(),
                backing_file: summary.backing_file.clone(),
                trimmed: summary.trimmed,
            });
        }
        Ok(output)
    }

    /// Releases both streams without summarising. Never fails.
    pub fn abort(&mut self) {
        self.stdout.abort();
        self.stderr.abort();
        if let Some((node_id, phase)) = self.current.take() {
            tracing::debug!("aborted {phase} capture of '{node_id}'");
        }
    }

    /// Captures `work` as `phase` of `node_id`.
    ///
    /// If `work` panics, the capture is aborted before the panic continues
    /// to unwind, so the panic message reaches the original stderr.
    ///
    /// # Errors
    ///
    /// See [`PhaseCapture::begin`] and [`PhaseCapture::finish`].
    pub fn run_phase<T>(
        &mut self,
        node_id: &str,
        phase: TestPhase,
        work: impl FnOnce() -> T,
    ) -> Result<(T, PhaseOutput), CaptureError> {
        self.begin(node_id, phase)?;
        let mut guard = AbortOnUnwind {
            capture: self,
            armed: true,
        };
        let value = work();
        guard.armed = false;
        let output = guard.capture.finish()?;
        Ok((value, output))
    }
}

impl fmt::Debug for PhaseCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseCapture")
            .field("output_dir", &self.output_dir)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

fn stop_stream(session: &mut CaptureSession) -> Result<StreamSummary, CaptureError> {
    let Some(backing_file) = session.backing_path().map(Utf8Path::to_path_buf) else {
        return Err(CaptureError::protocol("stop", "without calling start"));
    };
    let summary = session.stop()?;
    Ok(StreamSummary {
        backing_file,
        trimmed: summary.is_trimmed(),
        text: summary.into_text(),
    })
}

struct AbortOnUnwind<'a> {
    capture: &'a mut PhaseCapture,
    armed: bool,
}

impl Drop for AbortOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.capture.abort();
        }
    }
}

#[cfg(test)]
mod tests;
