//! Output shortener library crate.
//!
//! Redirects a process's stdout and stderr into per-phase backing files and
//! reduces each captured stream to a bounded head/tail summary that points
//! at the file holding the full output.

pub mod capture;
pub mod config;
pub mod phase;
pub mod summary;
pub mod telemetry;

pub use capture::{CaptureError, CaptureSession, LogicalStream, SessionState, open_session};
pub use config::ShortenConfig;
pub use phase::{PhaseCapture, PhaseOutput, StreamSummary, TestPhase};
pub use summary::{BoundedSummaryReader, Summary};
pub use telemetry::{NoopTelemetrySink, StderrJsonlTelemetrySink, TelemetryEvent, TelemetrySink};
