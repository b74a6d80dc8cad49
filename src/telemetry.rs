//! Capture telemetry events and sinks.
//!
//! Each finished phase records one event per stream so that tooling can
//! find the backing files without parsing the summary text.

use std::io;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// A structured telemetry event emitted after a capture phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// One stream of a phase was captured and summarised.
    PhaseCaptured {
        /// Identifier of the captured item.
        node_id: String,
        /// Phase name (`setup`, `call` or `teardown`).
        phase: String,
        /// Stream name (`stdout` or `stderr`).
        stream: String,
        /// File holding the untruncated output.
        backing_file: Utf8PathBuf,
        /// Whether the summary omitted lines.
        trimmed: bool,
    },
}

/// A sink that can record telemetry events.
pub trait TelemetrySink: Send + Sync {
    /// Records a telemetry event.
    fn record(&self, event: TelemetryEvent);
}

/// Telemetry sink that drops all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Records telemetry events to stderr as JSON lines (JSONL).
///
/// Events are recorded after a phase finishes, when stderr points at its
/// original destination again.
#[derive(Debug, Default)]
pub struct StderrJsonlTelemetrySink;

impl TelemetrySink for StderrJsonlTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        let Ok(serialised) = serde_json::to_string(&event) else {
            return;
        };

        if let Err(error) = writeln_stderr(&serialised) {
            tracing::trace!("failed to write telemetry event: {error}");
        }
    }
}

fn writeln_stderr(message: &str) -> io::Result<()> {
    use io::Write;

    let mut stderr = io::stderr().lock();
    writeln!(stderr, "{message}")
}
