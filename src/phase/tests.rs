//! Unit tests for phase orchestration.
//!
//! Temporary files stand in for stdout and stderr so that the real
//! standard streams are left alone.

use std::fs;
use std::io::Write;
use std::num::NonZeroUsize;
use std::os::fd::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use tempfile::{NamedTempFile, TempDir};

use super::{PhaseCapture, PhaseOutput, StreamSummary, TestPhase};
use crate::capture::{CaptureError, LogicalStream, SharedSink, SinkWriter};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

const NODE_ID: &str = "tests/test_print.py::test_print";

struct Streams {
    dir: TempDir,
    stdout: NamedTempFile,
    stderr: NamedTempFile,
}

impl Streams {
    fn output_dir(&self) -> Utf8PathBuf {
        Utf8Path::from_path(self.dir.path())
            .expect("temp dir should be UTF-8")
            .join("test-out")
    }

    fn capture(&self, line_limit: usize) -> PhaseCapture {
        PhaseCapture::with_streams(
            self.output_dir(),
            LogicalStream::Descriptor(self.stdout.as_file().as_raw_fd()),
            LogicalStream::Descriptor(self.stderr.as_file().as_raw_fd()),
            NonZeroUsize::new(line_limit).expect("limit should be non-zero"),
        )
        .expect("capture should open")
    }

    fn out(&mut self, text: &str) {
        self.stdout
            .as_file_mut()
            .write_all(text.as_bytes())
            .expect("stdout write");
    }

    fn err(&mut self, text: &str) {
        self.stderr
            .as_file_mut()
            .write_all(text.as_bytes())
            .expect("stderr write");
    }

    fn original_stdout(&self) -> String {
        fs::read_to_string(self.stdout.path()).expect("stdout stand-in should be readable")
    }

    fn original_stderr(&self) -> String {
        fs::read_to_string(self.stderr.path()).expect("stderr stand-in should be readable")
    }
}

#[fixture]
fn streams() -> Streams {
    Streams {
        dir: TempDir::new().expect("temp dir"),
        stdout: NamedTempFile::new().expect("stdout stand-in"),
        stderr: NamedTempFile::new().expect("stderr stand-in"),
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .expect("events mutex should be available")
            .drain(..)
            .collect()
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, event: TelemetryEvent) {
        self.events
            .lock()
            .expect("events mutex should be available")
            .push(event);
    }
}

#[rstest]
#[case::setup("setup", TestPhase::Setup)]
#[case::call("call", TestPhase::Call)]
#[case::teardown("teardown", TestPhase::Teardown)]
fn phases_parse_from_lowercase_names(#[case] name: &str, #[case] expected: TestPhase) {
    let parsed: TestPhase = name.parse().expect("phase should parse");

    assert_eq!(parsed, expected);
    assert_eq!(parsed.to_string(), name);
}

#[rstest]
fn unknown_phase_is_a_configuration_error() {
    let result = "collect".parse::<TestPhase>();

    assert!(
        matches!(result, Err(CaptureError::Configuration { .. })),
        "got {result:?}"
    );
}

#[rstest]
fn phase_files_are_written_per_item_and_phase(mut streams: Streams) {
    let mut capture = streams.capture(5);
    let item = capture.item_dir(NODE_ID);
    let mut outputs = Vec::new();

    for phase in TestPhase::ALL {
        capture.begin(NODE_ID, phase).expect("begin");
        assert_eq!(capture.current(), Some((NODE_ID, phase)));
        if phase == TestPhase::Call {
            streams.out("in stdout 0\n");
            streams.err("in stderr 0\n");
        }
        outputs.push(capture.finish().expect("finish"));
    }

    assert_eq!(item, streams.output_dir().join("tests/test_print_py/test_print"));
    for name in [
        "setup-stdout.txt",
        "setup-stderr.txt",
        "teardown-stdout.txt",
        "teardown-stderr.txt",
    ] {
        assert_eq!(fs::read_to_string(item.join(name)).expect(name), "");
    }
    assert_eq!(
        fs::read_to_string(item.join("call-stdout.txt")).expect("call stdout"),
        "in stdout 0\n"
    );
    assert_eq!(
        fs::read_to_string(item.join("call-stderr.txt")).expect("call stderr"),
        "in stderr 0\n"
    );
    let call = outputs.get(1).expect("call output");
    assert_eq!(call.stdout.text, "in stdout 0\n");
    assert_eq!(call.stderr.text, "in stderr 0\n");
    assert!(!call.stdout.trimmed);
    assert_eq!(streams.original_stdout(), "");
}

#[rstest]
fn begin_while_capturing_is_rejected(streams: Streams) {
    let mut capture = streams.capture(5);
    capture.begin(NODE_ID, TestPhase::Setup).expect("begin");

    let result = capture.begin(NODE_ID, TestPhase::Call);

    assert!(
        matches!(result, Err(CaptureError::ProtocolViolation { .. })),
        "got {result:?}"
    );
    assert_eq!(capture.current(), Some((NODE_ID, TestPhase::Setup)));
}

#[rstest]
fn finish_without_begin_is_rejected(streams: Streams) {
    let mut capture = streams.capture(5);

    let result = capture.finish();

    assert!(
        matches!(result, Err(CaptureError::ProtocolViolation { .. })),
        "got {result:?}"
    );
}

#[rstest]
fn suspended_output_bypasses_capture(mut streams: Streams) {
    let mut capture = streams.capture(5);

    capture.begin(NODE_ID, TestPhase::Call).expect("begin");
    streams.out("captured\n");
    capture.suspend().expect("suspend");
    streams.out("debugger prompt\n");
    streams.err("debugger noise\n");
    capture.resume().expect("resume");
    streams.err("captured error\n");
    let output = capture.finish().expect("finish");

    assert_eq!(output.stdout.text, "captured\n");
    assert_eq!(output.stderr.text, "captured error\n");
    assert_eq!(streams.original_stdout(), "debugger prompt\n");
    assert_eq!(streams.original_stderr(), "debugger noise\n");
}

#[rstest]
fn abort_releases_both_streams(mut streams: Streams) {
    let mut capture = streams.capture(5);

    capture.begin(NODE_ID, TestPhase::Call).expect("begin");
    capture.abort();
    capture.abort();
    streams.out("interrupted\n");
    streams.err("interrupted\n");

    assert_eq!(capture.current(), None);
    assert_eq!(streams.original_stdout(), "interrupted\n");
    assert_eq!(streams.original_stderr(), "interrupted\n");
    capture.begin(NODE_ID, TestPhase::Teardown).expect("capture is reusable");
}

#[rstest]
fn run_phase_returns_the_closure_value(mut streams: Streams) {
    let mut capture = streams.capture(5);

    let (value, output) = capture
        .run_phase(NODE_ID, TestPhase::Call, || {
            streams.out("working\n");
            42
        })
        .expect("phase should run");
    streams.out("after\n");

    assert_eq!(value, 42);
    assert_eq!(output.stdout.text, "working\n");
    assert_eq!(streams.original_stdout(), "after\n");
}

#[rstest]
fn run_phase_aborts_when_the_closure_panics(mut streams: Streams) {
    let mut capture = streams.capture(5);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        capture.run_phase(NODE_ID, TestPhase::Call, || -> u8 { panic!("phase failed") })
    }));
    streams.err("restored\n");

    assert!(result.is_err(), "panic should propagate");
    assert_eq!(capture.current(), None);
    assert_eq!(streams.original_stderr(), "restored\n");
}

#[rstest]
fn finish_records_telemetry_per_stream(mut streams: Streams) {
    let sink = RecordingSink::default();
    let mut capture = streams.capture(1).with_telemetry(sink.clone());
    let item = capture.item_dir(NODE_ID);

    capture.begin(NODE_ID, TestPhase::Call).expect("begin");
    streams.out("a\nb\nc\n");
    capture.finish().expect("finish");

    assert_eq!(
        sink.take(),
        vec![
            TelemetryEvent::PhaseCaptured {
                node_id: NODE_ID.to_owned(),
                phase: "call".to_owned(),
                stream: "stdout".to_owned(),
                backing_file: item.join("call-stdout.txt"),
                trimmed: true,
            },
            TelemetryEvent::PhaseCaptured {
                node_id: NODE_ID.to_owned(),
                phase: "call".to_owned(),
                stream: "stderr".to_owned(),
                backing_file: item.join("call-stderr.txt"),
                trimmed: false,
            },
        ]
    );
}

#[rstest]
fn rendered_report_includes_trimmed_sections(mut streams: Streams) {
    let mut capture = streams.capture(2);
    let output_dir = streams.output_dir();

    capture.begin(NODE_ID, TestPhase::Call).expect("begin");
    for index in 0..6 {
        streams.out(&format!("in stdout {index}\n"));
    }
    streams.err("in stderr 0\n");
    let output = capture.finish().expect("finish");

    insta::with_settings!({filters => vec![(output_dir.as_str(), "[OUT]")]}, {
        insta::assert_snapshot!(output.render(), @r"
        ----- Captured stdout call -----
        Output Trimmed, Full output in: [OUT]/tests/test_print_py/test_print/call-stdout.txt
        --------------------------------------------------
        in stdout 0
        in stdout 1
        --------------------------------------------------
        Output Trimmed, Full output in: [OUT]/tests/test_print_py/test_print/call-stdout.txt
        --------------------------------------------------
        in stdout 4
        in stdout 5
        --------------------------------------------------
        Output Trimmed, Full output in: [OUT]/tests/test_print_py/test_print/call-stdout.txt
        ----- Captured stderr call -----
        in stderr 0
        ");
    });
}

#[rstest]
fn render_skips_empty_streams() {
    let empty = |name: &str| StreamSummary {
        backing_file: Utf8PathBuf::from(name),
        text: String::new(),
        trimmed: false,
    };
    let output = PhaseOutput {
        node_id: NODE_ID.to_owned(),
        phase: TestPhase::Setup,
        stdout: empty("setup-stdout.txt"),
        stderr: StreamSummary {
            text: "warning\n".to_owned(),
            ..empty("setup-stderr.txt")
        },
    };

    assert_eq!(output.render(), "----- Captured stderr setup -----\nwarning");
}

/// A writer whose `flush` fails once `failing` is set.
#[derive(Clone, Default)]
struct FlakyFlush {
    failing: Arc<AtomicBool>,
}

impl Write for FlakyFlush {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("flush refused"));
        }
        Ok(())
    }
}

impl SinkWriter for FlakyFlush {}

#[rstest]
fn failed_suspend_reports_the_stderr_error_when_rollback_fails(streams: Streams) {
    let writer = FlakyFlush::default();
    let mut capture = PhaseCapture::with_streams(
        streams.output_dir(),
        LogicalStream::Sink(SharedSink::new(writer.clone())),
        LogicalStream::Descriptor(streams.stderr.as_file().as_raw_fd()),
        NonZeroUsize::new(5).expect("limit should be non-zero"),
    )
    .expect("capture should open");
    capture.begin(NODE_ID, TestPhase::Call).expect("begin");
    capture.stderr.pause().expect("pause stderr on its own");
    writer.failing.store(true, Ordering::SeqCst);

    let error = capture.suspend().expect_err("stderr is already paused");

    assert_eq!(error, CaptureError::protocol("pause", "without calling resume"));
    writer.failing.store(false, Ordering::SeqCst);
    capture.abort();
}

#[rstest]
fn failed_resume_reports_the_stderr_error(streams: Streams) {
    let mut capture = streams.capture(5);
    capture.begin(NODE_ID, TestPhase::Call).expect("begin");
    capture.suspend().expect("suspend");
    capture.stderr.abort();

    let error = capture.resume().expect_err("stderr is no longer started");

    assert_eq!(
        error,
        CaptureError::protocol("resume", "without calling start and pause")
    );
    capture.abort();
}
