//! `shorten-output` entrypoint.
//!
//! Runs a command with its stdout and stderr captured to files, then prints
//! a bounded summary of each stream:
//!
//! ```text
//! shorten-output --output-dir target/output --lines 200 -- cargo test
//! ```

use std::ffi::OsString;
use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitCode, ExitStatus};

use ortho_config::OrthoConfig;
use output_shortener::{
    CaptureError, PhaseCapture, PhaseOutput, ShortenConfig, StderrJsonlTelemetrySink,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: shorten-output [OPTIONS] -- <command> [args...]";

fn main() -> ExitCode {
    init_tracing();

    match run(std::env::args_os().collect()) {
        Ok(code) => code,
        Err(error) => {
            if writeln!(io::stderr().lock(), "{error}").is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ignored = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(args: Vec<OsString>) -> Result<ExitCode, CaptureError> {
    let (options, command) = split_command(args);
    let config = load_config(options)?;
    config.validate()?;

    let Some((program, program_args)) = command.split_first() else {
        return Err(CaptureError::Configuration {
            message: format!("no command given ({USAGE})"),
        });
    };
    let mut child = Command::new(program);
    child.args(program_args);

    let Some(output_dir) = config.capture_dir() else {
        tracing::debug!("capture disabled; running command directly");
        let status = run_child(&mut child)?;
        return Ok(exit_code(status));
    };

    let program_name = program.to_string_lossy();
    let node_id = config.node_id_or(&program_name);
    let mut capture = PhaseCapture::new(output_dir, config.line_limit()?)?;
    if config.telemetry {
        capture = capture.with_telemetry(StderrJsonlTelemetrySink);
    }

    capture.begin(node_id, config.phase()?)?;
    let status = match run_child(&mut child) {
        Ok(status) => status,
        Err(error) => {
            capture.abort();
            return Err(error);
        }
    };
    let output = capture.finish()?;

    write_summaries(&output)?;
    Ok(exit_code(status))
}

/// Splits arguments at the first `--` into options and the wrapped command.
///
/// The program name stays with the options so they can be handed to
/// ortho-config unchanged.
fn split_command(mut args: Vec<OsString>) -> (Vec<OsString>, Vec<OsString>) {
    let command = args
        .iter()
        .position(|arg| arg == "--")
        .map_or_else(Vec::new, |index| {
            args.split_off(index).into_iter().skip(1).collect()
        });
    (args, command)
}

/// Loads configuration from the option arguments, environment, and files.
///
/// # Errors
///
/// Returns [`CaptureError::Configuration`] when ortho-config fails to parse
/// arguments or load configuration files.
fn load_config(options: Vec<OsString>) -> Result<ShortenConfig, CaptureError> {
    ShortenConfig::load_from_iter(options).map_err(|error| CaptureError::Configuration {
        message: error.to_string(),
    })
}

fn run_child(command: &mut Command) -> Result<ExitStatus, CaptureError> {
    command.status().map_err(|error| CaptureError::Command {
        message: format!("failed to run {:?}: {error}", command.get_program()),
    })
}

/// Maps the child's status to this process's exit code.
///
/// A child killed by a signal reports `128 + signal`, as shells do.
fn exit_code(status: ExitStatus) -> ExitCode {
    let code = status
        .code()
        .or_else(|| status.signal().map(|signal| signal.saturating_add(128)));
    code.and_then(|value| u8::try_from(value).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

fn write_summaries(output: &PhaseOutput) -> Result<(), CaptureError> {
    write_summary(&mut io::stdout().lock(), &output.stdout.text)?;
    write_summary(&mut io::stderr().lock(), &output.stderr.text)
}

fn write_summary(target: &mut impl Write, text: &str) -> Result<(), CaptureError> {
    if text.is_empty() {
        return Ok(());
    }
    target.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        target.write_all(b"\n")?;
    }
    target.flush()?;
    Ok(())
}
