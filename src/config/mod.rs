//! Shortener configuration loaded from CLI, environment, and files.
//!
//! Values are merged through ortho-config's layered approach.
//!
//! # Precedence
//!
//! Configuration values are loaded with the following precedence (lowest to
//! highest):
//!
//! 1. **Defaults** – capture disabled, 5000 lines kept at each end, `call`
//!    phase
//! 2. **Configuration file** – `.shorten-output.toml` in the current
//!    directory, home directory, or XDG config directory
//! 3. **Environment variables** – `SHORTEN_OUTPUT_OUTPUT_DIR`,
//!    `SHORTEN_OUTPUT_LINES`, `SHORTEN_OUTPUT_NODE_ID`, `SHORTEN_OUTPUT_PHASE`
//! 4. **Command-line arguments** – `--output-dir`/`-o`, `--lines`/`-l`,
//!    `--node-id`/`-i`, `--phase`/`-p`, `--telemetry`/`-t`
//!
//! # Configuration File
//!
//! ```toml
//! output_dir = "target/test-output"
//! lines = 200
//! telemetry = true
//! ```

use std::num::NonZeroUsize;

use camino::Utf8Path;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::capture::CaptureError;
use crate::phase::TestPhase;
use crate::summary::DEFAULT_LINE_LIMIT;

/// Configuration for a capture run.
///
/// Capture is enabled only when `output_dir` is set to a non-blank path.
///
/// # Example
///
/// ```no_run
/// use ortho_config::OrthoConfig;
/// use output_shortener::ShortenConfig;
///
/// let config = ShortenConfig::load().expect("failed to load configuration");
/// config.validate().expect("invalid configuration");
/// if let Some(dir) = config.capture_dir() {
///     println!("capturing into {dir}");
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(
    prefix = "SHORTEN_OUTPUT",
    discovery(
        dotfile_name = ".shorten-output.toml",
        config_file_name = "shorten-output.toml",
        app_name = "shorten-output"
    )
)]
pub struct ShortenConfig {
    /// Directory that receives per-item capture files.
    ///
    /// Can be provided via:
    /// - CLI: `--output-dir <DIR>` or `-o <DIR>`
    /// - Environment: `SHORTEN_OUTPUT_OUTPUT_DIR`
    /// - Config file: `output_dir = "..."`
    #[ortho_config(cli_short = 'o')]
    pub output_dir: Option<String>,

    /// Number of lines kept at each end of a trimmed summary.
    ///
    /// Can be provided via:
    /// - CLI: `--lines <N>` or `-l <N>`
    /// - Environment: `SHORTEN_OUTPUT_LINES`
    /// - Config file: `lines = 5000`
    #[ortho_config(cli_short = 'l')]
    pub lines: usize,

    /// Identifier of the captured item, used to derive its directory.
    ///
    /// Defaults to the name of the wrapped program when unset.
    #[ortho_config(cli_short = 'i')]
    pub node_id: Option<String>,

    /// Phase name (`setup`, `call`, or `teardown`) used for file names.
    #[ortho_config(cli_short = 'p')]
    pub phase: Option<String>,

    /// Emits one JSON telemetry line on stderr per captured stream.
    ///
    /// Note: `SHORTEN_OUTPUT_TELEMETRY` is not supported because
    /// `ortho_config` does not load boolean values from the environment.
    #[ortho_config(cli_short = 't')]
    pub telemetry: bool,
}

impl Default for ShortenConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            lines: DEFAULT_LINE_LIMIT.get(),
            node_id: None,
            phase: None,
            telemetry: false,
        }
    }
}

impl ShortenConfig {
    /// Returns the capture directory, or `None` when capture is disabled.
    #[must_use]
    pub fn capture_dir(&self) -> Option<&Utf8Path> {
        self.output_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(Utf8Path::new)
    }

    /// Returns the configured line limit.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Configuration`] when `lines` is zero.
    pub fn line_limit(&self) -> Result<NonZeroUsize, CaptureError> {
        NonZeroUsize::new(self.lines).ok_or_else(|| CaptureError::Configuration {
            message: "line limit must be at least 1 (use --lines or -l)".to_owned(),
        })
    }

    /// Returns the configured phase, defaulting to [`TestPhase::Call`].
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Configuration`] for an unknown phase name.
    pub fn phase(&self) -> Result<TestPhase, CaptureError> {
        self.phase
            .as_deref()
            .map_or(Ok(TestPhase::Call), str::parse)
    }

    /// Returns the node id, or `fallback` when none is configured.
    #[must_use]
    pub fn node_id_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.node_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(fallback)
    }

    /// Checks that the configuration is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Configuration`] describing the first invalid
    /// value.
    pub fn validate(&self) -> Result<(), CaptureError> {
        self.line_limit()?;
        self.phase()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
