//! Redirection of process output streams into backing files.
//!
//! A [`CaptureSession`] owns the lifecycle of one logical stream:
//! `start` redirects it into a fresh backing file, `pause`/`resume` toggle
//! between the backing file and the original destination, and `stop`
//! restores the stream and returns a bounded summary of everything that was
//! captured. `abort` tears a session down without summarising and is safe
//! to call at any time.
//!
//! # Example
//!
//! ```no_run
//! use camino::Utf8Path;
//! use output_shortener::capture::{LogicalStream, open_session};
//! use output_shortener::summary::DEFAULT_LINE_LIMIT;
//!
//! let mut session = open_session(LogicalStream::Stdout, DEFAULT_LINE_LIMIT)?;
//! session.start(Utf8Path::new("call-stdout.txt"))?;
//! // ... noisy work ...
//! let summary = session.stop()?;
//! # Ok::<(), output_shortener::capture::CaptureError>(())
//! ```

mod error;
mod redirect;
mod session;
mod stream;

pub use error::CaptureError;
pub use redirect::RedirectStrategy;
pub use session::{CaptureSession, SessionState, open_session};
pub use stream::{LogicalStream, MemorySink, SharedSink, SinkWriter};
