//! Bounded head/tail summaries of captured output files.
//!
//! A capture file may hold millions of lines, so the summary is built from
//! fixed-size chunk reads: forward from the start until more than `2 * K`
//! lines are known to exist, then backward from the end until the last `K`
//! lines are covered. Files with at most `2 * K` lines are returned
//! verbatim. Longer files are rendered as
//!
//! ```text
//! Output Trimmed, Full output in: <path>
//! --------------------------------------------------
//! <first K lines>
//! --------------------------------------------------
//! Output Trimmed, Full output in: <path>
//! --------------------------------------------------
//! <last K lines>
//! --------------------------------------------------
//! Output Trimmed, Full output in: <path>
//! ```
//!
//! A single trailing line terminator does not start a new line, so a file
//! with and without a final newline yields the same head and tail.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

use camino::Utf8Path;

use crate::capture::CaptureError;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

/// Number of head and tail lines kept when no limit is configured.
pub const DEFAULT_LINE_LIMIT: NonZeroUsize = NonZeroUsize::MIN.saturating_add(4999);

/// Size of the reusable read buffer (64 KiB).
pub const DEFAULT_CHUNK_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add((1 << 16) - 1);

/// Horizontal rule placed around the head and tail sections.
pub const SEPARATOR: &str = "--------------------------------------------------";

/// Returns the marker line naming the file that holds the full output.
#[must_use]
pub fn trim_marker(backing_path: &Utf8Path) -> String {
    format!("Output Trimmed, Full output in: {backing_path}")
}

/// Summary text together with how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    /// The whole file, decoded verbatim.
    Verbatim(String),
    /// Head and tail sections framed by trim markers.
    Trimmed(String),
}

impl Summary {
    /// Returns the summary text.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Verbatim(text) | Self::Trimmed(text) => text,
        }
    }

    /// Consumes the summary, returning its text.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Verbatim(text) | Self::Trimmed(text) => text,
        }
    }

    /// Whether lines were omitted.
    #[must_use]
    pub const fn is_trimmed(&self) -> bool {
        matches!(self, Self::Trimmed(_))
    }
}

/// Summarises the file at `path` with the default chunk size.
///
/// # Errors
///
/// Returns [`CaptureError::Io`] when the file cannot be opened or read and
/// [`CaptureError::ShortRead`] when it shrinks while being read.
pub fn summarise_path(path: &Utf8Path, line_limit: NonZeroUsize) -> Result<Summary, CaptureError> {
    let mut file = File::open(path).map_err(|error| {
        CaptureError::io(&format!("failed to open capture file '{path}'"), &error)
    })?;
    BoundedSummaryReader::new(line_limit).summarise(&mut file, path)
}

/// Produces head/tail summaries using a fixed-capacity chunk buffer.
///
/// The buffer is allocated once and reused for every chunk of every
/// summary produced by this reader.
#[derive(Debug)]
pub struct BoundedSummaryReader {
    line_limit: NonZeroUsize,
    chunk: Vec<u8>,
}

enum HeadWindow {
    /// End of file was reached within `2 * K` lines.
    WholeFile(Vec<u8>),
    /// At least one byte exists past the `2 * K`th line.
    Truncated(Vec<u8>),
}

impl BoundedSummaryReader {
    /// Creates a reader keeping `line_limit` lines at each end.
    #[must_use]
    pub fn new(line_limit: NonZeroUsize) -> Self {
        Self::with_chunk_size(line_limit, DEFAULT_CHUNK_SIZE)
    }

    /// Creates a reader with a custom chunk size.
    #[must_use]
    pub fn with_chunk_size(line_limit: NonZeroUsize, chunk_size: NonZeroUsize) -> Self {
        Self {
            line_limit,
            chunk: vec![0; chunk_size.get()],
        }
    }

    /// Number of lines kept at each end of a trimmed summary.
    #[must_use]
    pub const fn line_limit(&self) -> NonZeroUsize {
        self.line_limit
    }

    /// Capacity of the reusable chunk buffer in bytes.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk.len()
    }

    /// Summarises `source`, naming `backing_path` in the trim markers.
    ///
    /// The current position of `source` is irrelevant; it is left at an
    /// unspecified offset afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Io`] when seeking or reading fails and
    /// [`CaptureError::ShortRead`] when fewer bytes are readable than the
    /// file length promised.
    pub fn summarise<R: Read + Seek>(
        &mut self,
        source: &mut R,
        backing_path: &Utf8Path,
    ) -> Result<Summary, CaptureError> {
        let limit = self.line_limit.get();
        let head = match self.read_head(source, limit.saturating_mul(2))? {
            HeadWindow::WholeFile(bytes) => return Ok(Summary::Verbatim(decode(&bytes))),
            HeadWindow::Truncated(bytes) => bytes,
        };
        let head_end = offset_after_newlines(&head, limit).unwrap_or(head.len());
        let head_lines = strip_terminator(head.get(..head_end).unwrap_or_default());

        let file_length = source
            .seek(SeekFrom::End(0))
            .map_err(|error| CaptureError::io("failed to seek to end of capture file", &error))?;
        let tail = self.read_tail(source, file_length, limit)?;

        tracing::debug!(
            "trimmed capture '{backing_path}' ({file_length} bytes) to {limit} head and tail lines"
        );
        Ok(Summary::Trimmed(compose(
            backing_path,
            &decode(head_lines),
            &decode(&tail),
        )))
    }

    /// Reads forward until end of file or until content past the first
    /// `window` lines is seen.
    fn read_head<R: Read + Seek>(
        &mut self,
        source: &mut R,
        window: usize,
    ) -> Result<HeadWindow, CaptureError> {
        let capacity = self.chunk.len();
        let mut head = Vec::new();
        let mut newlines = 0_usize;
        let mut offset = 0_u64;
        loop {
            let chunk = self.read_chunk_at(source, offset, capacity, 0)?;
            if chunk.is_empty() {
                return Ok(HeadWindow::WholeFile(head));
            }
            newlines = newlines.saturating_add(count_newlines(chunk));
            offset = offset.saturating_add(chunk.len() as u64);
            head.extend_from_slice(chunk);

            // Reaching the window exactly at end of file still counts as
            // "whole file"; only bytes beyond the window force a trim.
            if newlines >= window
                && offset_after_newlines(&head, window).is_some_and(|end| end < head.len())
            {
                return Ok(HeadWindow::Truncated(head));
            }
        }
    }

    /// Reads backward from `file_length` and returns the last `limit` lines
    /// without their final terminator.
    fn read_tail<R: Read + Seek>(
        &mut self,
        source: &mut R,
        file_length: u64,
        limit: usize,
    ) -> Result<Vec<u8>, CaptureError> {
        let capacity = self.chunk.len();
        let mut chunks: Vec<Vec<u8>> = Vec::new();
        let mut newlines = 0_usize;
        let mut position = file_length;
        let mut ends_with_terminator = None;

        while newlines < limit && position > 0 {
            let len = usize::try_from(position).map_or(capacity, |remaining| remaining.min(capacity));
            position = position.saturating_sub(len as u64);
            let chunk = self.read_chunk_at(source, position, len, len)?;

            let mut counted = count_newlines(chunk);
            if ends_with_terminator.is_none() {
                let terminated = chunk.last() == Some(&b'\n');
                if terminated {
                    counted = counted.saturating_sub(1);
                }
                ends_with_terminator = Some(terminated);
            }
            newlines = newlines.saturating_add(counted);
            chunks.push(chunk.to_vec());
        }

        chunks.reverse();
        let mut tail = chunks.concat();
        if ends_with_terminator == Some(true) {
            tail.pop();
        }
        if newlines >= limit {
            let surplus = newlines.saturating_sub(limit).saturating_add(1);
            let start = offset_after_newlines(&tail, surplus).unwrap_or(0);
            tail.drain(..start);
        }
        Ok(tail)
    }

    /// Reads up to `len` bytes at `offset` into the chunk buffer.
    ///
    /// Fewer than `required` bytes means the file is shorter than a length
    /// observed earlier, which is reported as [`CaptureError::ShortRead`].
    fn read_chunk_at<R: Read + Seek>(
        &mut self,
        source: &mut R,
        offset: u64,
        len: usize,
        required: usize,
    ) -> Result<&[u8], CaptureError> {
        source
            .seek(SeekFrom::Start(offset))
            .map_err(|error| CaptureError::io("failed to seek capture file", &error))?;

        let buffer = self.chunk.get_mut(..len).unwrap_or_default();
        let mut filled = 0;
        while let Some(rest) = buffer.get_mut(filled..).filter(|rest| !rest.is_empty()) {
            match source.read(rest) {
                Ok(0) => break,
                Ok(amount) => filled += amount,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    return Err(CaptureError::io("failed to read capture file", &error));
                }
            }
        }

        if filled < required {
            return Err(CaptureError::ShortRead {
                offset,
                required,
                filled,
            });
        }
        Ok(self.chunk.get(..filled).unwrap_or_default())
    }
}

fn count_newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|byte| **byte == b'\n').count()
}

/// Returns the offset just past the `count`th newline, if there are that many.
fn offset_after_newlines(bytes: &[u8], count: usize) -> Option<usize> {
    let Some(index) = count.checked_sub(1) else {
        return Some(0);
    };
    bytes
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte == b'\n')
        .nth(index)
        .map(|(position, _)| position + 1)
}

fn strip_terminator(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\n").unwrap_or(bytes)
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn compose(backing_path: &Utf8Path, head: &str, tail: &str) -> String {
    let marker = trim_marker(backing_path);
    [
        marker.as_str(),
        SEPARATOR,
        head,
        SEPARATOR,
        marker.as_str(),
        SEPARATOR,
        tail,
        SEPARATOR,
        marker.as_str(),
    ]
    .join("\n")
}
