//! Helpers for building capture files and taking summaries apart in tests.
//!
//! # Examples
//!
//! ```
//! use output_shortener::summary::test_support::numbered_lines;
//!
//! assert_eq!(numbered_lines("line", 3, true), "line 0\nline 1\nline 2\n");
//! assert_eq!(numbered_lines("line", 2, false), "line 0\nline 1");
//! ```

use super::SEPARATOR;

/// Builds `count` lines of the form `"{prefix} {index}"`.
#[must_use]
pub fn numbered_lines(prefix: &str, count: usize, trailing_newline: bool) -> String {
    let mut text = (0..count)
        .map(|index| format!("{prefix} {index}"))
        .collect::<Vec<_>>()
        .join("\n");
    if trailing_newline && count > 0 {
        text.push('\n');
    }
    text
}

/// The pieces of a trimmed summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarySections {
    /// The trim marker line (identical at all three positions).
    pub marker: String,
    /// Lines between the first pair of separators.
    pub head: Vec<String>,
    /// Lines between the second pair of separators.
    pub tail: Vec<String>,
}

/// Splits a trimmed summary into its marker, head and tail.
///
/// Returns `None` when `summary` does not have the trimmed layout, which
/// is the case for verbatim (untrimmed) output.
#[must_use]
pub fn parse_sections(summary: &str) -> Option<SummarySections> {
    let lines: Vec<&str> = summary.split('\n').collect();
    let marker = *lines.first()?;
    if !marker.starts_with("Output Trimmed, Full output in: ") || lines.get(1) != Some(&SEPARATOR) {
        return None;
    }

    let head_len = lines.get(2..)?.iter().position(|line| *line == SEPARATOR)?;
    let head_end = 2 + head_len;
    if lines.get(head_end + 1) != Some(&marker) || lines.get(head_end + 2) != Some(&SEPARATOR) {
        return None;
    }

    let tail_start = head_end + 3;
    let tail_len = lines
        .get(tail_start..)?
        .iter()
        .position(|line| *line == SEPARATOR)?;
    let tail_end = tail_start + tail_len;
    if lines.get(tail_end + 1) != Some(&marker) || lines.len() != tail_end + 2 {
        return None;
    }

    let owned = |range: std::ops::Range<usize>| -> Option<Vec<String>> {
        Some(lines.get(range)?.iter().map(|line| (*line).to_owned()).collect())
    };
    Some(SummarySections {
        marker: marker.to_owned(),
        head: owned(2..head_end)?,
        tail: owned(tail_start..tail_end)?,
    })
}
