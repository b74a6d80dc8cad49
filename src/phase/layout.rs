//! Placement of backing files on disk.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;

use crate::capture::CaptureError;

/// Builds the directory for an item's backing files.
///
/// `node_id` is split on `::`; each part may itself contain `/`-separated
/// path segments. Within a segment `.` becomes `_` and any other character
/// outside `[A-Za-z0-9_-]` becomes `-`, so the result never escapes
/// `output_dir`.
///
/// ```
/// use camino::Utf8Path;
/// use output_shortener::phase::item_dir;
///
/// let dir = item_dir(Utf8Path::new("out"), "tests/test_print.py::test_print[a b]");
/// assert_eq!(dir, "out/tests/test_print_py/test_print-a-b-");
/// ```
#[must_use]
pub fn item_dir(output_dir: &Utf8Path, node_id: &str) -> Utf8PathBuf {
    node_id
        .split("::")
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty())
        .map(sanitize_segment)
        .fold(output_dir.to_path_buf(), |dir, segment| dir.join(segment))
}

fn sanitize_segment(segment: &str) -> String {
    const fn replacement(ch: char) -> char {
        match ch {
            '.' => '_',
            ch if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' => ch,
            _ => '-',
        }
    }

    segment.chars().map(replacement).collect()
}

/// Creates `path` and any missing parents.
///
/// Relative paths are resolved against the current directory.
///
/// # Errors
///
/// Returns [`CaptureError::Io`] when the current directory cannot be
/// determined or a directory cannot be created.
pub fn create_dir_all(path: &Utf8Path) -> Result<(), CaptureError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        current_dir()?.join(path)
    };
    let relative = absolute
        .strip_prefix("/")
        .map_err(|_| CaptureError::Io {
            message: format!("failed to normalise output directory '{absolute}'"),
        })?;
    if relative.as_str().is_empty() {
        return Ok(());
    }

    let root = Dir::open_ambient_dir("/", ambient_authority()).map_err(|error| {
        CaptureError::io("failed to open root directory for capture files", &error)
    })?;
    root.create_dir_all(relative).map_err(|error| {
        CaptureError::io(&format!("failed to create capture directory '{path}'"), &error)
    })
}

fn current_dir() -> Result<Utf8PathBuf, CaptureError> {
    let cwd = std::env::current_dir()
        .map_err(|error| CaptureError::io("failed to read current directory", &error))?;
    Utf8PathBuf::from_path_buf(cwd).map_err(|cwd| CaptureError::Io {
        message: format!("current directory is not valid UTF-8: {}", cwd.display()),
    })
}
