//! Artifact storage layout and worker → backend path translation.
//!
//! The worker and the backend mount the same volume at different paths.
//! Files are written under the worker's `data_dir`; the path recorded in the
//! database is the one the backend sees, obtained by swapping the prefix.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default worker-side mount point of the shared volume.
pub const DEFAULT_DATA_DIR: &str = "/data";

/// Default backend-side mount point of the same volume.
pub const DEFAULT_BACKEND_UPLOADS_BASE: &str = "/app/app/uploads";

/// Subdirectory for RI Digital downloads.
pub const RI_DIGITAL_SUBDIR: &str = "ri-digital";

/// Subdirectory for ONR / SIG-RI downloads.
pub const ONR_SIGRI_SUBDIR: &str = "onr-sigri";

/// Longest filename produced by [`safe_filename`].
pub const MAX_FILENAME_LEN: usize = 180;

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-. ]+").expect("valid regex"));

// ---------------------------------------------------------------------------
// Path translation
// ---------------------------------------------------------------------------

/// The two mount points of the shared artifact volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    /// Where the worker writes files.
    pub data_dir: PathBuf,
    /// Where the backend serving layer sees the same files.
    pub serving_base: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            serving_base: PathBuf::from(DEFAULT_BACKEND_UPLOADS_BASE),
        }
    }
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>, serving_base: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            serving_base: serving_base.into(),
        }
    }

    /// Worker directory for RI Digital PDFs.
    pub fn ri_digital_dir(&self) -> PathBuf {
        self.data_dir.join(RI_DIGITAL_SUBDIR)
    }

    /// Worker directory for SIG-RI polygons.
    pub fn onr_sigri_dir(&self) -> PathBuf {
        self.data_dir.join(ONR_SIGRI_SUBDIR)
    }

    /// Translate a worker path into the path the backend sees.
    ///
    /// Only paths strictly inside `data_dir` are rewritten; anything else is
    /// returned unchanged (the worker and backend may share one filesystem).
    pub fn to_serving_path(&self, worker_path: &Path) -> PathBuf {
        match worker_path.strip_prefix(&self.data_dir) {
            Ok(rest) if !rest.as_os_str().is_empty() => self.serving_base.join(rest),
            _ => worker_path.to_path_buf(),
        }
    }
}

// ---------------------------------------------------------------------------
// Filenames
// ---------------------------------------------------------------------------

/// Replace path separators so `text` can be used as a single path segment.
pub fn path_segment(text: &str) -> String {
    text.replace(['/', '\\'], "_")
}

/// Reduce `text` to word characters, `-`, `.` and `_`, capped at
/// [`MAX_FILENAME_LEN`] characters.
pub fn safe_filename(text: &str) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(text.trim(), "_");
    cleaned
        .replace(' ', "_")
        .chars()
        .take(MAX_FILENAME_LEN)
        .collect()
}
