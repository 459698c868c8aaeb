//! Temporary file discipline (§4.E "Temporary file discipline"):
//! scratch files acquired for viewing/decoding are tracked on a
//! per-session list and unlinked at session end; an op that
//! succeeds may unregister its entry early (e.g. a compose command
//! that consumed the file itself).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Owns the set of scratch paths created during one session. Dropping
/// it unlinks whatever is still registered.
#[derive(Debug, Default)]
pub struct TempAttachments {
    paths: HashSet<PathBuf>,
}

impl TempAttachments {
    pub fn new() -> TempAttachments {
        TempAttachments::default()
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.paths.insert(path.into());
    }

    /// Removes `path` from the registry without deleting it (the
    /// caller has taken ownership, e.g. handed it to a compose
    /// command).
    pub fn unregister(&mut self, path: &Path) -> bool {
        self.paths.remove(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Unlinks every remaining registered path now, rather than
    /// waiting for `Drop`.
    pub fn cleanup_now(&mut self) {
        for path in self.paths.drain() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(?path, %err, "failed to unlink temporary attachment");
                }
            }
        }
    }
}

impl Drop for TempAttachments {
    fn drop(&mut self) {
        self.cleanup_now();
    }
}
