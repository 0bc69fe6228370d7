//! Relay transport artifact housekeeping.
//!
//! v2 relay clients persist their own key/pairing state in per-user database
//! files. When recovery finds no surviving session for a user, that file is
//! stale and gets purged so the next pairing starts clean.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

/// File name a user's v2 relay client stores its state under.
pub fn artifact_name(user_id: &str) -> String {
    format!("wc{user_id}.db")
}

/// Storage-side artifact cleanup.
pub trait TransportArtifacts: Send + Sync {
    /// Removes every known artifact whose name is not in `keep`. Returns
    /// how many were removed.
    fn purge_except(&self, keep: &HashSet<String>) -> Result<usize>;
}

/// Artifacts on the local filesystem, one directory of `wc<user>.db` files.
pub struct FsArtifacts {
    root: PathBuf,
}

impl FsArtifacts {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl TransportArtifacts for FsArtifacts {
    fn purge_except(&self, keep: &HashSet<String>) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(target: "wcb.artifacts", root = %self.root.display(), %err, "artifact directory unavailable");
                return Ok(0);
            }
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("wc") || !name.ends_with(".db") || keep.contains(&name) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(target: "wcb.artifacts", name, "purged stale relay artifact");
                    removed += 1;
                }
                Err(err) => {
                    warn!(target: "wcb.artifacts", name, %err, "failed to purge relay artifact");
                }
            }
        }
        Ok(removed)
    }
}

/// No-op cleanup for embedders whose relay keeps no local state.
pub struct NoopArtifacts;

impl TransportArtifacts for NoopArtifacts {
    fn purge_except(&self, _keep: &HashSet<String>) -> Result<usize> {
        Ok(0)
    }
}
