//! Destination filename collision resolution.

use std::path::{Path, PathBuf};

/// Returns `candidate` if nothing exists there, otherwise the first free
/// `"{stem} ({n}){ext}"` sibling, counting up from 1.
///
/// This is check-then-act: a file created by another writer between this
/// check and the pull can still collide. Acceptable for a single-user tool.
pub fn unique_destination(candidate: &Path) -> PathBuf {
    if !exists(candidate) {
        return candidate.to_path_buf();
    }

    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter: u64 = 1;
    loop {
        let next = candidate.with_file_name(format!("{} ({}){}", stem, counter, ext));
        if !exists(&next) {
            return next;
        }
        counter += 1;
    }
}

/// Like [`Path::exists`] but also true for dangling symlinks.
fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
