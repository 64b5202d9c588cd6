//! Atomic file replacement
//!
//! Content is written to a temporary file in the destination directory,
//! flushed to disk, then renamed over the destination. Readers see either
//! the previous file or the complete new one.

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    write_atomic_with(path, bytes, |_| Ok(()))
}

/// Like [`write_atomic`], running `before_commit` on the fully written
/// temporary file right before the rename. An error from the hook aborts the
/// write and removes the temporary file.
pub(crate) fn write_atomic_with<F>(path: &Path, bytes: &[u8], before_commit: F) -> std::io::Result<()>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;

    before_commit(temp.path())?;

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
