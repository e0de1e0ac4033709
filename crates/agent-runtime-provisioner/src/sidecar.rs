use std::io;
use std::path::{Path, PathBuf};

pub const SIDECAR_FILE_NAME: &str = ".agent_arn";

pub fn sidecar_path(dir: &Path) -> PathBuf {
    dir.join(SIDECAR_FILE_NAME)
}

/// Overwrites the sidecar in `dir` with exactly `handle` (no trailing newline).
pub fn write_handle(dir: &Path, handle: &str) -> io::Result<PathBuf> {
    let path = sidecar_path(dir);
    std::fs::write(&path, handle)?;
    Ok(path)
}
