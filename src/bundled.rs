//! Bundled runner — a `Runner` entry point that loads its resources from a
//! JSON blob packaged alongside the executable, the on-host half of a
//! self-extracting-archive deployment mode (archive packaging and transport
//! are a separate concern, handled upstream of this crate).

use crate::bundle::Bundle;
use crate::error::{FuselageError, Result};
use std::path::{Path, PathBuf};

pub const BUNDLED_RESOURCES_FILE: &str = "resources.json";

/// `resources.json`'s expected path next to a given executable.
pub fn bundled_resources_path(exe_path: &Path) -> Option<PathBuf> {
    exe_path
        .parent()
        .map(|dir| dir.join(BUNDLED_RESOURCES_FILE))
}

/// Load the bundle packaged alongside `exe_dir`. A missing file is a
/// `ParseError("Bundle is missing resources.json")`.
pub fn load_bundled(exe_dir: &Path) -> Result<Bundle> {
    let path = exe_dir.join(BUNDLED_RESOURCES_FILE);
    if !path.exists() {
        return Err(FuselageError::ParseError(
            "Bundle is missing resources.json".to_string(),
        ));
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| FuselageError::ParseError(format!("cannot read {}: {e}", path.display())))?;
    Bundle::loads(&content)
}

/// As `load_bundled`, but locates the directory from the currently running
/// executable — the deployed self-extracting-archive case.
pub fn load_bundled_from_current_exe() -> Result<Bundle> {
    let exe = std::env::current_exe().map_err(|e| {
        FuselageError::ExecutionError(format!("cannot locate current executable: {e}"))
    })?;
    let dir = exe.parent().ok_or_else(|| {
        FuselageError::ExecutionError("current executable has no parent directory".to_string())
    })?;
    load_bundled(dir)
}
