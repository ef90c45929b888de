//! The platform adapter — the OS capability surface the core consumes.
//!
//! Specified only as a trait: path predicates, metadata, file I/O, process
//! execution and the user/group database. `local` ships the sole concrete
//! implementation, grounded on direct `std::fs` calls and `sudo`-shelled
//! privilege switching rather than `unsafe` libc bindings.

pub mod local;

use crate::error::Result;
use std::path::Path;

/// `stat`/`lstat` result: the fields the core's Changes actually inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// A passwd(5) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

/// A group(5) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Options accepted by `check_call`.
#[derive(Debug, Clone, Default)]
pub struct CheckCallOptions {
    pub cwd: Option<String>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub umask: Option<u32>,
    pub env: Vec<(String, String)>,
    pub expected: i32,
    pub stdin: Option<Vec<u8>>,
}

/// Output of a `check_call` invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The capability set every Change and Provider is written against.
pub trait PlatformAdapter {
    fn exists(&self, path: &str) -> bool;
    fn isfile(&self, path: &str) -> bool;
    fn isdir(&self, path: &str) -> bool;
    fn islink(&self, path: &str) -> bool;
    fn lexists(&self, path: &str) -> bool;

    fn stat(&self, path: &str) -> Result<Metadata>;
    fn lstat(&self, path: &str) -> Result<Metadata>;
    fn readlink(&self, path: &str) -> Result<String>;

    fn get(&self, path: &str) -> Result<Vec<u8>>;
    fn put(&self, path: &str, contents: &[u8], mode: Option<u32>) -> Result<()>;
    fn makedirs(&self, path: &str) -> Result<()>;
    fn unlink(&self, path: &str) -> Result<()>;

    fn check_call(&self, argv: &[String], opts: &CheckCallOptions) -> Result<CommandOutput>;

    fn getpwnam(&self, name: &str) -> Result<PasswdEntry>;
    fn getpwuid(&self, uid: u32) -> Result<PasswdEntry>;
    fn getpwall(&self) -> Result<Vec<PasswdEntry>>;
    fn getgrnam(&self, name: &str) -> Result<GroupEntry>;
    fn getgrgid(&self, gid: u32) -> Result<GroupEntry>;
    fn getgrall(&self) -> Result<Vec<GroupEntry>>;

    fn getuid(&self) -> u32;
}

/// Resolve `path`'s parent chain the way `AttributeChanger`/`EnsureDirectory`
/// need to: every component but the last must already exist and be a
/// directory, else `PathComponentMissing`/`PathComponentNotDirectory`.
pub fn check_path_components(adapter: &dyn PlatformAdapter, path: &str) -> Result<()> {
    use crate::error::FuselageError;

    let parent = match Path::new(path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };

    let mut cursor = std::path::PathBuf::new();
    for component in parent.components() {
        cursor.push(component);
        let cursor_str = cursor.to_string_lossy().to_string();
        if cursor_str.is_empty() {
            continue;
        }
        if !adapter.exists(&cursor_str) {
            return Err(FuselageError::PathComponentMissing(cursor_str));
        }
        if !adapter.isdir(&cursor_str) && !adapter.islink(&cursor_str) {
            return Err(FuselageError::PathComponentNotDirectory(cursor_str));
        }
    }
    Ok(())
}
