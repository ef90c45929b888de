//! `LocalPlatform` — the platform adapter's only shipped implementation.
//!
//! Reads `/etc/passwd`/`/etc/group` directly (plain, stable, line-oriented
//! formats; no crate in the dependency set wraps them) and shells out via
//! `sudo -u USER -g GROUP` for privilege switching, the way
//! `transport::local`/`transport::ssh` already shell out to `bash`/`ssh`
//! rather than calling libc. The workspace forbids `unsafe_code`, so no
//! direct `setuid`/`setgid` syscalls are available here anyway.

use super::{CheckCallOptions, CommandOutput, GroupEntry, Metadata, PasswdEntry, PlatformAdapter};
use crate::error::{FuselageError, Result};
use std::io::Write;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::process::{Command, Stdio};

#[derive(Debug, Default)]
pub struct LocalPlatform;

impl LocalPlatform {
    pub fn new() -> Self {
        Self
    }

    fn read_metadata(path: &str, follow_symlinks: bool) -> Result<Metadata> {
        let meta = if follow_symlinks {
            std::fs::metadata(path)
        } else {
            std::fs::symlink_metadata(path)
        }
        .map_err(|e| FuselageError::ExecutionError(format!("stat {path}: {e}")))?;

        Ok(Metadata {
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.permissions().mode() & 0o7777,
            is_dir: meta.is_dir(),
            is_symlink: meta.file_type().is_symlink(),
        })
    }
}

impl PlatformAdapter for LocalPlatform {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn isfile(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }

    fn isdir(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }

    fn islink(&self, path: &str) -> bool {
        std::fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    fn lexists(&self, path: &str) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        Self::read_metadata(path, true)
    }

    fn lstat(&self, path: &str) -> Result<Metadata> {
        Self::read_metadata(path, false)
    }

    fn readlink(&self, path: &str) -> Result<String> {
        std::fs::read_link(path)
            .map(|p| p.to_string_lossy().to_string())
            .map_err(|e| FuselageError::DanglingSymlink(format!("readlink {path}: {e}")))
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| FuselageError::ExecutionError(format!("read {path}: {e}")))
    }

    fn put(&self, path: &str, contents: &[u8], mode: Option<u32>) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| FuselageError::ExecutionError(format!("mkdir {path}: {e}")))?;
            }
        }
        let tmp_path = format!("{path}.fuselage.tmp");
        std::fs::write(&tmp_path, contents)
            .map_err(|e| FuselageError::ExecutionError(format!("write {tmp_path}: {e}")))?;
        if let Some(mode) = mode {
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(mode))
                .map_err(|e| FuselageError::ExecutionError(format!("chmod {tmp_path}: {e}")))?;
        }
        std::fs::rename(&tmp_path, path)
            .map_err(|e| FuselageError::ExecutionError(format!("rename to {path}: {e}")))
    }

    fn makedirs(&self, path: &str) -> Result<()> {
        std::fs::create_dir_all(path)
            .map_err(|e| FuselageError::ExecutionError(format!("mkdir -p {path}: {e}")))
    }

    fn unlink(&self, path: &str) -> Result<()> {
        std::fs::remove_file(path)
            .map_err(|e| FuselageError::ExecutionError(format!("unlink {path}: {e}")))
    }

    fn check_call(&self, argv: &[String], opts: &CheckCallOptions) -> Result<CommandOutput> {
        if argv.is_empty() {
            return Err(FuselageError::BinaryMissing("empty command".to_string()));
        }

        let mut command = if opts.user.is_some() || opts.group.is_some() {
            let mut sudo = Command::new("sudo");
            sudo.arg("-n");
            if let Some(ref user) = opts.user {
                sudo.args(["-u", user]);
            }
            if let Some(ref group) = opts.group {
                sudo.args(["-g", group]);
            }
            sudo.arg("--");
            sudo.args(argv);
            sudo
        } else {
            let mut c = Command::new(&argv[0]);
            c.args(&argv[1..]);
            c
        };

        if let Some(ref cwd) = opts.cwd {
            command.current_dir(cwd);
        }
        for (k, v) in &opts.env {
            command.env(k, v);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| FuselageError::BinaryMissing(format!("{}: {e}", argv[0])))?;

        if let Some(ref input) = opts.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(input);
            }
        } else {
            drop(child.stdin.take());
        }

        let output = child
            .wait_with_output()
            .map_err(|e| FuselageError::ExecutionError(format!("wait: {e}")))?;

        let returncode = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if returncode != opts.expected {
            return Err(FuselageError::command_error(returncode, &stdout, &stderr));
        }

        Ok(CommandOutput {
            returncode,
            stdout,
            stderr,
        })
    }

    fn getpwnam(&self, name: &str) -> Result<PasswdEntry> {
        read_passwd()?
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| FuselageError::InvalidUser(name.to_string()))
    }

    fn getpwuid(&self, uid: u32) -> Result<PasswdEntry> {
        read_passwd()?
            .into_iter()
            .find(|e| e.uid == uid)
            .ok_or_else(|| FuselageError::InvalidUser(uid.to_string()))
    }

    fn getpwall(&self) -> Result<Vec<PasswdEntry>> {
        read_passwd()
    }

    fn getgrnam(&self, name: &str) -> Result<GroupEntry> {
        read_group()?
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| FuselageError::InvalidGroup(name.to_string()))
    }

    fn getgrgid(&self, gid: u32) -> Result<GroupEntry> {
        read_group()?
            .into_iter()
            .find(|e| e.gid == gid)
            .ok_or_else(|| FuselageError::InvalidGroup(gid.to_string()))
    }

    fn getgrall(&self) -> Result<Vec<GroupEntry>> {
        read_group()
    }

    fn getuid(&self) -> u32 {
        std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0)
    }
}

fn read_passwd() -> Result<Vec<PasswdEntry>> {
    let content = std::fs::read_to_string("/etc/passwd")
        .map_err(|e| FuselageError::ExecutionError(format!("read /etc/passwd: {e}")))?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 {
            continue;
        }
        let (Ok(uid), Ok(gid)) = (fields[2].parse(), fields[3].parse()) else {
            continue;
        };
        entries.push(PasswdEntry {
            name: fields[0].to_string(),
            uid,
            gid,
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
        });
    }
    Ok(entries)
}

fn read_group() -> Result<Vec<GroupEntry>> {
    let content = std::fs::read_to_string("/etc/group")
        .map_err(|e| FuselageError::ExecutionError(format!("read /etc/group: {e}")))?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 4 {
            continue;
        }
        let Ok(gid) = fields[2].parse() else {
            continue;
        };
        let members = if fields[3].is_empty() {
            Vec::new()
        } else {
            fields[3].split(',').map(|s| s.to_string()).collect()
        };
        entries.push(GroupEntry {
            name: fields[0].to_string(),
            gid,
            members,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_platform_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let platform = LocalPlatform::new();
        let path_str = path.to_string_lossy().to_string();

        assert!(!platform.exists(&path_str));
        platform.put(&path_str, b"hello", Some(0o640)).unwrap();
        assert!(platform.exists(&path_str));
        assert!(platform.isfile(&path_str));
        assert_eq!(platform.get(&path_str).unwrap(), b"hello");

        let meta = platform.stat(&path_str).unwrap();
        assert_eq!(meta.mode, 0o640);
    }

    #[test]
    fn test_local_platform_makedirs_and_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        let platform = LocalPlatform::new();
        let nested_str = nested.to_string_lossy().to_string();
        platform.makedirs(&nested_str).unwrap();
        assert!(platform.isdir(&nested_str));

        let file = nested.join("f.txt");
        let file_str = file.to_string_lossy().to_string();
        platform.put(&file_str, b"x", None).unwrap();
        platform.unlink(&file_str).unwrap();
        assert!(!platform.exists(&file_str));
    }

    #[test]
    fn test_getpwnam_resolves_root() {
        let platform = LocalPlatform::new();
        let entry = platform.getpwnam("root").unwrap();
        assert_eq!(entry.uid, 0);
    }

    #[test]
    fn test_getpwnam_unknown_user_is_invalid_user() {
        let platform = LocalPlatform::new();
        let err = platform.getpwnam("no-such-user-ought-to-exist");
        assert!(matches!(err, Err(FuselageError::InvalidUser(_))));
    }

    #[test]
    fn test_getgrnam_unknown_group_is_invalid_group() {
        let platform = LocalPlatform::new();
        let err = platform.getgrnam("no-such-group-ought-to-exist");
        assert!(matches!(err, Err(FuselageError::InvalidGroup(_))));
    }

    #[test]
    fn test_check_call_reports_unexpected_return_code() {
        let platform = LocalPlatform::new();
        let opts = CheckCallOptions {
            expected: 0,
            ..Default::default()
        };
        let err = platform.check_call(&["false".to_string()], &opts);
        assert!(matches!(err, Err(FuselageError::CommandError(_))));
    }

    #[test]
    fn test_check_call_honours_expected_code() {
        let platform = LocalPlatform::new();
        let opts = CheckCallOptions {
            expected: 7,
            ..Default::default()
        };
        let out = platform
            .check_call(
                &["sh".to_string(), "-c".to_string(), "exit 7".to_string()],
                &opts,
            )
            .unwrap();
        assert_eq!(out.returncode, 7);
    }

    #[test]
    fn test_check_call_missing_binary_is_binary_missing() {
        let platform = LocalPlatform::new();
        let opts = CheckCallOptions::default();
        let err = platform.check_call(&["/no/such/binary".to_string()], &opts);
        assert!(matches!(err, Err(FuselageError::BinaryMissing(_))));
    }
}
