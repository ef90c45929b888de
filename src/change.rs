//! Changes — the five canonical idempotent operators providers compose.
//!
//! Each `Change` variant reports whether it mutated the system, honours the
//! runner's simulate flag, and is itself a leaf of the discriminated union
//! `Change` rather than a trait object — there are exactly five shapes, so
//! matching beats dynamic dispatch.

use crate::error::{FuselageError, Result};
use crate::platform::{CheckCallOptions, PlatformAdapter};
use std::collections::HashMap;

/// Shared apply context: the platform adapter and whether this is a dry
/// (simulate) run.
pub struct RunnerCtx<'a> {
    pub platform: &'a dyn PlatformAdapter,
    pub simulate: bool,
}

impl<'a> RunnerCtx<'a> {
    pub fn new(platform: &'a dyn PlatformAdapter, simulate: bool) -> Self {
        Self { platform, simulate }
    }

    /// `raise_or_log`: raise `err` when not simulating; under simulate, log
    /// to stderr and continue. Used for errors that depend on system state
    /// an operator might fix before the real apply (missing user/group/path/
    /// binary).
    pub fn raise_or_log(&self, err: FuselageError) -> Result<()> {
        if self.simulate {
            eprintln!("[simulate] would fail: {err}");
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub command: Vec<String>,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub umask: Option<u32>,
    pub expected: i32,
    pub stdin: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct EnsureContents {
    pub path: String,
    pub contents: Option<Vec<u8>>,
    pub sensitive: bool,
}

#[derive(Debug, Clone)]
pub struct EnsureFile {
    pub path: String,
    pub contents: Option<Vec<u8>>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
    pub sensitive: bool,
}

#[derive(Debug, Clone)]
pub struct AttributeChanger {
    pub path: String,
    pub user: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct EnsureDirectory {
    pub path: String,
    pub user: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
    pub recursive: bool,
}

#[derive(Debug, Clone)]
pub enum Change {
    ShellCommand(ShellCommand),
    EnsureContents(EnsureContents),
    EnsureFile(EnsureFile),
    AttributeChanger(AttributeChanger),
    EnsureDirectory(EnsureDirectory),
}

impl Change {
    pub fn apply(&self, ctx: &RunnerCtx) -> Result<bool> {
        match self {
            Change::ShellCommand(c) => apply_shell_command(c, ctx),
            Change::EnsureContents(c) => apply_ensure_contents(c, ctx),
            Change::EnsureFile(c) => apply_ensure_file(c, ctx),
            Change::AttributeChanger(c) => apply_attribute_changer(c, ctx),
            Change::EnsureDirectory(c) => apply_ensure_directory(c, ctx),
        }
    }
}

/// Split a shell string by POSIX shlex rules (single/double quoting,
/// backslash escapes, whitespace separation). Accepts either an argv list
/// (caller already split) or a single command string.
pub fn shlex_split(command: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut has_token = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_token = true;
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    words.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_single || in_double {
        return Err(FuselageError::ParseError(
            "unterminated quote in shell command".to_string(),
        ));
    }
    if has_token {
        words.push(current);
    }
    Ok(words)
}

/// Verify the target binary exists: absolute path, `./relative` under cwd,
/// or search in `PATH`.
fn binary_exists(binary: &str, cwd: Option<&str>, platform: &dyn PlatformAdapter) -> bool {
    if binary.starts_with('/') {
        return platform.isfile(binary);
    }
    if let Some(rest) = binary.strip_prefix("./") {
        let base = cwd.unwrap_or(".");
        let candidate = format!("{base}/{rest}");
        return platform.isfile(&candidate);
    }
    if let Ok(path_var) = std::env::var("PATH") {
        for dir in path_var.split(':') {
            let candidate = format!("{dir}/{binary}");
            if platform.isfile(&candidate) {
                return true;
            }
        }
    }
    false
}

fn apply_shell_command(cmd: &ShellCommand, ctx: &RunnerCtx) -> Result<bool> {
    if cmd.command.is_empty() {
        return Err(FuselageError::BinaryMissing("empty command".to_string()));
    }

    if !binary_exists(&cmd.command[0], cmd.cwd.as_deref(), ctx.platform) {
        ctx.raise_or_log(FuselageError::BinaryMissing(cmd.command[0].clone()))?;
        if ctx.simulate {
            return Ok(true);
        }
    }

    if let Some(ref user) = cmd.user {
        if let Err(e) = ctx.platform.getpwnam(user) {
            ctx.raise_or_log(e)?;
        }
    }
    if let Some(ref group) = cmd.group {
        if let Err(e) = ctx.platform.getgrnam(group) {
            ctx.raise_or_log(e)?;
        }
    }

    if let Some(ref cwd) = cmd.cwd {
        if !ctx.platform.isdir(cwd) {
            ctx.raise_or_log(FuselageError::PathComponentNotDirectory(cwd.clone()))?;
        }
    }

    if ctx.simulate {
        eprintln!("[simulate] would run: {}", cmd.command.join(" "));
        return Ok(true);
    }

    let opts = CheckCallOptions {
        cwd: cmd.cwd.clone(),
        user: cmd.user.clone(),
        group: cmd.group.clone(),
        umask: cmd.umask,
        env: cmd.env.clone(),
        expected: cmd.expected,
        stdin: cmd.stdin.clone(),
    };
    ctx.platform.check_call(&cmd.command, &opts)?;
    // ShellCommand always reports changed: idempotence is the calling
    // provider's responsibility, not the command's.
    Ok(true)
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|&b| b == 0)
}

fn apply_ensure_contents(c: &EnsureContents, ctx: &RunnerCtx) -> Result<bool> {
    let desired = c.contents.clone().unwrap_or_default();

    let current = if ctx.platform.isfile(&c.path) {
        Some(ctx.platform.get(&c.path)?)
    } else {
        None
    };

    let unchanged = current.as_deref() == Some(desired.as_slice());
    if unchanged {
        return Ok(false);
    }

    if c.sensitive || current.as_deref().map(looks_binary).unwrap_or(false) || looks_binary(&desired)
    {
        eprintln!("{}: No diff (binary or sensitive content)", c.path);
    } else {
        eprintln!("{}: contents changed", c.path);
    }

    if !ctx.simulate {
        ctx.platform.put(&c.path, &desired, None)?;
    }
    Ok(true)
}

fn resolve_mode_change(path: &str, desired: u32, platform: &dyn PlatformAdapter) -> Option<u32> {
    let current_mode = platform.stat(path).ok().map(|m| m.mode);
    match current_mode {
        Some(m) if m == desired => None,
        _ => Some(desired),
    }
}

fn apply_attribute_changer(c: &AttributeChanger, ctx: &RunnerCtx) -> Result<bool> {
    if !ctx.platform.exists(&c.path) {
        return Ok(false);
    }

    let current = ctx.platform.stat(&c.path)?;
    let mut changed = false;

    if let Some(ref user) = c.user {
        let target_uid = match ctx.platform.getpwnam(user) {
            Ok(entry) => Some(entry.uid),
            Err(e) => {
                ctx.raise_or_log(e)?;
                None
            }
        };
        if let Some(uid) = target_uid {
            if uid != current.uid {
                changed = true;
                if !ctx.simulate {
                    ctx.platform.check_call(
                        &["chown".to_string(), user.clone(), c.path.clone()],
                        &CheckCallOptions::default(),
                    )?;
                }
            }
        }
    }

    if let Some(ref group) = c.group {
        let target_gid = match ctx.platform.getgrnam(group) {
            Ok(entry) => Some(entry.gid),
            Err(e) => {
                ctx.raise_or_log(e)?;
                None
            }
        };
        if let Some(gid) = target_gid {
            if gid != current.gid {
                changed = true;
                if !ctx.simulate {
                    ctx.platform.check_call(
                        &["chgrp".to_string(), group.clone(), c.path.clone()],
                        &CheckCallOptions::default(),
                    )?;
                }
            }
        }
    }

    if let Some(mode) = c.mode {
        if let Some(new_mode) = resolve_mode_change(&c.path, mode, ctx.platform) {
            changed = true;
            // Clear setuid/setgid symbolically when the target mode removes
            // them (mode has no 4000/2000 bit but current does).
            if !ctx.simulate {
                ctx.platform.check_call(
                    &[
                        "chmod".to_string(),
                        format!("{new_mode:o}"),
                        c.path.clone(),
                    ],
                    &CheckCallOptions::default(),
                )?;
                if current.mode & 0o6000 != 0 && new_mode & 0o6000 == 0 {
                    ctx.platform.check_call(
                        &["chmod".to_string(), "u-s,g-s".to_string(), c.path.clone()],
                        &CheckCallOptions::default(),
                    )?;
                }
            }
        }
    }

    Ok(changed)
}

fn apply_ensure_file(c: &EnsureFile, ctx: &RunnerCtx) -> Result<bool> {
    let contents_changed = apply_ensure_contents(
        &EnsureContents {
            path: c.path.clone(),
            contents: c.contents.clone(),
            sensitive: c.sensitive,
        },
        ctx,
    )?;

    let attrs_changed = apply_attribute_changer(
        &AttributeChanger {
            path: c.path.clone(),
            user: c.user.clone(),
            group: c.group.clone(),
            mode: c.mode,
        },
        ctx,
    )?;

    Ok(contents_changed || attrs_changed)
}

fn apply_ensure_directory(c: &EnsureDirectory, ctx: &RunnerCtx) -> Result<bool> {
    let mut changed = false;
    if !ctx.platform.isdir(&c.path) {
        changed = true;
        if !ctx.simulate {
            if c.recursive {
                ctx.platform.makedirs(&c.path)?;
            } else {
                ctx.platform.check_call(
                    &["mkdir".to_string(), c.path.clone()],
                    &CheckCallOptions::default(),
                )?;
            }
        }
    }

    let attrs_changed = apply_attribute_changer(
        &AttributeChanger {
            path: c.path.clone(),
            user: c.user.clone(),
            group: c.group.clone(),
            mode: c.mode,
        },
        ctx,
    )?;

    Ok(changed || attrs_changed)
}

/// Substitute a literal environment map into a `Vec<(String,String)>`,
/// matching the shape `check_call` expects.
pub fn env_vec(env: &HashMap<String, String>) -> Vec<(String, String)> {
    env.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::local::LocalPlatform;

    #[test]
    fn test_shlex_split_honours_quoting() {
        let words = shlex_split("echo 'hello world' \"quoted\\\"inner\"").unwrap();
        assert_eq!(words, vec!["echo", "hello world", "quoted\"inner"]);
    }

    #[test]
    fn test_shlex_split_unterminated_quote_errors() {
        assert!(shlex_split("echo 'unterminated").is_err());
    }

    #[test]
    fn test_ensure_contents_applied_twice_second_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt").to_string_lossy().to_string();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);

        let change = EnsureContents {
            path: path.clone(),
            contents: Some(b"hi".to_vec()),
            sensitive: false,
        };
        assert!(change.apply_for_test(&ctx).unwrap());
        assert!(!change.apply_for_test(&ctx).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"hi");
    }

    impl EnsureContents {
        fn apply_for_test(&self, ctx: &RunnerCtx) -> Result<bool> {
            apply_ensure_contents(self, ctx)
        }
    }

    #[test]
    fn test_attribute_changer_noop_when_matching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"x").unwrap();
        let path_str = path.to_string_lossy().to_string();

        let platform = LocalPlatform::new();
        let current = platform.stat(&path_str).unwrap();
        let ctx = RunnerCtx::new(&platform, false);

        let change = Change::AttributeChanger(AttributeChanger {
            path: path_str,
            user: None,
            group: None,
            mode: Some(current.mode),
        });
        assert!(!change.apply(&ctx).unwrap());
    }

    #[test]
    fn test_attribute_changer_corrects_group_even_when_owner_already_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"x").unwrap();
        let path_str = path.to_string_lossy().to_string();

        let platform = LocalPlatform::new();
        let current = platform.stat(&path_str).unwrap();
        let owner = platform.getpwuid(current.uid).unwrap().name;
        let desired_group = platform.getgrnam("daemon");
        if desired_group.is_err() || current.gid == desired_group.as_ref().unwrap().gid {
            // no usable fixture group on this host; nothing to assert.
            return;
        }
        let ctx = RunnerCtx::new(&platform, false);

        // Owner already matches; group does not. A naive implementation
        // that only checks group when `user` is absent would wrongly
        // report unchanged here.
        let change = Change::AttributeChanger(AttributeChanger {
            path: path_str.clone(),
            user: Some(owner),
            group: Some("daemon".to_string()),
            mode: None,
        });
        assert!(change.apply(&ctx).unwrap());
        assert_eq!(platform.stat(&path_str).unwrap().gid, desired_group.unwrap().gid);
    }

    #[test]
    fn test_shell_command_missing_binary_raises_under_real_run() {
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let change = Change::ShellCommand(ShellCommand {
            command: vec!["/no/such/binary".to_string()],
            cwd: None,
            env: vec![],
            user: None,
            group: None,
            umask: None,
            expected: 0,
            stdin: None,
        });
        let err = change.apply(&ctx);
        assert!(matches!(err, Err(FuselageError::BinaryMissing(_))));
    }

    #[test]
    fn test_shell_command_missing_binary_logs_under_simulate() {
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, true);
        let change = Change::ShellCommand(ShellCommand {
            command: vec!["/no/such/binary".to_string()],
            cwd: None,
            env: vec![],
            user: None,
            group: None,
            umask: None,
            expected: 0,
            stdin: None,
        });
        assert!(change.apply(&ctx).unwrap());
    }

    #[test]
    fn test_ensure_directory_creates_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c").to_string_lossy().to_string();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);

        let change = Change::EnsureDirectory(EnsureDirectory {
            path: nested.clone(),
            user: None,
            group: None,
            mode: None,
            recursive: true,
        });
        assert!(change.apply(&ctx).unwrap());
        assert!(platform.isdir(&nested));
        assert!(!change.apply(&ctx).unwrap());
    }
}
