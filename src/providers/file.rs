//! `File` resource — create/amend a file's contents and attributes, remove
//! it, or watch it for drift.

use super::{get_str, require_str};
use crate::argument::{coerce_boolean, coerce_full_path, coerce_octal, coerce_string};
use crate::change::{Change, EnsureFile, RunnerCtx, ShellCommand};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct FileArgs {
    pub name: String,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
    pub contents: Option<String>,
    pub source: Option<String>,
    pub sensitive: bool,
}

/// The mode a freshly-created file gets when the caller never supplied one.
const DEFAULT_MODE: u32 = 0o644;

pub const POLICIES: &[PolicySpec] = &[
    PolicySpec {
        name: "apply",
        default: true,
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Nand(vec![Assertion::Present("contents"), Assertion::Present("source")]),
        ]),
    },
    PolicySpec {
        name: "remove",
        default: false,
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Absent("owner"),
            Assertion::Absent("group"),
            Assertion::Absent("mode"),
        ]),
    },
    PolicySpec {
        name: "watched",
        default: false,
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Absent("owner"),
            Assertion::Absent("group"),
            Assertion::Absent("mode"),
        ]),
    },
];

pub fn build(raw: &Map<String, Value>) -> Result<FileArgs> {
    let name = coerce_full_path(&Value::String(require_str(raw, "name", "File")?))?;
    let owner = get_str(raw, "owner");
    let group = get_str(raw, "group");
    let mode = match raw.get("mode") {
        Some(v) => Some(coerce_octal(v)?),
        None => None,
    };
    let contents = match raw.get("contents") {
        Some(v) => Some(coerce_string(v)?),
        None => None,
    };
    let source = get_str(raw, "source");
    let sensitive = match raw.get("sensitive") {
        Some(v) => coerce_boolean(v)?,
        None => false,
    };

    Ok(FileArgs {
        name,
        owner,
        group,
        mode,
        contents,
        source,
        sensitive,
    })
}

pub fn apply(
    args: &FileArgs,
    policy_name: &str,
    ctx: &RunnerCtx,
    original_hash: Option<&str>,
) -> Result<bool> {
    match policy_name {
        "apply" => apply_create(args, ctx),
        "remove" => apply_remove(args, ctx),
        "watched" => apply_watched(args, ctx, original_hash),
        other => Err(FuselageError::NoSuitableProviders(format!(
            "File has no provider for policy '{other}'"
        ))),
    }
}

fn apply_create(args: &FileArgs, ctx: &RunnerCtx) -> Result<bool> {
    if let Some(parent) = std::path::Path::new(&args.name).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = crate::platform::check_path_components(ctx.platform, &args.name) {
                ctx.raise_or_log(e)?;
            }
        }
    }

    let contents = if let Some(ref source) = args.source {
        if let Some(reference) = source.strip_prefix("bundle://") {
            return Err(FuselageError::ExecutionError(format!(
                "asset '{reference}' was not resolved before apply"
            )));
        }
        Some(ctx.platform.get(source)?)
    } else {
        args.contents.as_ref().map(|s| s.as_bytes().to_vec())
    };

    let change = Change::EnsureFile(EnsureFile {
        path: args.name.clone(),
        contents,
        user: args.owner.clone(),
        group: args.group.clone(),
        mode: Some(args.mode.unwrap_or(DEFAULT_MODE)),
        sensitive: args.sensitive,
    });
    change.apply(ctx)
}

fn apply_remove(args: &FileArgs, ctx: &RunnerCtx) -> Result<bool> {
    if !ctx.platform.exists(&args.name) {
        return Ok(false);
    }
    if !ctx.platform.isfile(&args.name) {
        return Err(FuselageError::ExecutionError(format!(
            "{} exists and is not a file",
            args.name
        )));
    }
    Change::ShellCommand(ShellCommand {
        command: vec!["rm".to_string(), args.name.clone()],
        cwd: None,
        env: vec![],
        user: None,
        group: None,
        umask: None,
        expected: 0,
        stdin: None,
    })
    .apply(ctx)
}

/// Watched files don't have a policy applied to them; they report changed
/// exactly when their content hash has drifted since the bundle's pre-apply
/// pass.
fn apply_watched(args: &FileArgs, ctx: &RunnerCtx, original_hash: Option<&str>) -> Result<bool> {
    let current = if ctx.platform.isfile(&args.name) {
        crate::tripwire::hasher::hash_file(std::path::Path::new(&args.name)).ok()
    } else {
        None
    };
    Ok(current.as_deref() != original_hash)
}

pub fn serialize(args: &FileArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    if let Some(ref owner) = args.owner {
        map.insert("owner".to_string(), Value::String(owner.clone()));
    }
    if let Some(ref group) = args.group {
        map.insert("group".to_string(), Value::String(group.clone()));
    }
    if let Some(mode) = args.mode {
        map.insert("mode".to_string(), Value::String(format!("{mode:o}")));
    }
    if let Some(ref contents) = args.contents {
        map.insert("contents".to_string(), Value::String(contents.clone()));
    }
    if let Some(ref source) = args.source {
        map.insert("source".to_string(), Value::String(source.clone()));
    }
    if args.sensitive {
        map.insert("sensitive".to_string(), Value::Bool(true));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::local::LocalPlatform;
    use serde_json::json;

    fn raw(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_build_leaves_mode_absent_when_not_supplied() {
        let args = build(&raw(json!({"name": "/tmp/x"}))).unwrap();
        assert_eq!(args.mode, None);
        assert!(serialize(&args).get("mode").is_none());
    }

    #[test]
    fn test_build_keeps_explicit_mode_and_serialises_it() {
        let args = build(&raw(json!({"name": "/tmp/x", "mode": "600"}))).unwrap();
        assert_eq!(args.mode, Some(0o600));
        assert_eq!(serialize(&args).get("mode").unwrap().as_str(), Some("600"));
    }

    #[test]
    fn test_create_then_noop_on_second_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f").to_string_lossy().to_string();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);

        let args = build(&raw(json!({"name": path, "contents": "hi"}))).unwrap();
        assert!(apply(&args, "apply", &ctx, None).unwrap());
        assert_eq!(std::fs::read_to_string(&args.name).unwrap(), "hi");
        assert!(!apply(&args, "apply", &ctx, None).unwrap());
    }

    #[test]
    fn test_remove_missing_file_is_noop() {
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({"name": "/no/such/file-for-fuselage-tests"}))).unwrap();
        assert!(!apply(&args, "remove", &ctx, None).unwrap());
    }

    #[test]
    fn test_watched_detects_drift() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched").to_string_lossy().to_string();
        std::fs::write(&path, b"before").unwrap();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({"name": path}))).unwrap();

        let before_hash = crate::tripwire::hasher::hash_file(std::path::Path::new(&args.name)).unwrap();
        assert!(!apply(&args, "watched", &ctx, Some(&before_hash)).unwrap());

        std::fs::write(&args.name, b"after").unwrap();
        assert!(apply(&args, "watched", &ctx, Some(&before_hash)).unwrap());
    }
}
