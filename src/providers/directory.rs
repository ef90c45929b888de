//! `Directory` resource — create/amend/remove a directory.

use super::require_str;
use crate::argument::{coerce_boolean, coerce_full_path, coerce_octal};
use crate::change::{Change, EnsureDirectory, RunnerCtx, ShellCommand};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct DirectoryArgs {
    pub name: String,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
    pub parents: bool,
}

/// The mode a freshly-created directory gets when the caller never supplied
/// one.
const DEFAULT_MODE: u32 = 0o755;

pub const POLICIES: &[PolicySpec] = &[
    PolicySpec {
        name: "apply",
        default: true,
        signature: Assertion::Present("name"),
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
        name: "remove-recursive",
        default: false,
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Absent("owner"),
            Assertion::Absent("group"),
            Assertion::Absent("mode"),
        ]),
    },
];

pub fn build(raw: &Map<String, Value>) -> Result<DirectoryArgs> {
    let name = coerce_full_path(&Value::String(require_str(raw, "name", "Directory")?))?;
    let owner = super::get_str(raw, "owner");
    let group = super::get_str(raw, "group");
    let mode = match raw.get("mode") {
        Some(v) => Some(coerce_octal(v)?),
        None => None,
    };
    let parents = match raw.get("parents") {
        Some(v) => coerce_boolean(v)?,
        None => false,
    };
    Ok(DirectoryArgs {
        name,
        owner,
        group,
        mode,
        parents,
    })
}

pub fn apply(args: &DirectoryArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    match policy_name {
        "apply" => apply_create(args, ctx),
        "remove" => apply_remove(args, ctx, false),
        "remove-recursive" => apply_remove(args, ctx, true),
        other => Err(FuselageError::NoSuitableProviders(format!(
            "Directory has no provider for policy '{other}'"
        ))),
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => "",
    }
}

fn apply_create(args: &DirectoryArgs, ctx: &RunnerCtx) -> Result<bool> {
    let parent = parent_of(&args.name);
    if !parent.is_empty() && !ctx.platform.isdir(parent) {
        if args.parents {
            // ancestors will be created by EnsureDirectory's recursive mkdir
        } else if let Err(e) = crate::platform::check_path_components(ctx.platform, parent) {
            ctx.raise_or_log(e)?;
        }
    }

    Change::EnsureDirectory(EnsureDirectory {
        path: args.name.clone(),
        user: args.owner.clone(),
        group: args.group.clone(),
        mode: Some(args.mode.unwrap_or(DEFAULT_MODE)),
        recursive: args.parents,
    })
    .apply(ctx)
}

fn apply_remove(args: &DirectoryArgs, ctx: &RunnerCtx, recursive: bool) -> Result<bool> {
    if ctx.platform.exists(&args.name) && !ctx.platform.isdir(&args.name) {
        return Err(FuselageError::ExecutionError(format!(
            "{} exists and is not a directory",
            args.name
        )));
    }
    if !ctx.platform.exists(&args.name) {
        return Ok(false);
    }
    let command = if recursive {
        vec!["rm".to_string(), "-rf".to_string(), args.name.clone()]
    } else {
        vec!["rmdir".to_string(), args.name.clone()]
    };
    Change::ShellCommand(ShellCommand {
        command,
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

pub fn serialize(args: &DirectoryArgs) -> Value {
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
    if args.parents {
        map.insert("parents".to_string(), Value::Bool(true));
    }
    Value::Object(map)
}
