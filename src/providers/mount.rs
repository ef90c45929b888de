//! `Mount` resource — mount a filesystem, idempotent against
//! `/proc/mounts`.

use super::require_str;
use crate::argument::coerce_full_path;
use crate::change::{Change, RunnerCtx, ShellCommand};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct MountArgs {
    pub name: String,
    pub fs_type: String,
    pub options: String,
    pub device: String,
}

pub const POLICIES: &[PolicySpec] = &[PolicySpec {
    name: "apply",
    default: true,
    signature: Assertion::And(vec![
        Assertion::Present("name"),
        Assertion::Present("fs_type"),
        Assertion::Present("device"),
    ]),
}];

pub fn build(raw: &Map<String, Value>) -> Result<MountArgs> {
    let name = coerce_full_path(&Value::String(require_str(raw, "name", "Mount")?))?;
    let device = coerce_full_path(&Value::String(require_str(raw, "device", "Mount")?))?;
    let fs_type = require_str(raw, "fs_type", "Mount")?;
    let options = super::get_str(raw, "options").unwrap_or_else(|| "defaults".to_string());
    Ok(MountArgs {
        name,
        fs_type,
        options,
        device,
    })
}

fn is_mounted(ctx: &RunnerCtx, mountpoint: &str) -> Result<bool> {
    let contents = ctx.platform.get("/proc/mounts")?;
    let text = String::from_utf8_lossy(&contents);
    Ok(text.lines().any(|line| {
        line.split_whitespace().nth(1) == Some(mountpoint)
    }))
}

pub fn apply(args: &MountArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    if policy_name != "apply" {
        return Err(FuselageError::NoSuitableProviders(format!(
            "Mount has no provider for policy '{policy_name}'"
        )));
    }

    if let Err(e) = crate::platform::check_path_components(ctx.platform, &args.name) {
        ctx.raise_or_log(e)?;
    }

    if is_mounted(ctx, &args.name)? {
        return Ok(false);
    }

    let mut command = vec!["mount".to_string()];
    if args.fs_type == "bind" {
        command.push("--bind".to_string());
    } else if !args.fs_type.is_empty() {
        command.push("-t".to_string());
        command.push(args.fs_type.clone());
    }
    command.push(args.device.clone());
    command.push(args.name.clone());
    if !args.options.is_empty() {
        command.push("-o".to_string());
        command.push(args.options.clone());
    }

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

pub fn serialize(args: &MountArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    map.insert("fs_type".to_string(), Value::String(args.fs_type.clone()));
    map.insert("options".to_string(), Value::String(args.options.clone()));
    map.insert("device".to_string(), Value::String(args.device.clone()));
    Value::Object(map)
}
