//! `Group` resource — create/amend/remove a POSIX group via
//! `groupadd`/`groupmod`/`groupdel`.

use super::require_str;
use crate::argument::coerce_integer;
use crate::change::{Change, RunnerCtx, ShellCommand};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct GroupArgs {
    pub name: String,
    pub gid: Option<i64>,
}

pub const POLICIES: &[PolicySpec] = &[
    PolicySpec {
        name: "apply",
        default: true,
        signature: Assertion::Present("name"),
    },
    PolicySpec {
        name: "remove",
        default: false,
        signature: Assertion::And(vec![Assertion::Present("name"), Assertion::Absent("gid")]),
    },
];

pub fn build(raw: &Map<String, Value>) -> Result<GroupArgs> {
    let name = require_str(raw, "name", "Group")?;
    let gid = match raw.get("gid") {
        Some(v) => Some(coerce_integer(v)?),
        None => None,
    };
    Ok(GroupArgs { name, gid })
}

fn run(command: Vec<String>, ctx: &RunnerCtx) -> Result<bool> {
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

pub fn apply(args: &GroupArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    match policy_name {
        "apply" => apply_create_or_amend(args, ctx),
        "remove" => apply_remove(args, ctx),
        other => Err(FuselageError::NoSuitableProviders(format!(
            "Group has no provider for policy '{other}'"
        ))),
    }
}

fn apply_remove(args: &GroupArgs, ctx: &RunnerCtx) -> Result<bool> {
    if ctx.platform.getgrnam(&args.name).is_err() {
        return Ok(false);
    }
    run(vec!["groupdel".to_string(), args.name.clone()], ctx)
}

fn apply_create_or_amend(args: &GroupArgs, ctx: &RunnerCtx) -> Result<bool> {
    let existing = ctx.platform.getgrnam(&args.name).ok();

    let mut command;
    let changed;
    if let Some(ref info) = existing {
        command = vec!["groupmod".to_string()];
        changed = args.gid.map(|gid| gid as u32 != info.gid).unwrap_or(false);
        if changed {
            command.push("--gid".to_string());
            command.push(args.gid.unwrap().to_string());
        }
    } else {
        command = vec!["groupadd".to_string()];
        changed = true;
        if let Some(gid) = args.gid {
            command.push("--gid".to_string());
            command.push(gid.to_string());
        }
    }

    if !changed {
        return Ok(false);
    }
    command.push(args.name.clone());
    run(command, ctx)
}

pub fn serialize(args: &GroupArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    if let Some(gid) = args.gid {
        map.insert("gid".to_string(), Value::Number(gid.into()));
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
    fn test_build_gid_optional() {
        let args = build(&raw(json!({"name": "deploy"}))).unwrap();
        assert!(args.gid.is_none());
    }

    #[test]
    fn test_remove_missing_group_is_noop() {
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({"name": "no-such-fuselage-test-group"}))).unwrap();
        assert!(!apply(&args, "remove", &ctx).unwrap());
    }

    #[test]
    fn test_remove_policy_rejects_gid() {
        use crate::resource::Resource;
        let raw_map = raw(json!({"name": "deploy", "policy": "remove", "gid": 1000}));
        let err = Resource::new("Group", raw_map);
        assert!(matches!(err, Err(FuselageError::NonConformingPolicy(_))));
    }
}
