//! `Link` resource — create/amend/remove a symlink.

use super::require_str;
use crate::argument::coerce_full_path;
use crate::change::{Change, RunnerCtx, ShellCommand};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct LinkArgs {
    pub name: String,
    pub to: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

pub const POLICIES: &[PolicySpec] = &[
    PolicySpec {
        name: "apply",
        default: true,
        signature: Assertion::And(vec![Assertion::Present("name"), Assertion::Present("to")]),
    },
    PolicySpec {
        name: "remove",
        default: false,
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Absent("to"),
            Assertion::Absent("owner"),
            Assertion::Absent("group"),
        ]),
    },
];

pub fn build(raw: &Map<String, Value>) -> Result<LinkArgs> {
    let name = coerce_full_path(&Value::String(require_str(raw, "name", "Link")?))?;
    let to = match raw.get("to") {
        Some(v) => Some(coerce_full_path(v)?),
        None => None,
    };
    Ok(LinkArgs {
        name,
        to,
        owner: super::get_str(raw, "owner"),
        group: super::get_str(raw, "group"),
    })
}

fn run(argv: Vec<String>, ctx: &RunnerCtx) -> Result<bool> {
    Change::ShellCommand(ShellCommand {
        command: argv,
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

pub fn apply(args: &LinkArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    match policy_name {
        "apply" => apply_create(args, ctx),
        "remove" => apply_remove(args, ctx),
        other => Err(FuselageError::NoSuitableProviders(format!(
            "Link has no provider for policy '{other}'"
        ))),
    }
}

fn apply_create(args: &LinkArgs, ctx: &RunnerCtx) -> Result<bool> {
    let to = args.to.as_ref().expect("validated by policy signature");
    if !ctx.platform.exists(to) {
        ctx.raise_or_log(FuselageError::DanglingSymlink(format!(
            "destination of symlink '{to}' does not exist"
        )))?;
    }

    let mut changed = false;
    let current_target = if ctx.platform.islink(&args.name) {
        ctx.platform.readlink(&args.name).ok()
    } else {
        None
    };

    if current_target.as_deref() != Some(to.as_str()) {
        if ctx.platform.lexists(&args.name) {
            run(vec!["rm".to_string(), "-rf".to_string(), args.name.clone()], ctx)?;
        }
        run(vec!["ln".to_string(), "-s".to_string(), to.clone(), args.name.clone()], ctx)?;
        changed = true;
    }

    if !ctx.platform.islink(&args.name) {
        if ctx.simulate {
            return Ok(changed);
        }
        return Err(FuselageError::OperationFailed(
            "did not create expected symbolic link".to_string(),
        ));
    }

    let current = ctx.platform.lstat(&args.name)?;

    if let Some(ref owner) = args.owner {
        let target_uid = match ctx.platform.getpwnam(owner) {
            Ok(entry) => Some(entry.uid),
            Err(e) => {
                ctx.raise_or_log(e)?;
                None
            }
        };
        if target_uid.is_some_and(|uid| uid != current.uid) {
            run(
                vec!["chown".to_string(), "-h".to_string(), owner.clone(), args.name.clone()],
                ctx,
            )?;
            changed = true;
        }
    }

    if let Some(ref group) = args.group {
        let target_gid = match ctx.platform.getgrnam(group) {
            Ok(entry) => Some(entry.gid),
            Err(e) => {
                ctx.raise_or_log(e)?;
                None
            }
        };
        if target_gid.is_some_and(|gid| gid != current.gid) {
            run(
                vec!["chgrp".to_string(), "-h".to_string(), group.clone(), args.name.clone()],
                ctx,
            )?;
            changed = true;
        }
    }

    Ok(changed)
}

fn apply_remove(args: &LinkArgs, ctx: &RunnerCtx) -> Result<bool> {
    if !ctx.platform.lexists(&args.name) {
        return Ok(false);
    }
    if !ctx.platform.islink(&args.name) {
        return Err(FuselageError::ExecutionError(format!(
            "{} exists and is not a link",
            args.name
        )));
    }
    run(vec!["rm".to_string(), args.name.clone()], ctx)
}

pub fn serialize(args: &LinkArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    if let Some(ref to) = args.to {
        map.insert("to".to_string(), Value::String(to.clone()));
    }
    if let Some(ref owner) = args.owner {
        map.insert("owner".to_string(), Value::String(owner.clone()));
    }
    if let Some(ref group) = args.group {
        map.insert("group".to_string(), Value::String(group.clone()));
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
    fn test_create_link_then_noop() {
        let dir = tempfile::tempdir().unwrap();
        let link_path = dir.path().join("lnk").to_string_lossy().to_string();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({"name": link_path, "to": "/etc"}))).unwrap();

        assert!(apply(&args, "apply", &ctx).unwrap());
        assert!(platform.islink(&args.name));
        assert!(!apply(&args, "apply", &ctx).unwrap());
    }

    #[test]
    fn test_remove_missing_link_is_noop() {
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({"name": "/no/such/link-for-fuselage-tests"}))).unwrap();
        assert!(!apply(&args, "remove", &ctx).unwrap());
    }
}
