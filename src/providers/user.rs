//! `User` resource — create/amend/remove a POSIX user account via
//! `useradd`/`usermod`/`userdel`.

use super::{get_str, require_str};
use crate::argument::{coerce_boolean, coerce_integer, coerce_list};
use crate::change::{Change, RunnerCtx, ShellCommand};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct UserArgs {
    pub name: String,
    pub fullname: Option<String>,
    pub password: Option<String>,
    pub home: Option<String>,
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub group: Option<String>,
    pub groups: Vec<String>,
    pub append: bool,
    pub shell: Option<String>,
    pub disabled_login: bool,
    pub system: bool,
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
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Absent("fullname"),
            Assertion::Absent("password"),
            Assertion::Absent("home"),
            Assertion::Absent("uid"),
            Assertion::Absent("gid"),
            Assertion::Absent("group"),
        ]),
    },
];

pub fn build(raw: &Map<String, Value>) -> Result<UserArgs> {
    let name = require_str(raw, "name", "User")?;
    let uid = match raw.get("uid") {
        Some(v) => Some(coerce_integer(v)?),
        None => None,
    };
    let gid = match raw.get("gid") {
        Some(v) => Some(coerce_integer(v)?),
        None => None,
    };
    let groups = match raw.get("groups") {
        Some(v) => coerce_list(v)?,
        None => Vec::new(),
    };
    let append = match raw.get("append") {
        Some(v) => coerce_boolean(v)?,
        None => false,
    };
    let disabled_login = match raw.get("disabled_login") {
        Some(v) => coerce_boolean(v)?,
        None => false,
    };
    let system = match raw.get("system") {
        Some(v) => coerce_boolean(v)?,
        None => false,
    };
    Ok(UserArgs {
        name,
        fullname: get_str(raw, "fullname"),
        password: get_str(raw, "password"),
        home: get_str(raw, "home"),
        uid,
        gid,
        group: get_str(raw, "group"),
        groups,
        append,
        shell: get_str(raw, "shell"),
        disabled_login,
        system,
    })
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

pub fn apply(args: &UserArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    match policy_name {
        "apply" => apply_create_or_amend(args, ctx),
        "remove" => apply_remove(args, ctx),
        other => Err(FuselageError::NoSuitableProviders(format!(
            "User has no provider for policy '{other}'"
        ))),
    }
}

fn apply_remove(args: &UserArgs, ctx: &RunnerCtx) -> Result<bool> {
    if ctx.platform.getpwnam(&args.name).is_err() {
        return Ok(false);
    }
    run(vec!["userdel".to_string(), args.name.clone()], ctx)
}

fn apply_create_or_amend(args: &UserArgs, ctx: &RunnerCtx) -> Result<bool> {
    let existing = ctx.platform.getpwnam(&args.name).ok();
    let mut command;
    let mut changed;

    if let Some(ref info) = existing {
        command = vec!["usermod".to_string()];
        changed = false;

        if let Some(ref home) = args.home {
            if &info.home != home {
                command.push("--home".to_string());
                command.push(home.clone());
                command.push("-m".to_string());
                changed = true;
            }
        }
        if let Some(uid) = args.uid {
            if info.uid as i64 != uid {
                command.push("--uid".to_string());
                command.push(uid.to_string());
                changed = true;
            }
        }
    } else {
        command = vec!["useradd".to_string(), "-N".to_string()];
        changed = true;

        if let Some(ref home) = args.home {
            command.push("--home".to_string());
            command.push(home.clone());
            command.push("-m".to_string());
        }
        if let Some(uid) = args.uid {
            command.push("--uid".to_string());
            command.push(uid.to_string());
        }
        if let Some(ref password) = args.password {
            command.push("--password".to_string());
            command.push(password.clone());
        }
        if args.system {
            command.push("--system".to_string());
        }
    }

    if let Some(ref fullname) = args.fullname {
        let current_gecos = existing.as_ref().map(|i| i.name.clone());
        if current_gecos.as_deref() != Some(fullname.as_str()) {
            command.push("--comment".to_string());
            command.push(fullname.clone());
            changed = true;
        }
    }

    resolve_group(args, ctx, &mut command, &mut changed)?;
    resolve_supplementary_groups(args, ctx, &mut command, &mut changed)?;

    if let Some(ref shell) = args.shell {
        if existing.as_ref().map(|i| i.shell.as_str()) != Some(shell.as_str()) {
            command.push("--shell".to_string());
            command.push(shell.clone());
            changed = true;
        }
    }

    if args.disabled_login {
        command.push("--password".to_string());
        command.push("!".to_string());
        changed = true;
    }

    command.push(args.name.clone());

    if !changed {
        return Ok(false);
    }
    run(command, ctx)
}

fn resolve_group(
    args: &UserArgs,
    ctx: &RunnerCtx,
    command: &mut Vec<String>,
    changed: &mut bool,
) -> Result<()> {
    if args.gid.is_none() && args.group.is_none() {
        return Ok(());
    }
    let existing_gid = ctx.platform.getpwnam(&args.name).ok().map(|i| i.gid);

    let target_gid = if let Some(gid) = args.gid {
        Some(gid as u32)
    } else if let Some(ref group) = args.group {
        match ctx.platform.getgrnam(group) {
            Ok(entry) => Some(entry.gid),
            Err(e) => {
                ctx.raise_or_log(e)?;
                None
            }
        }
    } else {
        None
    };

    if let Some(gid) = target_gid {
        if existing_gid != Some(gid) {
            command.push("--gid".to_string());
            command.push(gid.to_string());
            *changed = true;
        }
    }
    Ok(())
}

fn resolve_supplementary_groups(
    args: &UserArgs,
    ctx: &RunnerCtx,
    command: &mut Vec<String>,
    changed: &mut bool,
) -> Result<()> {
    if args.groups.is_empty() {
        return Ok(());
    }
    let desired: std::collections::BTreeSet<&String> = args.groups.iter().collect();
    let all_groups = ctx.platform.getgrall()?;
    let current: std::collections::BTreeSet<String> = all_groups
        .into_iter()
        .filter(|g| g.members.iter().any(|m| m == &args.name))
        .map(|g| g.name)
        .collect();

    if args.append {
        let missing: Vec<&String> = desired
            .iter()
            .filter(|g| !current.contains(g.as_str()))
            .copied()
            .collect();
        if !missing.is_empty() {
            command.push("-a".to_string());
            command.push("-G".to_string());
            command.push(
                missing
                    .into_iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(","),
            );
            *changed = true;
        }
    } else {
        let desired_owned: std::collections::BTreeSet<String> =
            desired.into_iter().cloned().collect();
        if desired_owned != current {
            command.push("-G".to_string());
            command.push(args.groups.join(","));
            *changed = true;
        }
    }
    Ok(())
}

pub fn serialize(args: &UserArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    if let Some(ref fullname) = args.fullname {
        map.insert("fullname".to_string(), Value::String(fullname.clone()));
    }
    if let Some(ref password) = args.password {
        map.insert("password".to_string(), Value::String(password.clone()));
    }
    if let Some(ref home) = args.home {
        map.insert("home".to_string(), Value::String(home.clone()));
    }
    if let Some(uid) = args.uid {
        map.insert("uid".to_string(), Value::Number(uid.into()));
    }
    if let Some(gid) = args.gid {
        map.insert("gid".to_string(), Value::Number(gid.into()));
    }
    if let Some(ref group) = args.group {
        map.insert("group".to_string(), Value::String(group.clone()));
    }
    if !args.groups.is_empty() {
        map.insert(
            "groups".to_string(),
            Value::Array(args.groups.iter().cloned().map(Value::String).collect()),
        );
    }
    if args.append {
        map.insert("append".to_string(), Value::Bool(true));
    }
    if let Some(ref shell) = args.shell {
        map.insert("shell".to_string(), Value::String(shell.clone()));
    }
    if args.disabled_login {
        map.insert("disabled_login".to_string(), Value::Bool(true));
    }
    if args.system {
        map.insert("system".to_string(), Value::Bool(true));
    }
    Value::Object(map)
}
