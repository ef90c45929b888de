//! `Package` resource — install/remove an apt package, idempotent against
//! `dpkg-query`. `apt` is the only backend this crate ships, so `backend`
//! is validated rather than dispatched on.

use super::require_str;
use crate::argument::coerce_boolean;
use crate::change::{Change, RunnerCtx, ShellCommand};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct PackageArgs {
    pub name: String,
    pub backend: String,
    pub purge: bool,
}

pub const POLICIES: &[PolicySpec] = &[
    PolicySpec {
        name: "install",
        default: true,
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Absent("purge"),
        ]),
    },
    PolicySpec {
        name: "uninstall",
        default: false,
        signature: Assertion::Present("name"),
    },
];

pub fn build(raw: &Map<String, Value>) -> Result<PackageArgs> {
    let name = require_str(raw, "name", "Package")?;
    let backend = super::get_str(raw, "backend").unwrap_or_else(|| "apt".to_string());
    if backend != "apt" {
        return Err(FuselageError::NoSuitableProviders(format!(
            "Package backend '{backend}' is not supported (apt only)"
        )));
    }
    let purge = match raw.get("purge") {
        Some(v) => coerce_boolean(v)?,
        None => false,
    };
    Ok(PackageArgs {
        name,
        backend,
        purge,
    })
}

fn is_installed(args: &PackageArgs, ctx: &RunnerCtx) -> Result<bool> {
    let argv = vec![
        "dpkg-query".to_string(),
        "-W".to_string(),
        "-f=${Status}".to_string(),
        args.name.clone(),
    ];
    let opts = crate::platform::CheckCallOptions::default();
    match ctx.platform.check_call(&argv, &opts) {
        Ok(output) => Ok(output.stdout.contains("install ok installed")),
        Err(FuselageError::CommandError(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn apply(args: &PackageArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    match policy_name {
        "install" => apply_install(args, ctx),
        "uninstall" => apply_uninstall(args, ctx),
        other => Err(FuselageError::NoSuitableProviders(format!(
            "Package has no provider for policy '{other}'"
        ))),
    }
}

fn apply_install(args: &PackageArgs, ctx: &RunnerCtx) -> Result<bool> {
    if is_installed(args, ctx)? {
        return Ok(false);
    }
    let env = vec![("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())];
    Change::ShellCommand(ShellCommand {
        command: vec![
            "apt-get".to_string(),
            "install".to_string(),
            "-q".to_string(),
            "-y".to_string(),
            args.name.clone(),
        ],
        cwd: None,
        env,
        user: None,
        group: None,
        umask: None,
        expected: 0,
        stdin: None,
    })
    .apply(ctx)
}

fn apply_uninstall(args: &PackageArgs, ctx: &RunnerCtx) -> Result<bool> {
    if !is_installed(args, ctx)? {
        return Ok(false);
    }
    let env = vec![("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())];
    let mut command = vec!["apt-get".to_string(), "remove".to_string(), "-q".to_string(), "-y".to_string()];
    if args.purge {
        command.push("--purge".to_string());
    }
    command.push(args.name.clone());
    Change::ShellCommand(ShellCommand {
        command,
        cwd: None,
        env,
        user: None,
        group: None,
        umask: None,
        expected: 0,
        stdin: None,
    })
    .apply(ctx)
}

pub fn serialize(args: &PackageArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    if args.backend != "apt" {
        map.insert("backend".to_string(), Value::String(args.backend.clone()));
    }
    if args.purge {
        map.insert("purge".to_string(), Value::Bool(true));
    }
    Value::Object(map)
}
