//! `Execute` resource — run one or more shell commands, guarded by
//! `creates`/`touch`/`unless`.

use super::get_str;
use crate::argument::{coerce_dict, coerce_full_path, coerce_integer, coerce_list, coerce_octal};
use crate::change::{shlex_split, Change, RunnerCtx, ShellCommand};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ExecuteArgs {
    pub command: Option<String>,
    pub commands: Vec<String>,
    pub cwd: String,
    pub env: HashMap<String, String>,
    pub returncode: i64,
    pub user: Option<String>,
    pub group: Option<String>,
    pub umask: u32,
    pub unless: Option<String>,
    pub creates: Option<String>,
    pub touch: Option<String>,
}

pub const POLICIES: &[PolicySpec] = &[PolicySpec {
    name: "execute",
    default: true,
    signature: Assertion::Xor(vec![Assertion::Present("command"), Assertion::Present("commands")]),
}];

/// `Execute.implicit_id`: when no explicit id is given, derive one from the
/// normalised command text (lowercased, whitespace-collapsed).
pub fn derive_id(raw: &Map<String, Value>) -> Option<String> {
    if let Some(command) = raw.get("command").and_then(|v| v.as_str()) {
        return Some(simple_str(command));
    }
    if let Some(Value::Array(items)) = raw.get("commands") {
        let joined = items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        if !joined.is_empty() {
            return Some(simple_str(&joined));
        }
    }
    None
}

fn simple_str(s: &str) -> String {
    s.trim().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn build(raw: &Map<String, Value>) -> Result<ExecuteArgs> {
    let command = get_str(raw, "command");
    let commands = match raw.get("commands") {
        Some(v) => coerce_list(v)?,
        None => Vec::new(),
    };
    let cwd = match raw.get("cwd") {
        Some(v) => coerce_full_path(v)?,
        None => "/".to_string(),
    };
    let env = match raw.get("env") {
        Some(v) => coerce_dict(v)?,
        None => HashMap::new(),
    };
    let returncode = match raw.get("returncode") {
        Some(v) => coerce_integer(v)?,
        None => 0,
    };
    let user = get_str(raw, "user");
    let group = get_str(raw, "group");
    let umask = match raw.get("umask") {
        Some(v) => coerce_octal(v)?,
        None => 0o022,
    };
    let unless = get_str(raw, "unless");
    let creates = match raw.get("creates") {
        Some(v) => Some(coerce_full_path(v)?),
        None => None,
    };
    let touch = match raw.get("touch") {
        Some(v) => Some(coerce_full_path(v)?),
        None => None,
    };

    if command.is_none() && commands.is_empty() {
        return Err(FuselageError::ParseError(
            "Execute requires either 'command' or 'commands'".to_string(),
        ));
    }

    Ok(ExecuteArgs {
        command,
        commands,
        cwd,
        env,
        returncode,
        user,
        group,
        umask,
        unless,
        creates,
        touch,
    })
}

pub fn apply(args: &ExecuteArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    if policy_name != "execute" {
        return Err(FuselageError::NoSuitableProviders(format!(
            "Execute has no provider for policy '{policy_name}'"
        )));
    }

    if let Some(ref creates) = args.creates {
        if ctx.platform.exists(creates) {
            return Ok(false);
        }
    }
    if let Some(ref touch) = args.touch {
        if ctx.platform.exists(touch) {
            return Ok(false);
        }
    }

    if let Some(ref unless) = args.unless {
        if let Some(ref user) = args.user {
            if let Err(e) = ctx.platform.getpwnam(user) {
                ctx.raise_or_log(e)?;
            }
        }
        let argv = shlex_split(unless)?;
        let opts = crate::platform::CheckCallOptions {
            cwd: Some(args.cwd.clone()),
            user: args.user.clone(),
            ..Default::default()
        };
        match ctx.platform.check_call(&argv, &opts) {
            Ok(_) => return Ok(false),
            // A non-zero `unless` probe means the guarded command should run.
            Err(FuselageError::CommandError(_)) => {}
            Err(other) => return Err(other),
        }
    }

    let commands: Vec<Vec<String>> = if let Some(ref command) = args.command {
        vec![shlex_split(command)?]
    } else {
        args.commands
            .iter()
            .map(|c| shlex_split(c))
            .collect::<Result<Vec<_>>>()?
    };

    for argv in commands {
        let change = Change::ShellCommand(ShellCommand {
            command: argv,
            cwd: Some(args.cwd.clone()),
            env: args.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            user: args.user.clone(),
            group: args.group.clone(),
            umask: Some(args.umask),
            expected: args.returncode as i32,
            stdin: None,
        });
        change.apply(ctx)?;
    }

    if let Some(ref touch) = args.touch {
        Change::ShellCommand(ShellCommand {
            command: vec!["touch".to_string(), touch.clone()],
            cwd: None,
            env: vec![],
            user: None,
            group: None,
            umask: None,
            expected: 0,
            stdin: None,
        })
        .apply(ctx)?;
    }

    Ok(true)
}

pub fn serialize(args: &ExecuteArgs) -> Value {
    let mut map = Map::new();
    if let Some(ref command) = args.command {
        map.insert("command".to_string(), Value::String(command.clone()));
    }
    if !args.commands.is_empty() {
        map.insert(
            "commands".to_string(),
            Value::Array(args.commands.iter().cloned().map(Value::String).collect()),
        );
    }
    map.insert("cwd".to_string(), Value::String(args.cwd.clone()));
    if let Some(ref user) = args.user {
        map.insert("user".to_string(), Value::String(user.clone()));
    }
    if let Some(ref group) = args.group {
        map.insert("group".to_string(), Value::String(group.clone()));
    }
    map.insert("returncode".to_string(), Value::from(args.returncode));
    if let Some(ref creates) = args.creates {
        map.insert("creates".to_string(), Value::String(creates.clone()));
    }
    if let Some(ref touch) = args.touch {
        map.insert("touch".to_string(), Value::String(touch.clone()));
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
    fn test_derive_id_normalises_whitespace_and_case() {
        let r = raw(json!({"command": "  /bin/Touch   /tmp/x  "}));
        assert_eq!(derive_id(&r).unwrap(), "/bin/touch /tmp/x");
    }

    #[test]
    fn test_build_requires_command_or_commands() {
        assert!(build(&raw(json!({"name": "x"}))).is_err());
    }

    #[test]
    fn test_creates_guard_skips_execution() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("done").to_string_lossy().to_string();
        std::fs::write(&sentinel, b"").unwrap();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({"command": "/bin/true", "creates": sentinel}))).unwrap();
        assert!(!apply(&args, "execute", &ctx).unwrap());
    }

    #[test]
    fn test_touch_guard_runs_then_creates_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("done").to_string_lossy().to_string();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({"command": "/bin/true", "touch": sentinel}))).unwrap();
        assert!(apply(&args, "execute", &ctx).unwrap());
        assert!(platform.exists(&args.touch.unwrap()));
    }
}
