//! `Service` resource — start/stop/restart a daemon, detected via a
//! `running` probe command or a pidfile.

use super::{get_str, require_str};
use crate::change::{shlex_split, Change, RunnerCtx, ShellCommand};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct ServiceArgs {
    pub name: String,
    pub start: Option<String>,
    pub stop: Option<String>,
    pub restart: Option<String>,
    pub running: Option<String>,
    pub pidfile: Option<String>,
}

pub const POLICIES: &[PolicySpec] = &[
    PolicySpec {
        name: "start",
        default: true,
        signature: Assertion::And(vec![Assertion::Present("name"), Assertion::Present("start")]),
    },
    PolicySpec {
        name: "stop",
        default: false,
        signature: Assertion::And(vec![Assertion::Present("name"), Assertion::Present("stop")]),
    },
    PolicySpec {
        name: "restart",
        default: false,
        signature: Assertion::Present("name"),
    },
];

pub fn build(raw: &Map<String, Value>) -> Result<ServiceArgs> {
    Ok(ServiceArgs {
        name: require_str(raw, "name", "Service")?,
        start: get_str(raw, "start"),
        stop: get_str(raw, "stop"),
        restart: get_str(raw, "restart"),
        running: get_str(raw, "running"),
        pidfile: get_str(raw, "pidfile"),
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Status {
    Running,
    NotRunning,
    Unknown,
}

fn status(args: &ServiceArgs, ctx: &RunnerCtx) -> Result<Status> {
    if let Some(ref running) = args.running {
        let argv = shlex_split(running)?;
        let opts = crate::platform::CheckCallOptions::default();
        return Ok(match ctx.platform.check_call(&argv, &opts) {
            Ok(_) => Status::Running,
            Err(_) => Status::NotRunning,
        });
    }

    let Some(ref pidfile) = args.pidfile else {
        return Ok(Status::Unknown);
    };
    if !ctx.platform.exists(pidfile) {
        return Ok(Status::NotRunning);
    }
    let contents = ctx.platform.get(pidfile)?;
    let text = String::from_utf8_lossy(&contents);
    let Ok(pid) = text.trim().parse::<i32>() else {
        return Ok(Status::Unknown);
    };
    Ok(if ctx.platform.exists(&format!("/proc/{pid}")) {
        Status::Running
    } else {
        Status::NotRunning
    })
}

fn run(command: &str, ctx: &RunnerCtx) -> Result<()> {
    let argv = shlex_split(command)?;
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
    .apply(ctx)?;
    Ok(())
}

pub fn apply(args: &ServiceArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    match policy_name {
        "start" => {
            if status(args, ctx)? == Status::Running {
                return Ok(false);
            }
            let command = args.start.as_ref().ok_or_else(|| {
                FuselageError::NonConformingPolicy("Service.start requires 'start'".to_string())
            })?;
            run(command, ctx)?;
            Ok(true)
        }
        "stop" => {
            if status(args, ctx)? == Status::NotRunning {
                return Ok(false);
            }
            let command = args.stop.as_ref().ok_or_else(|| {
                FuselageError::NonConformingPolicy("Service.stop requires 'stop'".to_string())
            })?;
            run(command, ctx)?;
            Ok(true)
        }
        "restart" => {
            if status(args, ctx)? == Status::NotRunning {
                if let Some(ref start) = args.start {
                    run(start, ctx)?;
                }
                return Ok(true);
            }
            if let Some(ref restart) = args.restart {
                run(restart, ctx)?;
            } else {
                if let Some(ref stop) = args.stop {
                    run(stop, ctx)?;
                }
                if let Some(ref start) = args.start {
                    run(start, ctx)?;
                }
            }
            Ok(true)
        }
        other => Err(FuselageError::NoSuitableProviders(format!(
            "Service has no provider for policy '{other}'"
        ))),
    }
}

pub fn serialize(args: &ServiceArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    if let Some(ref start) = args.start {
        map.insert("start".to_string(), Value::String(start.clone()));
    }
    if let Some(ref stop) = args.stop {
        map.insert("stop".to_string(), Value::String(stop.clone()));
    }
    if let Some(ref restart) = args.restart {
        map.insert("restart".to_string(), Value::String(restart.clone()));
    }
    if let Some(ref running) = args.running {
        map.insert("running".to_string(), Value::String(running.clone()));
    }
    if let Some(ref pidfile) = args.pidfile {
        map.insert("pidfile".to_string(), Value::String(pidfile.clone()));
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
    fn test_start_running_probe_is_noop() {
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({
            "name": "test",
            "start": "/bin/true",
            "running": "/bin/true",
        })))
        .unwrap();
        assert!(!apply(&args, "start", &ctx).unwrap());
    }

    #[test]
    fn test_start_not_running_runs_start_command() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("started").to_string_lossy().to_string();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({
            "name": "test",
            "start": format!("touch {sentinel}"),
            "running": "/bin/false",
        })))
        .unwrap();
        assert!(apply(&args, "start", &ctx).unwrap());
        assert!(platform.exists(&sentinel));
    }
}
