//! `Checkout` resource — synchronise a git working copy with a remote
//! repository. Only the `git` SCM is supported, so `scm` is validated
//! rather than dispatched on.

use super::require_str;
use crate::argument::{coerce_full_path, coerce_octal};
use crate::change::{Change, EnsureDirectory, RunnerCtx};
use crate::error::{FuselageError, Result};
use crate::platform::CheckCallOptions;
use crate::policy::{Assertion, PolicySpec};
use regex::Regex;
use serde_json::{Map, Value};

const REMOTE_NAME: &str = "origin";

#[derive(Debug, Clone)]
pub struct CheckoutArgs {
    pub name: String,
    pub repository: String,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub revision: Option<String>,
    pub scm: String,
    pub user: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

/// The mode a freshly-cloned checkout directory gets when the caller never
/// supplied one.
const DEFAULT_MODE: u32 = 0o755;

pub const POLICIES: &[PolicySpec] = &[
    PolicySpec {
        name: "sync",
        default: true,
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Present("repository"),
            Assertion::Present("scm"),
        ]),
    },
    PolicySpec {
        name: "export",
        default: false,
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Present("repository"),
            Assertion::Present("scm"),
        ]),
    },
];

pub fn build(raw: &Map<String, Value>) -> Result<CheckoutArgs> {
    let name = coerce_full_path(&Value::String(require_str(raw, "name", "Checkout")?))?;
    let repository = require_str(raw, "repository", "Checkout")?;
    let scm = require_str(raw, "scm", "Checkout")?;
    if scm.to_lowercase() != "git" {
        return Err(FuselageError::NoSuitableProviders(format!(
            "Checkout has no provider for scm '{scm}'"
        )));
    }
    let mode = match raw.get("mode") {
        Some(v) => Some(coerce_octal(v)?),
        None => None,
    };
    Ok(CheckoutArgs {
        name,
        repository,
        branch: super::get_str(raw, "branch"),
        tag: super::get_str(raw, "tag"),
        revision: super::get_str(raw, "revision"),
        scm,
        user: super::get_str(raw, "user"),
        group: super::get_str(raw, "group"),
        mode,
    })
}

fn git(args: &CheckoutArgs, ctx: &RunnerCtx, argv: &[&str]) -> Result<crate::platform::CommandOutput> {
    let mut command = vec!["git".to_string(), "--no-pager".to_string()];
    command.extend(argv.iter().map(|s| s.to_string()));
    let opts = CheckCallOptions {
        cwd: Some(args.name.clone()),
        user: args.user.clone(),
        ..Default::default()
    };
    ctx.platform.check_call(&command, &opts)
}

fn action(args: &CheckoutArgs, ctx: &RunnerCtx, argv: &[&str]) -> Result<bool> {
    let mut command = vec!["git".to_string(), "--no-pager".to_string()];
    command.extend(argv.iter().map(|s| s.to_string()));
    Change::ShellCommand(crate::change::ShellCommand {
        command,
        cwd: Some(args.name.clone()),
        env: vec![],
        user: args.user.clone(),
        group: None,
        umask: None,
        expected: 0,
        stdin: None,
    })
    .apply(ctx)
}

fn clone_repository(args: &CheckoutArgs, ctx: &RunnerCtx) -> Result<()> {
    Change::EnsureDirectory(EnsureDirectory {
        path: args.name.clone(),
        user: args.user.clone(),
        group: args.group.clone(),
        mode: Some(args.mode.unwrap_or(DEFAULT_MODE)),
        recursive: true,
    })
    .apply(ctx)?;

    action(args, ctx, &["init", &args.name])
        .map_err(|_| FuselageError::ExecutionError("cannot initialise local repository".to_string()))?;

    set_remote(args, ctx)
}

fn set_remote(args: &CheckoutArgs, ctx: &RunnerCtx) -> Result<()> {
    action(args, ctx, &["remote", "add", REMOTE_NAME, &args.repository])
        .map(|_| ())
        .map_err(|_| FuselageError::ExecutionError("could not set the remote repository".to_string()))
}

fn update_remote(args: &CheckoutArgs, ctx: &RunnerCtx) -> Result<bool> {
    let output = git(args, ctx, &["remote", "-v"])
        .map_err(|_| FuselageError::ExecutionError("cannot determine repository remote".to_string()))?;

    let pattern = format!(r"{REMOTE_NAME}\t(\S+) \(.*\)");
    let regexp = Regex::new(&pattern).expect("static regex");

    match regexp.captures(&output.stdout) {
        Some(caps) => {
            let current = &caps[1];
            if current != args.repository {
                action(args, ctx, &["remote", "rm", REMOTE_NAME]).map_err(|_| {
                    FuselageError::ExecutionError(format!("could not delete remote '{REMOTE_NAME}'"))
                })?;
                set_remote(args, ctx)?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        None => Err(FuselageError::ExecutionError(
            "cannot determine repository remote".to_string(),
        )),
    }
}

fn checkout_needed(args: &CheckoutArgs, ctx: &RunnerCtx) -> Result<Option<String>> {
    let git_dir = format!("{}/.git", args.name);
    let head_sha = if ctx.platform.exists(&git_dir) {
        git(args, ctx, &["rev-parse", "--verify", "HEAD"])
            .map(|o| o.stdout.chars().take(40).collect::<String>())
            .unwrap_or_else(|_| "0".repeat(40))
    } else {
        "0".repeat(40)
    };

    let opts = CheckCallOptions {
        cwd: Some("/tmp".to_string()),
        user: args.user.clone(),
        ..Default::default()
    };
    let ls_remote = ctx
        .platform
        .check_call(
            &["git".to_string(), "ls-remote".to_string(), args.repository.clone()],
            &opts,
        )
        .map_err(|_| FuselageError::ExecutionError("could not query the remote repository".to_string()))?;

    let ref_line = Regex::new(r"([0-9a-f]{40})\t(\S+)").expect("static regex");
    let mut refs_to_shas = std::collections::HashMap::new();
    for caps in ref_line.captures_iter(&ls_remote.stdout) {
        refs_to_shas.insert(caps[2].to_string(), caps[1].to_string());
    }

    if let Some(ref revision) = args.revision {
        return Ok(if *revision != head_sha {
            Some(revision.clone())
        } else {
            None
        });
    }
    if let Some(ref tag) = args.tag {
        let as_tag = format!("refs/tags/{tag}");
        if !refs_to_shas.contains_key(&as_tag) {
            return Err(FuselageError::ExecutionError(format!(
                "cannot find a tag called '{tag}'"
            )));
        }
        let annotated = format!("{as_tag}^{{}}");
        let key = if refs_to_shas.contains_key(&annotated) { &annotated } else { &as_tag };
        return Ok(if refs_to_shas.get(key) != Some(&head_sha) {
            Some(tag.clone())
        } else {
            None
        });
    }
    if let Some(ref branch) = args.branch {
        let as_branch = format!("refs/heads/{branch}");
        if !refs_to_shas.contains_key(&as_branch) {
            return Err(FuselageError::ExecutionError(format!(
                "cannot find a branch called '{branch}'"
            )));
        }
        return Ok(if refs_to_shas.get(&as_branch) != Some(&head_sha) {
            Some(format!("{REMOTE_NAME}/{branch}"))
        } else {
            None
        });
    }
    Err(FuselageError::ExecutionError(
        "you must specify either a revision, tag or branch".to_string(),
    ))
}

fn do_checkout(args: &CheckoutArgs, ctx: &RunnerCtx, newref: &str) -> Result<()> {
    action(args, ctx, &["fetch", REMOTE_NAME])
        .map_err(|_| FuselageError::ExecutionError(format!("could not fetch '{}'", args.repository)))?;
    action(args, ctx, &["checkout", newref])
        .map_err(|_| FuselageError::ExecutionError(format!("could not check out '{newref}'")))?;
    Ok(())
}

fn sync(args: &CheckoutArgs, ctx: &RunnerCtx) -> Result<bool> {
    if !ctx.platform.isfile("/usr/bin/git") {
        ctx.raise_or_log(FuselageError::MissingDependency(
            "'/usr/bin/git' is not available; install git?".to_string(),
        ))?;
        return Ok(false);
    }

    let git_dir = format!("{}/.git", args.name);
    let mut changed = if !ctx.platform.exists(&git_dir) {
        clone_repository(args, ctx)?;
        true
    } else {
        update_remote(args, ctx)?
    };

    if let Some(newref) = checkout_needed(args, ctx)? {
        do_checkout(args, ctx, &newref)?;
        changed = true;
    }

    Ok(changed)
}

pub fn apply(args: &CheckoutArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    match policy_name {
        "sync" => sync(args, ctx),
        "export" => {
            let changed = sync(args, ctx)?;
            let git_dir = format!("{}/.git", args.name);
            if ctx.platform.exists(&git_dir) {
                Change::ShellCommand(crate::change::ShellCommand {
                    command: vec!["rm".to_string(), "-rf".to_string(), git_dir],
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
            Ok(changed)
        }
        other => Err(FuselageError::NoSuitableProviders(format!(
            "Checkout has no provider for policy '{other}'"
        ))),
    }
}

pub fn serialize(args: &CheckoutArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    map.insert("repository".to_string(), Value::String(args.repository.clone()));
    map.insert("scm".to_string(), Value::String(args.scm.clone()));
    if let Some(ref branch) = args.branch {
        map.insert("branch".to_string(), Value::String(branch.clone()));
    }
    if let Some(ref tag) = args.tag {
        map.insert("tag".to_string(), Value::String(tag.clone()));
    }
    if let Some(ref revision) = args.revision {
        map.insert("revision".to_string(), Value::String(revision.clone()));
    }
    if let Some(ref user) = args.user {
        map.insert("user".to_string(), Value::String(user.clone()));
    }
    if let Some(ref group) = args.group {
        map.insert("group".to_string(), Value::String(group.clone()));
    }
    if let Some(mode) = args.mode {
        map.insert("mode".to_string(), Value::String(format!("{mode:o}")));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_build_rejects_non_git_scm() {
        let r = raw(json!({"name": "/tmp/co", "repository": "x", "scm": "svn"}));
        assert!(matches!(build(&r), Err(FuselageError::NoSuitableProviders(_))));
    }

    #[test]
    fn test_build_leaves_mode_absent_when_not_supplied() {
        let args = build(&raw(json!({
            "name": "/tmp/co",
            "repository": "https://example.invalid/repo.git",
            "scm": "git",
        })))
        .unwrap();
        assert_eq!(args.mode, None);
        assert!(serialize(&args).get("mode").is_none());
    }
}
