//! `Patch` resource — apply a unified diff to a source file and write the
//! patched result to `name`.

use super::require_str;
use crate::argument::{coerce_boolean, coerce_full_path, coerce_integer, coerce_octal};
use crate::change::{Change, EnsureFile, RunnerCtx};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct PatchArgs {
    pub name: String,
    pub source: String,
    pub patch: Vec<u8>,
    pub strip: i64,
    pub owner: String,
    pub group: String,
    pub mode: Option<u32>,
    pub sensitive: bool,
}

/// The mode a freshly-patched output file gets when the caller never
/// supplied one.
const DEFAULT_MODE: u32 = 0o644;

pub const POLICIES: &[PolicySpec] = &[PolicySpec {
    name: "apply",
    default: true,
    signature: Assertion::Present("name"),
}];

pub fn build(raw: &Map<String, Value>) -> Result<PatchArgs> {
    let name = coerce_full_path(&Value::String(require_str(raw, "name", "Patch")?))?;
    let source = coerce_full_path(&Value::String(require_str(raw, "source", "Patch")?))?;
    let patch = match raw.get("patch") {
        Some(Value::String(s)) => s.clone().into_bytes(),
        Some(other) => {
            return Err(FuselageError::ParseError(format!(
                "Patch.patch must be a string, got {other}"
            )))
        }
        None => {
            return Err(FuselageError::ParseError(
                "Patch requires a 'patch' argument".to_string(),
            ))
        }
    };
    let strip = match raw.get("strip") {
        Some(v) => coerce_integer(v)?,
        None => 0,
    };
    let owner = super::get_str(raw, "owner").unwrap_or_else(|| "root".to_string());
    let group = super::get_str(raw, "group").unwrap_or_else(|| "root".to_string());
    let mode = match raw.get("mode") {
        Some(v) => Some(coerce_octal(v)?),
        None => None,
    };
    let sensitive = match raw.get("sensitive") {
        Some(v) => coerce_boolean(v)?,
        None => false,
    };

    Ok(PatchArgs {
        name,
        source,
        patch,
        strip,
        owner,
        group,
        mode,
        sensitive,
    })
}

fn apply_patch(args: &PatchArgs, ctx: &RunnerCtx) -> Result<Vec<u8>> {
    let opts = crate::platform::CheckCallOptions {
        stdin: Some(args.patch.clone()),
        ..Default::default()
    };
    let command = vec![
        "patch".to_string(),
        "-p".to_string(),
        format!("{}", args.strip),
        "--silent".to_string(),
        "-r".to_string(),
        "-".to_string(),
        "-o".to_string(),
        "-".to_string(),
        args.source.clone(),
        "-".to_string(),
    ];
    let output = ctx
        .platform
        .check_call(&command, &opts)
        .map_err(|_| FuselageError::CommandError("unable to apply patch".to_string()))?;
    Ok(output.stdout.into_bytes())
}

pub fn apply(args: &PatchArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    if policy_name != "apply" {
        return Err(FuselageError::NoSuitableProviders(format!(
            "Patch has no provider for policy '{policy_name}'"
        )));
    }

    if let Some(parent) = std::path::Path::new(&args.name).parent() {
        let parent_str = parent.to_string_lossy().to_string();
        if !parent_str.is_empty() {
            if let Err(e) = crate::platform::check_path_components(ctx.platform, &args.name) {
                ctx.raise_or_log(e)?;
            }
        }
    }

    let contents = apply_patch(args, ctx)?;

    Change::EnsureFile(EnsureFile {
        path: args.name.clone(),
        contents: Some(contents),
        user: Some(args.owner.clone()),
        group: Some(args.group.clone()),
        mode: Some(args.mode.unwrap_or(DEFAULT_MODE)),
        sensitive: args.sensitive,
    })
    .apply(ctx)
}

pub fn serialize(args: &PatchArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    map.insert("source".to_string(), Value::String(args.source.clone()));
    map.insert(
        "patch".to_string(),
        Value::String(String::from_utf8_lossy(&args.patch).to_string()),
    );
    map.insert("strip".to_string(), Value::from(args.strip));
    map.insert("owner".to_string(), Value::String(args.owner.clone()));
    map.insert("group".to_string(), Value::String(args.group.clone()));
    if let Some(mode) = args.mode {
        map.insert("mode".to_string(), Value::String(format!("{mode:o}")));
    }
    if args.sensitive {
        map.insert("sensitive".to_string(), Value::Bool(true));
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
    fn test_build_defaults_owner_group_mode() {
        let args = build(&raw(json!({
            "name": "/tmp/out",
            "source": "/tmp/in",
            "patch": "--- a\n+++ b\n",
        })))
        .unwrap();
        assert_eq!(args.owner, "root");
        assert_eq!(args.group, "root");
        assert_eq!(args.mode, None);
        assert_eq!(args.strip, 0);
    }

    #[test]
    fn test_build_requires_patch() {
        assert!(build(&raw(json!({"name": "/tmp/out", "source": "/tmp/in"}))).is_err());
    }
}
