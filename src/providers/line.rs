//! `Line` resource — ensure a line matching a regular expression is
//! present or absent in a file. The matching expression is named `pattern`
//! here since `match` is a reserved word.

use super::require_str;
use crate::argument::{coerce_boolean, coerce_full_path};
use crate::change::{Change, EnsureContents, RunnerCtx};
use crate::error::{FuselageError, Result};
use crate::policy::{Assertion, PolicySpec};
use regex::Regex;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct LineArgs {
    pub name: String,
    pub line: String,
    pub pattern: String,
    pub linesep: String,
    pub sensitive: bool,
}

pub const POLICIES: &[PolicySpec] = &[
    PolicySpec {
        name: "apply",
        default: true,
        signature: Assertion::And(vec![
            Assertion::Present("name"),
            Assertion::Present("line"),
            Assertion::Present("match"),
        ]),
    },
    PolicySpec {
        name: "remove",
        default: false,
        signature: Assertion::And(vec![Assertion::Present("name"), Assertion::Present("match")]),
    },
];

pub fn build(raw: &Map<String, Value>) -> Result<LineArgs> {
    let name = coerce_full_path(&Value::String(require_str(raw, "name", "Line")?))?;
    let line = super::get_str(raw, "line").unwrap_or_default();
    let pattern = super::get_str(raw, "match").unwrap_or_default();
    let linesep = super::get_str(raw, "linesep").unwrap_or_else(|| "\n".to_string());
    let sensitive = match raw.get("sensitive") {
        Some(v) => coerce_boolean(v)?,
        None => false,
    };
    Ok(LineArgs {
        name,
        line,
        pattern,
        linesep,
        sensitive,
    })
}

fn filtered_lines(args: &LineArgs, existing: &[&str], remove: bool) -> Result<Vec<String>> {
    let regexp = Regex::new(&args.pattern)
        .map_err(|e| FuselageError::ParseError(format!("invalid Line match regex: {e}")))?;

    if remove {
        return Ok(existing
            .iter()
            .filter(|line| !regexp.is_match(line))
            .map(|s| s.to_string())
            .collect());
    }

    let mut matched = false;
    let mut out = Vec::with_capacity(existing.len() + 1);
    for line in existing {
        if !matched && regexp.is_match(line) {
            out.push(args.line.clone());
            matched = true;
        } else {
            out.push(line.to_string());
        }
    }
    if !matched {
        out.push(args.line.clone());
    }
    Ok(out)
}

pub fn apply(args: &LineArgs, policy_name: &str, ctx: &RunnerCtx) -> Result<bool> {
    let remove = match policy_name {
        "apply" => false,
        "remove" => true,
        other => {
            return Err(FuselageError::NoSuitableProviders(format!(
                "Line has no provider for policy '{other}'"
            )))
        }
    };

    if !ctx.platform.exists(&args.name) {
        ctx.raise_or_log(FuselageError::PathComponentMissing(format!(
            "File '{}' is missing",
            args.name
        )))?;
        return Ok(false);
    }

    let bytes = ctx.platform.get(&args.name)?;
    let text = String::from_utf8_lossy(&bytes);
    let existing: Vec<&str> = text.lines().collect();
    let new_lines = filtered_lines(args, &existing, remove)?;
    let new_contents = new_lines.join(&args.linesep);

    Change::EnsureContents(EnsureContents {
        path: args.name.clone(),
        contents: Some(new_contents.into_bytes()),
        sensitive: args.sensitive,
    })
    .apply(ctx)
}

pub fn serialize(args: &LineArgs) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(args.name.clone()));
    map.insert("line".to_string(), Value::String(args.line.clone()));
    map.insert("match".to_string(), Value::String(args.pattern.clone()));
    if args.linesep != "\n" {
        map.insert("linesep".to_string(), Value::String(args.linesep.clone()));
    }
    if args.sensitive {
        map.insert("sensitive".to_string(), Value::Bool(true));
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
    fn test_apply_replaces_matching_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").to_string_lossy().to_string();
        std::fs::write(&path, "SELINUX=enforcing\nOTHER=1\n").unwrap();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);

        let args = build(&raw(json!({
            "name": path,
            "match": "^SELINUX",
            "line": "SELINUX=disabled",
        })))
        .unwrap();
        assert!(apply(&args, "apply", &ctx).unwrap());
        let contents = std::fs::read_to_string(&args.name).unwrap();
        assert!(contents.contains("SELINUX=disabled"));
        assert!(!apply(&args, "apply", &ctx).unwrap());
    }

    #[test]
    fn test_apply_appends_when_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").to_string_lossy().to_string();
        std::fs::write(&path, "OTHER=1\n").unwrap();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);

        let args = build(&raw(json!({
            "name": path,
            "match": "^SELINUX",
            "line": "SELINUX=disabled",
        })))
        .unwrap();
        apply(&args, "apply", &ctx).unwrap();
        let contents = std::fs::read_to_string(&args.name).unwrap();
        assert!(contents.trim_end().ends_with("SELINUX=disabled"));
    }

    #[test]
    fn test_remove_drops_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").to_string_lossy().to_string();
        std::fs::write(&path, "KEEP=1\nDROP=1\n").unwrap();
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);

        let args = build(&raw(json!({"name": path, "match": "^DROP"}))).unwrap();
        apply(&args, "remove", &ctx).unwrap();
        let contents = std::fs::read_to_string(&args.name).unwrap();
        assert!(!contents.contains("DROP"));
        assert!(contents.contains("KEEP"));
    }

    #[test]
    fn test_missing_file_raises_under_real_run() {
        let platform = LocalPlatform::new();
        let ctx = RunnerCtx::new(&platform, false);
        let args = build(&raw(json!({"name": "/no/such/file", "match": "x"}))).unwrap();
        assert!(apply(&args, "apply", &ctx).is_err());
    }
}
