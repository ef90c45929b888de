//! Bundle config loading — accepts a human-authored YAML bundle source in
//! addition to the canonical versioned JSON form. Both forms describe the
//! same `{version, resources: [...]}` envelope and converge on
//! `Bundle::from_value`, so there is exactly one construction code path
//! regardless of which surface the caller used; a malformed bundle aborts
//! construction before any resource is touched.

use crate::bundle::Bundle;
use crate::error::{FuselageError, Result};
use std::path::Path;

/// Load a bundle from a YAML file on disk — the CLI's default input format.
pub fn load_yaml_bundle_file(path: &Path) -> Result<Bundle> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FuselageError::ParseError(format!("cannot read {}: {e}", path.display()))
    })?;
    load_yaml_bundle(&content)
}

/// Parse a YAML bundle document into a `Bundle`.
pub fn load_yaml_bundle(yaml: &str) -> Result<Bundle> {
    let yaml_value: serde_yaml_ng::Value = serde_yaml_ng::from_str(yaml)
        .map_err(|e| FuselageError::ParseError(format!("invalid bundle YAML: {e}")))?;
    let json_value = serde_json::to_value(&yaml_value)
        .map_err(|e| FuselageError::ParseError(format!("cannot convert YAML to JSON: {e}")))?;
    Bundle::from_value(json_value)
}

/// Load a bundle from disk, dispatching on file extension: `.json` parses as
/// the canonical versioned JSON form; anything else (`.yaml`, `.yml`, or no
/// extension) parses as YAML.
pub fn load_bundle_file(path: &Path) -> Result<Bundle> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                FuselageError::ParseError(format!("cannot read {}: {e}", path.display()))
            })?;
            Bundle::loads(&content)
        }
        _ => load_yaml_bundle_file(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_yaml_bundle_parses_file_resource() {
        let yaml = r#"
version: 1
resources:
  - File:
      name: /etc/motd
      contents: hello
"#;
        let bundle = load_yaml_bundle(yaml).unwrap();
        assert_eq!(bundle.len(), 1);
        assert!(bundle.get("/etc/motd").is_some());
    }

    #[test]
    fn test_load_yaml_bundle_preserves_order_and_watches() {
        let yaml = r#"
version: 1
resources:
  - File:
      name: /etc/cfg
      contents: a
  - Execute:
      command: /bin/touch /tmp/reload
      watches: ["/etc/cfg"]
"#;
        let bundle = load_yaml_bundle(yaml).unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(
            bundle.observers_of("/etc/cfg"),
            &["/bin/touch /tmp/reload"]
        );
    }

    #[test]
    fn test_load_yaml_bundle_rejects_unknown_version() {
        let err = load_yaml_bundle("version: 2\nresources: []\n");
        assert!(matches!(err, Err(FuselageError::ParseError(_))));
    }

    #[test]
    fn test_load_bundle_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("bundle.yaml");
        std::fs::write(&yaml_path, "version: 1\nresources:\n  - File:\n      name: /t/a\n")
            .unwrap();
        let bundle = load_bundle_file(&yaml_path).unwrap();
        assert_eq!(bundle.len(), 1);

        let json_path = dir.path().join("bundle.json");
        std::fs::write(
            &json_path,
            r#"{"version":1,"resources":[{"File":{"name":"/t/b"}}]}"#,
        )
        .unwrap();
        let bundle = load_bundle_file(&json_path).unwrap();
        assert_eq!(bundle.len(), 1);
        assert!(bundle.get("/t/b").is_some());
    }
}
