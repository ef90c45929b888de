//! Argument kinds — typed coercion and content-addressed file storage.
//!
//! Resources are declared as loosely-typed JSON objects (parsed out of a
//! bundle's YAML or canonical JSON form); each resource kind's module
//! coerces its own raw fields through the functions here, and records which
//! field names were user-supplied in a presence set so policy signatures
//! (`Present`/`Absent`) can be evaluated later.

use crate::error::{FuselageError, Result};
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::Path;

/// `Boolean.coerce`: `"1"/"yes"/"on"/"true"` (case-insensitive) => true,
/// any other string => false, non-strings use standard JSON truthiness.
pub fn coerce_boolean(v: &Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => {
            let lower = s.to_lowercase();
            Ok(matches!(lower.as_str(), "1" | "yes" | "on" | "true"))
        }
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::Null => Ok(false),
        _ => Ok(true),
    }
}

/// `String.coerce`: null passes through as empty, anything else becomes text.
pub fn coerce_string(v: &Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(FuselageError::ParseError(format!(
            "cannot coerce {other} to a string"
        ))),
    }
}

/// `FullPath.coerce`: inherit String, reject values not starting with `/`.
pub fn coerce_full_path(v: &Value) -> Result<String> {
    let s = coerce_string(v)?;
    if !s.starts_with('/') {
        return Err(FuselageError::ParseError(format!(
            "path '{s}' must be fully qualified (start with '/')"
        )));
    }
    Ok(s)
}

/// `Integer.coerce`: accept an int directly, else parse base-10.
pub fn coerce_integer(v: &Value) -> Result<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| FuselageError::ParseError(format!("'{n}' is not an integer"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| FuselageError::ParseError(format!("'{s}' is not a base-10 integer"))),
        other => Err(FuselageError::ParseError(format!(
            "cannot coerce {other} to an integer"
        ))),
    }
}

/// `Octal.coerce`: accept an int directly, else parse the string in base 8.
/// `coerce_octal("666") == coerce_octal(0o666) == 438`.
pub fn coerce_octal(v: &Value) -> Result<u32> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .map(|n| n as u32)
            .ok_or_else(|| FuselageError::ParseError(format!("'{n}' is not an octal integer"))),
        Value::String(s) => u32::from_str_radix(s.trim(), 8)
            .map_err(|_| FuselageError::ParseError(format!("'{s}' is not a base-8 integer"))),
        other => Err(FuselageError::ParseError(format!(
            "cannot coerce {other} to an octal integer"
        ))),
    }
}

/// `List.coerce`: a homogeneous sequence, opaque to the engine beyond String.
pub fn coerce_list(v: &Value) -> Result<Vec<String>> {
    match v {
        Value::Array(items) => items.iter().map(coerce_string).collect(),
        Value::Null => Ok(Vec::new()),
        single => Ok(vec![coerce_string(single)?]),
    }
}

/// `Dict.coerce`: a string-keyed mapping, opaque to the engine.
pub fn coerce_dict(v: &Value) -> Result<HashMap<String, String>> {
    match v {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), coerce_string(v)?)))
            .collect(),
        Value::Null => Ok(HashMap::new()),
        other => Err(FuselageError::ParseError(format!(
            "cannot coerce {other} to a dict"
        ))),
    }
}

/// One entry of a `SubscriptionArgument` — a watch by target resource id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyTrigger {
    pub on: String,
}

/// `SubscriptionArgument.coerce`: accept a list of id strings, normalise to
/// triggers.
pub fn coerce_subscription(v: &Value) -> Result<Vec<PolicyTrigger>> {
    coerce_list(v).map(|ids| ids.into_iter().map(|on| PolicyTrigger { on }).collect())
}

/// `PolicyArgument.coerce`: look up the named policy on the resource's own
/// policy table; fail with `ParseError` if unknown. Defaults to whichever
/// policy in `policies` has `default: true`.
pub fn coerce_policy(
    v: Option<&Value>,
    policies: &[(&'static str, bool)],
    resource_type: &str,
) -> Result<String> {
    match v {
        Some(value) => {
            let name = coerce_string(value)?;
            if policies.iter().any(|(n, _)| *n == name) {
                Ok(name)
            } else {
                Err(FuselageError::ParseError(format!(
                    "{resource_type} has no policy named '{name}'"
                )))
            }
        }
        None => policies
            .iter()
            .find(|(_, default)| *default)
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| {
                FuselageError::ParseError(format!(
                    "{resource_type} declares no default policy"
                ))
            }),
    }
}

/// Content-addressed blob store backing the `File` argument kind. A real
/// bundle build walks local asset paths into this store and substitutes
/// `bundle://<sha1>` references in the serialised resource; a loader
/// resolves those references back to bytes.
#[derive(Debug, Default)]
pub struct AssetStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `local_path`'s bytes, store them under their sha1 digest, and
    /// return the `bundle://<sha1>` reference to embed in the resource.
    pub fn store_file(&mut self, local_path: &Path) -> Result<String> {
        let bytes = std::fs::read(local_path).map_err(|e| {
            FuselageError::ParseError(format!("cannot read asset {}: {e}", local_path.display()))
        })?;
        Ok(self.store_bytes(bytes))
    }

    /// Store raw bytes directly, returning their `bundle://<sha1>` reference.
    pub fn store_bytes(&mut self, bytes: Vec<u8>) -> String {
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());
        let reference = format!("bundle://{digest}");
        self.blobs.insert(digest, bytes);
        reference
    }

    /// Resolve a `bundle://<sha1>` reference back to its bytes.
    pub fn resolve(&self, reference: &str) -> Option<&[u8]> {
        let digest = reference.strip_prefix("bundle://")?;
        self.blobs.get(digest).map(|b| b.as_slice())
    }
}

/// `File.serialize(resource, builder)`: if the argument is absent, return
/// the default; else store the named local path's bytes and substitute the
/// `bundle://<sha1>` reference.
pub fn serialize_file_argument(
    local_path: Option<&str>,
    store: &mut AssetStore,
) -> Result<Option<String>> {
    match local_path {
        None => Ok(None),
        Some(path) => Ok(Some(store.store_file(Path::new(path))?)),
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boolean_coercion_laws() {
        for truthy in ["1", "yes", "on", "true", "YES", "TRUE", "On"] {
            assert!(coerce_boolean(&Value::String(truthy.into())).unwrap());
        }
        for falsy in ["0", "no", "off", "false", "garbage"] {
            assert!(!coerce_boolean(&Value::String(falsy.into())).unwrap());
        }
        assert!(coerce_boolean(&Value::Bool(true)).unwrap());
    }

    #[test]
    fn test_full_path_rejects_relative() {
        assert!(coerce_full_path(&Value::String("relative/path".into())).is_err());
        assert!(coerce_full_path(&Value::String("/absolute/path".into())).is_ok());
    }

    #[test]
    fn test_octal_agrees_with_decimal_438() {
        let from_string = coerce_octal(&Value::String("666".into())).unwrap();
        let from_number = coerce_octal(&Value::Number(438.into())).unwrap();
        assert_eq!(from_string, 438);
        assert_eq!(from_string, from_number);
    }

    #[test]
    fn test_integer_rejects_non_numeric_text() {
        assert!(coerce_integer(&Value::String("abc".into())).is_err());
        assert_eq!(coerce_integer(&Value::String("42".into())).unwrap(), 42);
    }

    #[test]
    fn test_subscription_normalises_id_list() {
        let v = serde_json::json!(["File[/a]", "Execute[b]"]);
        let triggers = coerce_subscription(&v).unwrap();
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].on, "File[/a]");
    }

    #[test]
    fn test_policy_argument_defaults_when_absent() {
        let policies = [("apply", true), ("remove", false)];
        let chosen = coerce_policy(None, &policies, "File").unwrap();
        assert_eq!(chosen, "apply");
    }

    #[test]
    fn test_policy_argument_rejects_unknown_name() {
        let policies = [("apply", true)];
        let err = coerce_policy(Some(&Value::String("bogus".into())), &policies, "File");
        assert!(err.is_err());
    }

    #[test]
    fn test_asset_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asset.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let mut store = AssetStore::new();
        let reference = store.store_file(&path).unwrap();
        assert!(reference.starts_with("bundle://"));
        assert_eq!(store.resolve(&reference).unwrap(), b"hello world");
    }

    #[test]
    fn test_asset_store_content_addressing_dedupes() {
        let mut store = AssetStore::new();
        let a = store.store_bytes(b"same".to_vec());
        let b = store.store_bytes(b"same".to_vec());
        assert_eq!(a, b);
    }

    proptest! {
        /// Every `u32` in the POSIX mode range round-trips through its
        /// base-8 string form, the same law §8 states for `0o666`/"666".
        #[test]
        fn prop_octal_round_trips_through_base_8_string(n in 0u32..=0o7777) {
            let decoded = coerce_octal(&Value::String(format!("{n:o}"))).unwrap();
            prop_assert_eq!(decoded, n);
        }

        /// A JSON number is coerced the same way regardless of whether it
        /// arrived as a base-8 string or the number it denotes.
        #[test]
        fn prop_octal_agrees_across_string_and_number_form(n in 0u32..=0o7777) {
            let from_string = coerce_octal(&Value::String(format!("{n:o}"))).unwrap();
            let from_number = coerce_octal(&Value::Number(n.into())).unwrap();
            prop_assert_eq!(from_string, from_number);
        }

        /// `List.coerce` is opaque to the engine: it must not reorder,
        /// drop or duplicate entries.
        #[test]
        fn prop_list_preserves_length_and_order(items in proptest::collection::vec("[a-z]{0,8}", 0..8)) {
            let value = Value::Array(items.iter().cloned().map(Value::String).collect());
            let coerced = coerce_list(&value).unwrap();
            prop_assert_eq!(coerced, items);
        }

        /// `Dict.coerce` is opaque to the engine: every key present in the
        /// input must come back out with its value unchanged.
        #[test]
        fn prop_dict_preserves_all_keys_and_values(
            pairs in proptest::collection::hash_map("[a-z]{1,8}", "[a-z]{0,8}", 0..8)
        ) {
            let map: serde_json::Map<String, Value> = pairs
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let coerced = coerce_dict(&Value::Object(map)).unwrap();
            prop_assert_eq!(coerced.len(), pairs.len());
            for (k, v) in &pairs {
                prop_assert_eq!(coerced.get(k), Some(v));
            }
        }
    }
}
