//! Bundle — an ordered, by-id-indexed collection of resources with
//! subscription binding, implicit watched-file synthesis and a versioned
//! JSON round-trip.
//!
//! `IndexMap` backs the container: insertion order is the apply order and
//! `bundle[id]` is still O(1), the same container this crate's stack reaches
//! for wherever order and identity both matter.

use crate::error::{FuselageError, Result};
use crate::resource::Resource;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;

const FORMAT_VERSION: u64 = 1;

#[derive(Debug, Default)]
pub struct Bundle {
    resources: IndexMap<String, Resource>,
    /// target id -> ids of resources that watch it (the observer graph).
    observers: HashMap<String, Vec<String>>,
}

impl Bundle {
    pub fn new() -> Self {
        Bundle {
            resources: IndexMap::new(),
            observers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Resources in apply (insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Ids of resources that watch `id`, in the order they were bound.
    pub fn observers_of(&self, id: &str) -> &[String] {
        self.observers.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Build a resource from a raw `{field: value}` map and add it.
    pub fn create(&mut self, type_name: &str, raw: Map<String, Value>) -> Result<()> {
        let resource = Resource::new(type_name, raw)?;
        self.add(resource)
    }

    /// Add an already-constructed resource: reject a duplicate id, synthesise
    /// the implicit watched files for its `changes`, bind its watches against
    /// resources already present, then append.
    pub fn add(&mut self, resource: Resource) -> Result<()> {
        if self.resources.contains_key(&resource.id) {
            return Err(FuselageError::ParseError(format!(
                "duplicate resource id '{}'",
                resource.id
            )));
        }

        for path in resource.changes.clone() {
            self.add_implicit_watched_file(&path)?;
        }

        for trigger in &resource.watches {
            if trigger.on == resource.id {
                return Err(FuselageError::BindingError(format!(
                    "resource '{}' may not watch itself",
                    resource.id
                )));
            }
            if !self.resources.contains_key(&trigger.on) {
                return Err(FuselageError::BindingError(format!(
                    "resource '{}' watches '{}', which is absent or declared later in the bundle",
                    resource.id, trigger.on
                )));
            }
        }

        for trigger in &resource.watches {
            self.observers
                .entry(trigger.on.clone())
                .or_default()
                .push(resource.id.clone());
        }

        self.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Synthesise a `File{name=path, policy=watched}` for a watched-file
    /// path named in some resource's `changes`, unless one is already
    /// present (explicit or implicit) under that id.
    fn add_implicit_watched_file(&mut self, path: &str) -> Result<()> {
        if self.resources.contains_key(path) {
            return Ok(());
        }
        let mut raw = Map::new();
        raw.insert("name".to_string(), Value::String(path.to_string()));
        raw.insert("policy".to_string(), Value::String("watched".to_string()));
        let mut implicit = Resource::new("File", raw)?;
        implicit.implicit = true;
        self.resources.insert(implicit.id.clone(), implicit);
        Ok(())
    }

    /// `{"version": 1, "resources": [{"<Type>": {...}}, ...]}`, skipping
    /// implicit resources (they are re-synthesised on load from `changes`).
    pub fn dumps(&self) -> Result<String> {
        let resources: Vec<Value> = self
            .resources
            .values()
            .filter_map(Resource::serialize)
            .collect();
        let mut envelope = Map::new();
        envelope.insert("version".to_string(), Value::Number(FORMAT_VERSION.into()));
        envelope.insert("resources".to_string(), Value::Array(resources));
        serde_json::to_string_pretty(&Value::Object(envelope))
            .map_err(|e| FuselageError::ParseError(format!("cannot serialise bundle: {e}")))
    }

    /// Parse a versioned JSON bundle, constructing and binding resources in
    /// array order. Each entry must be a single-key mapping to either one
    /// object or an array of objects.
    pub fn loads(data: &str) -> Result<Bundle> {
        let value: Value = serde_json::from_str(data)
            .map_err(|e| FuselageError::ParseError(format!("invalid bundle JSON: {e}")))?;
        Bundle::from_value(value)
    }

    /// As `loads`, but from an already-parsed JSON value. Shared by the
    /// canonical JSON loader and the YAML bundle-authoring path, which both
    /// converge on this one construction code path.
    pub fn from_value(value: Value) -> Result<Bundle> {
        let obj = value
            .as_object()
            .ok_or_else(|| FuselageError::ParseError("bundle must be a JSON object".to_string()))?;

        let version = obj.get("version").and_then(Value::as_u64).ok_or_else(|| {
            FuselageError::ParseError("bundle is missing an integer 'version'".to_string())
        })?;
        if version != FORMAT_VERSION {
            return Err(FuselageError::ParseError(format!(
                "unsupported bundle version {version}"
            )));
        }

        let entries = obj
            .get("resources")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                FuselageError::ParseError("bundle is missing a 'resources' array".to_string())
            })?;

        let mut bundle = Bundle::new();
        for entry in entries {
            let entry_obj = entry.as_object().ok_or_else(|| {
                FuselageError::ParseError("each resource entry must be an object".to_string())
            })?;
            if entry_obj.len() != 1 {
                return Err(FuselageError::ParseError(
                    "each resource entry must map exactly one type name".to_string(),
                ));
            }
            let (type_name, body) = entry_obj.iter().next().unwrap();
            match body {
                Value::Object(fields) => bundle.create(type_name, fields.clone())?,
                Value::Array(items) => {
                    for item in items {
                        let fields = item.as_object().ok_or_else(|| {
                            FuselageError::ParseError(format!(
                                "'{type_name}' list entries must be objects"
                            ))
                        })?;
                        bundle.create(type_name, fields.clone())?;
                    }
                }
                _ => {
                    return Err(FuselageError::ParseError(format!(
                        "'{type_name}' must map to an object or a list of objects"
                    )))
                }
            }
        }
        Ok(bundle)
    }

    /// Drive this bundle to convergence under `runner` (thin delegation —
    /// `Runner::run` owns the per-resource state machine).
    pub fn apply(&self, runner: &mut crate::runner::Runner) -> Result<()> {
        runner.run(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let mut bundle = Bundle::new();
        bundle
            .create("File", obj(json!({"name": "/t/a"})))
            .unwrap();
        let err = bundle.create("File", obj(json!({"name": "/t/a"})));
        assert!(matches!(err, Err(FuselageError::ParseError(_))));
    }

    #[test]
    fn test_self_watch_is_binding_error() {
        let mut bundle = Bundle::new();
        let err = bundle.create(
            "Execute",
            obj(json!({"id": "e", "command": "/bin/true", "watches": ["Execute[e]"]})),
        );
        assert!(matches!(err, Err(FuselageError::BindingError(_))));
    }

    #[test]
    fn test_forward_watch_is_binding_error() {
        let mut bundle = Bundle::new();
        let err = bundle.create(
            "Execute",
            obj(json!({"command": "/bin/true", "watches": ["File[/x]"]})),
        );
        assert!(matches!(err, Err(FuselageError::BindingError(_))));
    }

    #[test]
    fn test_backward_watch_binds_and_registers_observer() {
        let mut bundle = Bundle::new();
        bundle
            .create("File", obj(json!({"name": "/etc/cfg", "contents": "a"})))
            .unwrap();
        bundle
            .create(
                "Execute",
                obj(json!({"command": "/bin/touch /tmp/reload", "watches": ["/etc/cfg"]})),
            )
            .unwrap();
        assert_eq!(
            bundle.observers_of("/etc/cfg"),
            &["/bin/touch /tmp/reload"]
        );
    }

    #[test]
    fn test_changes_synthesises_implicit_watched_file() {
        let mut bundle = Bundle::new();
        bundle
            .create(
                "Execute",
                obj(json!({"command": "/bin/true", "changes": ["/etc/watched"]})),
            )
            .unwrap();
        let implicit = bundle.get("/etc/watched").unwrap();
        assert!(implicit.implicit);
        assert_eq!(implicit.policy, "watched");
    }

    #[test]
    fn test_implicit_resources_excluded_from_dumps() {
        let mut bundle = Bundle::new();
        bundle
            .create(
                "Execute",
                obj(json!({"command": "/bin/true", "changes": ["/etc/watched"]})),
            )
            .unwrap();
        let dumped = bundle.dumps().unwrap();
        assert!(!dumped.contains("/etc/watched"));
    }

    #[test]
    fn test_dumps_loads_round_trips_explicit_resources() {
        let mut bundle = Bundle::new();
        bundle
            .create("File", obj(json!({"name": "/etc/cfg", "contents": "a"})))
            .unwrap();
        bundle
            .create(
                "Execute",
                obj(json!({"command": "/bin/touch /tmp/reload", "watches": ["/etc/cfg"]})),
            )
            .unwrap();

        let dumped = bundle.dumps().unwrap();
        let loaded = Bundle::loads(&dumped).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.get("/etc/cfg").is_some());
        assert_eq!(
            loaded.observers_of("/etc/cfg"),
            &["/bin/touch /tmp/reload"]
        );
    }

    #[test]
    fn test_loads_rejects_unknown_version() {
        let err = Bundle::loads(r#"{"version": 2, "resources": []}"#);
        assert!(matches!(err, Err(FuselageError::ParseError(_))));
    }

    #[test]
    fn test_loads_rejects_missing_resources_key() {
        let err = Bundle::loads(r#"{"version": 1}"#);
        assert!(matches!(err, Err(FuselageError::ParseError(_))));
    }

    #[test]
    fn test_dumps_loads_round_trips_a_remove_policy_with_no_mode() {
        let mut bundle = Bundle::new();
        bundle
            .create("Directory", obj(json!({"name": "/t/d", "policy": "remove"})))
            .unwrap();

        let dumped = bundle.dumps().unwrap();
        assert!(!dumped.contains("mode"));
        let loaded = Bundle::loads(&dumped).unwrap();
        assert_eq!(loaded.get("/t/d").unwrap().policy, "remove");
    }

    #[test]
    fn test_loads_accepts_array_of_objects_per_type() {
        let data = r#"{"version": 1, "resources": [
            {"File": [{"name": "/t/a"}, {"name": "/t/b"}]}
        ]}"#;
        let bundle = Bundle::loads(data).unwrap();
        assert_eq!(bundle.len(), 2);
        assert!(bundle.get("/t/a").is_some());
        assert!(bundle.get("/t/b").is_some());
    }
}
