//! Resource — a typed declaration of desired state, identity, subscriptions.

use crate::argument::PolicyTrigger;
use crate::change::RunnerCtx;
use crate::error::{FuselageError, Result};
use crate::policy;
use crate::providers::{self, checkout, directory, execute, file, group, line, link, mount, patch,
    package, service, user};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashSet;

/// Every concrete resource kind the engine knows how to apply.
#[derive(Debug, Clone)]
pub enum ResourceBody {
    File(file::FileArgs),
    Directory(directory::DirectoryArgs),
    Execute(execute::ExecuteArgs),
    Package(package::PackageArgs),
    Service(service::ServiceArgs),
    Mount(mount::MountArgs),
    Line(line::LineArgs),
    Link(link::LinkArgs),
    Patch(patch::PatchArgs),
    Checkout(checkout::CheckoutArgs),
    User(user::UserArgs),
    Group(group::GroupArgs),
}

impl ResourceBody {
    /// The serialisation key this kind appears under (`{"File": {...}}`).
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceBody::File(_) => "File",
            ResourceBody::Directory(_) => "Directory",
            ResourceBody::Execute(_) => "Execute",
            ResourceBody::Package(_) => "Package",
            ResourceBody::Service(_) => "Service",
            ResourceBody::Mount(_) => "Mount",
            ResourceBody::Line(_) => "Line",
            ResourceBody::Link(_) => "Link",
            ResourceBody::Patch(_) => "Patch",
            ResourceBody::Checkout(_) => "Checkout",
            ResourceBody::User(_) => "User",
            ResourceBody::Group(_) => "Group",
        }
    }

    fn default_id(&self, raw: &Map<String, Value>) -> Option<String> {
        match self {
            ResourceBody::Execute(_) => execute::derive_id(raw),
            _ => raw
                .get("name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }
    }

    fn policy_table(&self) -> Vec<(&'static str, bool)> {
        policy::policy_table(match self {
            ResourceBody::File(_) => file::POLICIES,
            ResourceBody::Directory(_) => directory::POLICIES,
            ResourceBody::Execute(_) => execute::POLICIES,
            ResourceBody::Package(_) => package::POLICIES,
            ResourceBody::Service(_) => service::POLICIES,
            ResourceBody::Mount(_) => mount::POLICIES,
            ResourceBody::Line(_) => line::POLICIES,
            ResourceBody::Link(_) => link::POLICIES,
            ResourceBody::Patch(_) => patch::POLICIES,
            ResourceBody::Checkout(_) => checkout::POLICIES,
            ResourceBody::User(_) => user::POLICIES,
            ResourceBody::Group(_) => group::POLICIES,
        })
    }

    fn validate_policy(&self, policy_name: &str, present: &HashSet<String>) -> Result<()> {
        let specs = match self {
            ResourceBody::File(_) => file::POLICIES,
            ResourceBody::Directory(_) => directory::POLICIES,
            ResourceBody::Execute(_) => execute::POLICIES,
            ResourceBody::Package(_) => package::POLICIES,
            ResourceBody::Service(_) => service::POLICIES,
            ResourceBody::Mount(_) => mount::POLICIES,
            ResourceBody::Line(_) => line::POLICIES,
            ResourceBody::Link(_) => link::POLICIES,
            ResourceBody::Patch(_) => patch::POLICIES,
            ResourceBody::Checkout(_) => checkout::POLICIES,
            ResourceBody::User(_) => user::POLICIES,
            ResourceBody::Group(_) => group::POLICIES,
        };
        policy::validate(self.type_name(), policy_name, present, specs)
    }

    /// Resolve exactly one provider and run it, returning whether it
    /// mutated system state. `NoSuitableProviders`/`TooManyProviders` are
    /// raised by the individual provider modules, which fold `isvalid`
    /// into their policy match arms (the closed, exhaustively-matched enum
    /// is this crate's equivalent of the source's provider registry).
    ///
    /// `original_hash` is only consulted by `File.watched`: the bundle
    /// records the watched file's pre-apply content hash there so the
    /// provider can detect drift caused by another resource.
    pub fn apply(
        &self,
        policy_name: &str,
        ctx: &RunnerCtx,
        original_hash: Option<&str>,
    ) -> Result<bool> {
        match self {
            ResourceBody::File(a) => file::apply(a, policy_name, ctx, original_hash),
            ResourceBody::Directory(a) => directory::apply(a, policy_name, ctx),
            ResourceBody::Execute(a) => execute::apply(a, policy_name, ctx),
            ResourceBody::Package(a) => package::apply(a, policy_name, ctx),
            ResourceBody::Service(a) => service::apply(a, policy_name, ctx),
            ResourceBody::Mount(a) => mount::apply(a, policy_name, ctx),
            ResourceBody::Line(a) => line::apply(a, policy_name, ctx),
            ResourceBody::Link(a) => link::apply(a, policy_name, ctx),
            ResourceBody::Patch(a) => patch::apply(a, policy_name, ctx),
            ResourceBody::Checkout(a) => checkout::apply(a, policy_name, ctx),
            ResourceBody::User(a) => user::apply(a, policy_name, ctx),
            ResourceBody::Group(a) => group::apply(a, policy_name, ctx),
        }
    }

    /// The filesystem path a `File` resource represents, if this is one.
    /// Used by the bundle to take a pre-apply content hash for resources
    /// whose active policy is `watched`.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            ResourceBody::File(a) => Some(a.name.as_str()),
            _ => None,
        }
    }

    pub fn serialize(&self) -> Value {
        match self {
            ResourceBody::File(a) => file::serialize(a),
            ResourceBody::Directory(a) => directory::serialize(a),
            ResourceBody::Execute(a) => execute::serialize(a),
            ResourceBody::Package(a) => package::serialize(a),
            ResourceBody::Service(a) => service::serialize(a),
            ResourceBody::Mount(a) => mount::serialize(a),
            ResourceBody::Line(a) => line::serialize(a),
            ResourceBody::Link(a) => link::serialize(a),
            ResourceBody::Patch(a) => patch::serialize(a),
            ResourceBody::Checkout(a) => checkout::serialize(a),
            ResourceBody::User(a) => user::serialize(a),
            ResourceBody::Group(a) => group::serialize(a),
        }
    }
}

/// A typed record with an identity, a chosen policy, and its subscription
/// graph edges. Mirrors `fuselage.resource.Resource`.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: String,
    pub body: ResourceBody,
    pub policy: String,
    pub present: HashSet<String>,
    pub watches: Vec<PolicyTrigger>,
    pub changes: Vec<String>,
    pub implicit: bool,
    pub original_hash: RefCell<Option<String>>,
}

impl Resource {
    /// Construct a resource from a raw, loosely-typed `{field: value}` map:
    /// coerce each declared argument, derive or validate the id, select and
    /// validate the policy. Unknown fields are rejected with `ParseError`.
    pub fn new(type_name: &str, raw: Map<String, Value>) -> Result<Resource> {
        let mut present: HashSet<String> = raw.keys().cloned().collect();
        present.remove("id");
        present.remove("policy");
        present.remove("watches");
        present.remove("changes");

        let body = providers::build(type_name, &raw)?;

        let id = match raw.get("id").and_then(|v| v.as_str()) {
            Some(explicit) => explicit.to_string(),
            None => body.default_id(&raw).ok_or_else(|| {
                FuselageError::ParseError(format!(
                    "{type_name} resource has no id and none could be derived"
                ))
            })?,
        };

        let policy_name = crate::argument::coerce_policy(
            raw.get("policy"),
            &body.policy_table(),
            type_name,
        )?;
        body.validate_policy(&policy_name, &present)?;

        let watches = match raw.get("watches") {
            Some(v) => crate::argument::coerce_subscription(v)?,
            None => Vec::new(),
        };
        let changes = match raw.get("changes") {
            Some(v) => crate::argument::coerce_list(v)?,
            None => Vec::new(),
        };

        Ok(Resource {
            id,
            body,
            policy: policy_name,
            present,
            watches,
            changes,
            implicit: false,
            original_hash: RefCell::new(None),
        })
    }

    /// `{"<ResourceTypeName>": {field: value, ...}}`, omitting implicit
    /// resources from the output entirely.
    pub fn serialize(&self) -> Option<Value> {
        if self.implicit {
            return None;
        }
        let mut fields = self.body.serialize();
        if let Value::Object(ref mut map) = fields {
            if self.policy != self.default_policy_name() {
                map.insert("policy".to_string(), Value::String(self.policy.clone()));
            }
            if !self.watches.is_empty() {
                map.insert(
                    "watches".to_string(),
                    Value::Array(
                        self.watches
                            .iter()
                            .map(|t| Value::String(t.on.clone()))
                            .collect(),
                    ),
                );
            }
            if !self.changes.is_empty() {
                map.insert(
                    "changes".to_string(),
                    Value::Array(self.changes.iter().cloned().map(Value::String).collect()),
                );
            }
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }
        let mut outer = Map::new();
        outer.insert(self.body.type_name().to_string(), fields);
        Some(Value::Object(outer))
    }

    /// Take and store this resource's current content hash, for the
    /// `File.watched` drift check. Called on every resource before the
    /// apply pass begins, so each watched file's pre-hash is recorded
    /// before anything in the bundle has a chance to change it.
    pub fn capture_watch_hash(&self) {
        if self.policy == "watched" {
            if let Some(path) = self.body.file_path() {
                let hash = crate::tripwire::hasher::hash_file(std::path::Path::new(path)).ok();
                *self.original_hash.borrow_mut() = hash;
            }
        }
    }

    /// Resolve this resource's provider and apply it, threading the
    /// captured watch hash through to the `File.watched` provider.
    pub fn apply(&self, ctx: &RunnerCtx) -> Result<bool> {
        self.body
            .apply(&self.policy, ctx, self.original_hash.borrow().as_deref())
    }

    fn default_policy_name(&self) -> &'static str {
        self.body
            .policy_table()
            .into_iter()
            .find(|(_, default)| *default)
            .map(|(name, _)| name)
            .unwrap_or("apply")
    }
}
