//! Provider registry — maps a resource type name to its typed argument
//! struct, policy table and apply/serialize functions.
//!
//! The source's metaclass-driven provider registry (populated by import-time
//! side effects) becomes a single `build` dispatch over a closed enum: there
//! are exactly twelve resource kinds, so a `match` on the type name plays the
//! role of `ResourceType.resources` and `isvalid`-based provider selection
//! happens inside each submodule's own `apply`, which already knows which
//! policies exist for its resource and can match on `policy_name` directly.

pub mod checkout;
pub mod directory;
pub mod execute;
pub mod file;
pub mod group;
pub mod line;
pub mod link;
pub mod mount;
pub mod package;
pub mod patch;
pub mod service;
pub mod user;

use crate::error::{FuselageError, Result};
use crate::resource::ResourceBody;
use serde_json::{Map, Value};

/// `ResourceType.resources[typename]`: look up and construct the typed
/// argument struct for a raw `{field: value}` map.
pub fn build(type_name: &str, raw: &Map<String, Value>) -> Result<ResourceBody> {
    match type_name {
        "File" => Ok(ResourceBody::File(file::build(raw)?)),
        "Directory" => Ok(ResourceBody::Directory(directory::build(raw)?)),
        "Execute" => Ok(ResourceBody::Execute(execute::build(raw)?)),
        "Package" => Ok(ResourceBody::Package(package::build(raw)?)),
        "Service" => Ok(ResourceBody::Service(service::build(raw)?)),
        "Mount" => Ok(ResourceBody::Mount(mount::build(raw)?)),
        "Line" => Ok(ResourceBody::Line(line::build(raw)?)),
        "Link" => Ok(ResourceBody::Link(link::build(raw)?)),
        "Patch" => Ok(ResourceBody::Patch(patch::build(raw)?)),
        "Checkout" => Ok(ResourceBody::Checkout(checkout::build(raw)?)),
        "User" => Ok(ResourceBody::User(user::build(raw)?)),
        "Group" => Ok(ResourceBody::Group(group::build(raw)?)),
        other => Err(FuselageError::ParseError(format!(
            "there is no resource type of '{other}'"
        ))),
    }
}

/// Shared helper: pull a plain string field out of the raw map.
pub(crate) fn get_str(raw: &Map<String, Value>, key: &str) -> Option<String> {
    raw.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

pub(crate) fn require_str(raw: &Map<String, Value>, key: &str, type_name: &str) -> Result<String> {
    get_str(raw, key).ok_or_else(|| {
        FuselageError::ParseError(format!("{type_name} requires a '{key}' argument"))
    })
}
