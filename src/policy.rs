//! Policy assertion calculus — `Present`/`Absent`/`AND`/`NAND`/`OR`/`XOR`
//! over argument presence, plus policy signature validation.

use crate::error::{FuselageError, Result};
use std::collections::HashSet;

/// A node in a policy's precondition tree.
#[derive(Debug, Clone)]
pub enum Assertion {
    Present(&'static str),
    Absent(&'static str),
    And(Vec<Assertion>),
    Nand(Vec<Assertion>),
    Or(Vec<Assertion>),
    Xor(Vec<Assertion>),
}

impl Assertion {
    /// Evaluate this node against the set of field names the caller
    /// explicitly supplied.
    pub fn test(&self, present: &HashSet<String>) -> bool {
        match self {
            Assertion::Present(name) => present.contains(*name),
            Assertion::Absent(name) => !present.contains(*name),
            Assertion::And(children) => children.iter().all(|c| c.test(present)),
            Assertion::Nand(children) => children.iter().filter(|c| c.test(present)).count() <= 1,
            Assertion::Or(children) => children.iter().any(|c| c.test(present)),
            Assertion::Xor(children) => children.iter().filter(|c| c.test(present)).count() == 1,
        }
    }

    /// Human-readable trace of this node's evaluation, for
    /// `NonConformingPolicy` diagnostics.
    pub fn describe(&self, present: &HashSet<String>) -> Vec<String> {
        match self {
            Assertion::Present(name) => {
                vec![format!(
                    "{name} present: {}",
                    present.contains(*name)
                )]
            }
            Assertion::Absent(name) => {
                vec![format!(
                    "{name} absent: {}",
                    !present.contains(*name)
                )]
            }
            Assertion::And(children) => describe_group("AND", children, present),
            Assertion::Nand(children) => describe_group("NAND", children, present),
            Assertion::Or(children) => describe_group("OR", children, present),
            Assertion::Xor(children) => describe_group("XOR", children, present),
        }
    }
}

fn describe_group(label: &str, children: &[Assertion], present: &HashSet<String>) -> Vec<String> {
    let mut lines = vec![format!("{label}(")];
    for child in children {
        lines.extend(child.describe(present));
    }
    lines.push(")".to_string());
    lines
}

/// A named mode of a resource type (e.g. `File.apply`, `File.remove`).
#[derive(Debug, Clone)]
pub struct PolicySpec {
    pub name: &'static str,
    pub default: bool,
    pub signature: Assertion,
}

/// `Policy.validate(resource)`: find the named policy and check its
/// signature against the field presence set; on failure, raise
/// `NonConformingPolicy` with a human-readable trace.
pub fn validate(
    resource_type: &str,
    policy_name: &str,
    present: &HashSet<String>,
    specs: &[PolicySpec],
) -> Result<()> {
    let spec = specs
        .iter()
        .find(|s| s.name == policy_name)
        .ok_or_else(|| {
            FuselageError::ParseError(format!(
                "{resource_type} has no policy named '{policy_name}'"
            ))
        })?;

    if spec.signature.test(present) {
        Ok(())
    } else {
        let trace = spec.signature.describe(present).join("\n  ");
        Err(FuselageError::NonConformingPolicy(format!(
            "{resource_type}.{policy_name} signature not satisfied:\n  {trace}"
        )))
    }
}

/// Names of all policies in `specs` flagged `default: true`, paired with
/// their default bit — used by `argument::coerce_policy`.
pub fn policy_table(specs: &[PolicySpec]) -> Vec<(&'static str, bool)> {
    specs.iter().map(|s| (s.name, s.default)).collect()
}
