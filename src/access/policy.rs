use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::caller::Caller;

/// Roles and rights for which an ownership restriction must be enforced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionPolicy {
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub rights: BTreeSet<String>,
}

impl RestrictionPolicy {
    pub fn for_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { roles: roles.into_iter().map(Into::into).collect(), rights: BTreeSet::new() }
    }

    pub fn for_rights<I, S>(rights: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { roles: BTreeSet::new(), rights: rights.into_iter().map(Into::into).collect() }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_right(mut self, right: impl Into<String>) -> Self {
        self.rights.insert(right.into());
        self
    }

    /// A policy listing neither roles nor rights can never apply
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.rights.is_empty()
    }
}

/// Decides whether a restriction policy applies to the caller
pub struct RestrictionGate;

impl RestrictionGate {
    pub fn applies(policy: &RestrictionPolicy, caller: &Caller) -> bool {
        let applies = caller.has_any_role(&policy.roles) || caller.has_any_right(&policy.rights);
        tracing::trace!(
            caller = caller.id().unwrap_or("<anonymous>"),
            applies,
            "restriction gate evaluated"
        );
        applies
    }
}
