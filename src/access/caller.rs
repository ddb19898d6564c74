use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::error::AccessError;

/// Kind of authenticated principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    #[default]
    User,
    /// Machine caller authenticated by API token: carries rights only and
    /// never owns records
    ApiToken,
}

/// Read-only view of the authenticated principal for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    #[serde(default)]
    pub kind: PrincipalKind,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub rights: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Caller {
    pub const ID_ATTRIBUTE: &'static str = "id";

    pub fn new(id: impl Into<String>) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(Self::ID_ATTRIBUTE.to_string(), id.into());
        Self {
            kind: PrincipalKind::User,
            roles: BTreeSet::new(),
            rights: BTreeSet::new(),
            attributes,
        }
    }

    pub fn with_kind(mut self, kind: PrincipalKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_right(mut self, right: impl Into<String>) -> Self {
        self.rights.insert(right.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute(Self::ID_ATTRIBUTE)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute lookup that fails loudly when the attribute is missing
    pub fn require_attribute(&self, name: &str) -> Result<&str, AccessError> {
        self.attribute(name).ok_or_else(|| AccessError::AttributeNotFound(name.to_string()))
    }

    pub fn has_any_role<'a>(&self, roles: impl IntoIterator<Item = &'a String>) -> bool {
        roles.into_iter().any(|r| self.roles.contains(r))
    }

    pub fn has_any_right<'a>(&self, rights: impl IntoIterator<Item = &'a String>) -> bool {
        rights.into_iter().any(|r| self.rights.contains(r))
    }

    pub fn is_api_token(&self) -> bool {
        self.kind == PrincipalKind::ApiToken
    }
}
