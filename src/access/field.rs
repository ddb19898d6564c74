use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::caller::Caller;

fn default_true() -> bool {
    true
}

fn default_owner_attribute() -> String {
    Caller::ID_ATTRIBUTE.to_string()
}

/// Per-field rule controlling whether a property is serialized for a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAccessRule {
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub rights: BTreeSet<String>,
    #[serde(default = "default_true")]
    pub allow_for_owner: bool,
}

impl Default for FieldAccessRule {
    fn default() -> Self {
        Self { roles: BTreeSet::new(), rights: BTreeSet::new(), allow_for_owner: true }
    }
}

impl FieldAccessRule {
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_right(mut self, right: impl Into<String>) -> Self {
        self.rights.insert(right.into());
        self
    }

    pub fn allow_for_owner(mut self, allow: bool) -> Self {
        self.allow_for_owner = allow;
        self
    }
}

/// Ownership check implemented by subjects that want owner-based field exposure
pub trait Ownable {
    fn is_owned_by(&self, caller: &Caller) -> bool;
}

/// Ownership declared on a record type: the record is owned when `field`
/// equals the caller's `attribute`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRule {
    pub field: String,
    #[serde(default = "default_owner_attribute")]
    pub attribute: String,
}

/// A JSON record paired with its record type's owner rule
pub struct OwnedRecord<'a> {
    record: &'a Map<String, Value>,
    rule: &'a OwnerRule,
}

impl<'a> OwnedRecord<'a> {
    pub fn new(record: &'a Map<String, Value>, rule: &'a OwnerRule) -> Self {
        Self { record, rule }
    }
}

impl Ownable for OwnedRecord<'_> {
    fn is_owned_by(&self, caller: &Caller) -> bool {
        let Some(expected) = caller.attribute(&self.rule.attribute) else {
            return false;
        };
        match self.record.get(&self.rule.field) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Number(n)) => n.to_string() == expected,
            _ => false,
        }
    }
}

/// Decides per field whether it is written to an outgoing payload
pub struct FieldAccessFilter;

impl FieldAccessFilter {
    pub fn included(rule: Option<&FieldAccessRule>, subject: Option<&dyn Ownable>, caller: &Caller) -> bool {
        let Some(rule) = rule else {
            return true;
        };

        if caller.has_any_right(&rule.rights) {
            return true;
        }
        // API token principals are matched on rights alone
        if caller.is_api_token() {
            return false;
        }
        if caller.has_any_role(&rule.roles) {
            return true;
        }
        rule.allow_for_owner && subject.is_some_and(|s| s.is_owned_by(caller))
    }

    /// Drop every field of `record` the caller may not see
    pub fn filter_record(
        mut record: Map<String, Value>,
        rules: &BTreeMap<String, FieldAccessRule>,
        subject: Option<&dyn Ownable>,
        caller: &Caller,
    ) -> Map<String, Value> {
        let omitted: Vec<String> = record
            .keys()
            .filter(|field| !Self::included(rules.get(field.as_str()), subject, caller))
            .cloned()
            .collect();

        for field in &omitted {
            record.remove(field);
        }
        if !omitted.is_empty() {
            tracing::trace!(caller = caller.id().unwrap_or("<anonymous>"), ?omitted, "omitted fields");
        }
        record
    }
}
