//! Startup-time tables of record shapes, resources and their access declarations.
//!
//! The registry is filled once (from a declarations file or by explicit
//! registration), validated eagerly, and read-only afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::Serialize;

use super::declarations::AccessDeclarations;
use super::error::AccessError;
use super::expression::{Environment, ExpressionError};
use super::field::{FieldAccessRule, OwnerRule};
use super::locator::{CallSiteDescriptor, Declaration, PolicyLocator};
use super::rule::{Join, OwnershipClause, RuleNode, ValueSource};

/// Many-to-one relation from a record type to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub target: String,
    pub local_column: String,
    pub foreign_column: String,
}

/// Declared shape of a persisted record type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordShape {
    pub name: String,
    pub table: String,
    pub fields: BTreeSet<String>,
    pub relations: BTreeMap<String, Relation>,
    pub owner: Option<OwnerRule>,
    pub field_access: BTreeMap<String, FieldAccessRule>,
    pub declaration: Declaration,
}

impl RecordShape {
    pub fn new<I, S>(name: impl Into<String>, table: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table: table.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains(field)
    }
}

/// An exposed resource and the record type it serves
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceType {
    pub name: String,
    pub record_type: String,
    pub declaration: Declaration,
    pub operations: BTreeMap<String, Declaration>,
}

impl ResourceType {
    pub fn new(name: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self { name: name.into(), record_type: record_type.into(), ..Default::default() }
    }
}

/// Where a request lands: a resource and the operation invoked on it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub resource: String,
    pub operation: String,
}

impl CallSite {
    pub fn new(resource: impl Into<String>, operation: impl Into<String>) -> Self {
        Self { resource: resource.into(), operation: operation.into() }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.operation)
    }
}

/// Outcome of startup validation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub records: usize,
    pub resources: usize,
    pub restricted: Vec<String>,
    pub unrestricted: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessRegistry {
    constants: BTreeMap<String, String>,
    records: BTreeMap<String, RecordShape>,
    resources: BTreeMap<String, ResourceType>,
}

impl AccessRegistry {
    pub fn new(constants: BTreeMap<String, String>) -> Self {
        Self { constants, ..Default::default() }
    }

    pub fn from_declarations(declarations: AccessDeclarations) -> Result<Self, AccessError> {
        declarations.into_registry()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AccessError> {
        Self::from_declarations(AccessDeclarations::load(path)?)
    }

    pub fn register_record(&mut self, record: RecordShape) -> Result<&mut Self, AccessError> {
        if self.records.contains_key(&record.name) {
            return Err(AccessError::InvalidDeclaration(format!("record type '{}' registered twice", record.name)));
        }
        self.records.insert(record.name.clone(), record);
        Ok(self)
    }

    pub fn register_resource(&mut self, resource: ResourceType) -> Result<&mut Self, AccessError> {
        if self.resources.contains_key(&resource.name) {
            return Err(AccessError::InvalidDeclaration(format!("resource '{}' registered twice", resource.name)));
        }
        self.resources.insert(resource.name.clone(), resource);
        Ok(self)
    }

    pub fn constants(&self) -> &BTreeMap<String, String> {
        &self.constants
    }

    pub fn record(&self, name: &str) -> Option<&RecordShape> {
        self.records.get(name)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceType> {
        self.resources.get(name)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceType> {
        self.resources.values()
    }

    /// Record type exposed by a resource
    pub fn record_for(&self, resource: &str) -> Result<&RecordShape, AccessError> {
        let resource = self.resource(resource).ok_or_else(|| AccessError::UnknownResource(resource.to_string()))?;
        self.record(&resource.record_type)
            .ok_or_else(|| AccessError::UnknownRecordType(resource.record_type.clone()))
    }

    /// Collect the declarations of every scope level for a call site
    pub fn descriptor(&self, site: &CallSite) -> Result<CallSiteDescriptor<'_>, AccessError> {
        let resource = self
            .resource(&site.resource)
            .ok_or_else(|| AccessError::UnknownResource(site.resource.clone()))?;
        let record = self
            .record(&resource.record_type)
            .ok_or_else(|| AccessError::UnknownRecordType(resource.record_type.clone()))?;

        let mut descriptor = CallSiteDescriptor::new(site.to_string());
        if let Some(operation) = resource.operations.get(&site.operation) {
            descriptor.operation = operation.as_level();
        }
        descriptor.resource_type = resource.declaration.as_level();
        descriptor.record_type = record.declaration.as_level();
        Ok(descriptor)
    }

    /// Check every declaration against the record types it can apply to.
    /// Any error here is a configuration error and should stop startup.
    pub fn validate(&self) -> Result<ValidationReport, AccessError> {
        let mut report = ValidationReport {
            records: self.records.len(),
            resources: self.resources.len(),
            ..Default::default()
        };

        for record in self.records.values() {
            self.validate_record_shape(record)?;
            if let Some(rule) = &record.declaration.rule {
                self.validate_rule(rule, record)?;
            }
            // record types nobody exposes are their own call site
            let exposed = self.resources.values().any(|r| r.record_type == record.name);
            if !exposed && record.declaration.policy.is_some() && record.declaration.rule.is_none() {
                return Err(AccessError::MissingRuleTree { site: record.name.clone() });
            }
        }

        for resource in self.resources.values() {
            let record = self
                .record(&resource.record_type)
                .ok_or_else(|| AccessError::UnknownRecordType(resource.record_type.clone()))?;

            let declared_rules = std::iter::once(&resource.declaration)
                .chain(resource.operations.values())
                .filter_map(|d| d.rule.as_ref());
            for rule in declared_rules {
                self.validate_rule(rule, record)?;
            }

            // the resource default plus every declared operation
            let operations = std::iter::once(String::new()).chain(resource.operations.keys().cloned());
            for operation in operations {
                let site = CallSite::new(&resource.name, operation);
                let descriptor = self.descriptor(&site)?;
                let name = if site.operation.is_empty() { resource.name.clone() } else { site.to_string() };
                match PolicyLocator::locate_restriction(&descriptor) {
                    Ok(Some(restriction)) => {
                        tracing::debug!(
                            site = %name,
                            rule_level = %restriction.rule_level,
                            policy_level = %restriction.policy_level,
                            "restriction declared"
                        );
                        report.restricted.push(name);
                    }
                    Ok(None) => report.unrestricted.push(name),
                    Err(AccessError::MissingRuleTree { .. }) => return Err(AccessError::MissingRuleTree { site: name }),
                    Err(other) => return Err(other),
                }
            }
        }

        Ok(report)
    }

    fn validate_record_shape(&self, record: &RecordShape) -> Result<(), AccessError> {
        let unresolvable = |path: &str| AccessError::UnresolvableEntityPath {
            record_type: record.name.clone(),
            path: path.to_string(),
        };

        if record.table.is_empty() {
            return Err(AccessError::InvalidDeclaration(format!("record type '{}' has no table", record.name)));
        }
        for (name, relation) in &record.relations {
            let target = self
                .record(&relation.target)
                .ok_or_else(|| AccessError::UnknownRecordType(relation.target.clone()))?;
            if !record.has_field(&relation.local_column) {
                return Err(unresolvable(&relation.local_column));
            }
            if !target.has_field(&relation.foreign_column) {
                return Err(AccessError::UnresolvableEntityPath {
                    record_type: target.name.clone(),
                    path: format!("{} (relation '{}')", relation.foreign_column, name),
                });
            }
        }
        if let Some(owner) = &record.owner {
            if !record.has_field(&owner.field) {
                return Err(unresolvable(&owner.field));
            }
        }
        if let Some(field) = record.field_access.keys().find(|f| !record.has_field(f)) {
            return Err(unresolvable(field));
        }
        Ok(())
    }

    fn validate_rule(&self, rule: &RuleNode, record: &RecordShape) -> Result<(), AccessError> {
        // one query joins each alias once, so an alias must mean the same join everywhere in the tree
        let mut aliases: BTreeMap<&str, &Join> = BTreeMap::new();
        for clause in rule.clauses() {
            self.validate_clause(clause, record)?;
            for join in &clause.joins {
                match aliases.get(join.alias.as_str()) {
                    Some(seen) if *seen != join => {
                        return Err(AccessError::InvalidDeclaration(format!(
                            "join alias '{}' on '{}' refers to both '{}' ({:?}) and '{}' ({:?})",
                            join.alias, record.name, seen.relation, seen.kind, join.relation, join.kind
                        )));
                    }
                    Some(_) => {}
                    None => {
                        aliases.insert(&join.alias, join);
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_clause(&self, clause: &OwnershipClause, record: &RecordShape) -> Result<(), AccessError> {
        let unresolvable = || AccessError::UnresolvableEntityPath {
            record_type: record.name.clone(),
            path: clause.entity_path.clone(),
        };

        if clause.entity_path.trim().is_empty() {
            return Err(AccessError::InvalidDeclaration(format!(
                "empty entity path in ownership rule on '{}'",
                record.name
            )));
        }

        for join in &clause.joins {
            if !record.relations.contains_key(&join.relation) {
                return Err(AccessError::UnresolvableEntityPath {
                    record_type: record.name.clone(),
                    path: format!("{} (join '{}')", join.relation, join.alias),
                });
            }
        }

        match clause.entity_path.split('.').collect::<Vec<_>>().as_slice() {
            [field] if record.has_field(field) => {}
            [alias, field] => {
                let join = clause.join_for(alias).ok_or_else(unresolvable)?;
                let relation = record.relations.get(&join.relation).ok_or_else(unresolvable)?;
                let target = self
                    .record(&relation.target)
                    .ok_or_else(|| AccessError::UnknownRecordType(relation.target.clone()))?;
                if !target.has_field(field) {
                    return Err(unresolvable());
                }
            }
            _ => return Err(unresolvable()),
        }

        if let ValueSource::Expression(expression) = &clause.value_source {
            if let Some(symbol) = expression.symbols().into_iter().find(|s| !self.constants.contains_key(*s)) {
                return Err(ExpressionError::UndefinedSymbol(symbol.to_string()).into());
            }
            // dry run catches type errors on constant inputs
            expression.evaluate(&Environment::new(&self.constants))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::expression::Expression;
    use crate::access::policy::RestrictionPolicy;
    use crate::access::rule::JoinKind;

    fn registry() -> AccessRegistry {
        let mut registry = AccessRegistry::new(BTreeMap::from([("public".to_string(), "public".to_string())]));
        let mut native = RecordShape::new("Native", "native", ["id", "prop", "created_by", "visibility", "foreign_id"]);
        native.relations.insert(
            "foreign".into(),
            Relation { target: "Foreign".into(), local_column: "foreign_id".into(), foreign_column: "id".into() },
        );
        registry.register_record(native).unwrap();
        registry.register_record(RecordShape::new("Foreign", "foreign", ["id", "owner"])).unwrap();
        registry
    }

    fn with_resource(mut registry: AccessRegistry, resource: ResourceType) -> AccessRegistry {
        registry.register_resource(resource).unwrap();
        registry
    }

    #[test]
    fn descriptor_collects_all_levels() {
        let mut resource = ResourceType::new("native", "Native");
        resource.operations.insert(
            "list".into(),
            Declaration::new(Some(RuleNode::Leaf(OwnershipClause::new("created_by"))), None),
        );
        resource.declaration.policy = Some(RestrictionPolicy::for_rights(["READ_OWN"]));
        let registry = with_resource(registry(), resource);

        let descriptor = registry.descriptor(&CallSite::new("native", "list")).unwrap();
        assert!(descriptor.operation.rule.is_some());
        assert!(descriptor.resource_type.policy.is_some());
        assert!(descriptor.record_type.rule.is_none());

        let other = registry.descriptor(&CallSite::new("native", "find")).unwrap();
        assert!(other.operation.rule.is_none());
    }

    #[test]
    fn unknown_resource_is_reported() {
        let registry = registry();
        assert_eq!(
            registry.descriptor(&CallSite::new("nope", "list")).unwrap_err(),
            AccessError::UnknownResource("nope".to_string())
        );
    }

    #[test]
    fn validate_reports_restricted_and_unrestricted_sites() {
        let mut resource = ResourceType::new("native", "Native");
        resource.operations.insert(
            "restricted".into(),
            Declaration::new(
                Some(RuleNode::Leaf(OwnershipClause::new("created_by"))),
                Some(RestrictionPolicy::for_rights(["READ_OWN"])),
            ),
        );
        let report = with_resource(registry(), resource).validate().unwrap();
        assert_eq!(report.restricted, vec!["native:restricted".to_string()]);
        assert_eq!(report.unrestricted, vec!["native".to_string()]);
    }

    #[test]
    fn validate_rejects_policy_without_rule() {
        let mut resource = ResourceType::new("native", "Native");
        resource.declaration.policy = Some(RestrictionPolicy::for_roles(["USER"]));
        let err = with_resource(registry(), resource).validate().unwrap_err();
        assert_eq!(err, AccessError::MissingRuleTree { site: "native".to_string() });
    }

    #[test]
    fn validate_rejects_unknown_paths() {
        let mut resource = ResourceType::new("native", "Native");
        resource.declaration.rule = Some(RuleNode::Leaf(OwnershipClause::new("owner_email")));
        let err = with_resource(registry(), resource).validate().unwrap_err();
        assert_eq!(
            err,
            AccessError::UnresolvableEntityPath { record_type: "Native".into(), path: "owner_email".into() }
        );
    }

    #[test]
    fn joined_path_requires_declared_join() {
        let join = Join { relation: "foreign".into(), alias: "f".into(), kind: JoinKind::Left };

        let mut ok = ResourceType::new("native", "Native");
        ok.declaration.rule = Some(RuleNode::Leaf(OwnershipClause::new("f.owner").join(join)));
        assert!(with_resource(registry(), ok).validate().is_ok());

        let mut missing_join = ResourceType::new("native", "Native");
        missing_join.declaration.rule = Some(RuleNode::Leaf(OwnershipClause::new("f.owner")));
        assert!(matches!(
            with_resource(registry(), missing_join).validate(),
            Err(AccessError::UnresolvableEntityPath { .. })
        ));
    }

    #[test]
    fn alias_must_name_one_join_across_the_tree() {
        let mut registry = registry();
        registry.register_record(RecordShape::new("Other", "other", ["id", "owner"])).unwrap();
        let mut native = registry.records.remove("Native").unwrap();
        native.fields.insert("other_id".into());
        native.relations.insert(
            "other".into(),
            Relation { target: "Other".into(), local_column: "other_id".into(), foreign_column: "id".into() },
        );
        registry.records.insert("Native".into(), native);

        let foreign = Join { relation: "foreign".into(), alias: "f".into(), kind: JoinKind::Left };
        let other = Join { relation: "other".into(), alias: "f".into(), kind: JoinKind::Left };
        let mut resource = ResourceType::new("native", "Native");
        resource.declaration.rule = Some(RuleNode::Or(vec![
            RuleNode::Leaf(OwnershipClause::new("f.owner").join(foreign.clone())),
            RuleNode::Leaf(OwnershipClause::new("f.id").join(other)),
        ]));
        assert!(matches!(
            with_resource(registry.clone(), resource).validate(),
            Err(AccessError::InvalidDeclaration(_))
        ));

        // the same join repeated under one alias is fine
        let mut repeated = ResourceType::new("native", "Native");
        repeated.declaration.rule = Some(RuleNode::Or(vec![
            RuleNode::Leaf(OwnershipClause::new("f.owner").join(foreign.clone())),
            RuleNode::Leaf(OwnershipClause::new("f.id").join(foreign)),
        ]));
        assert!(with_resource(registry, repeated).validate().is_ok());
    }

    #[test]
    fn validate_rejects_undefined_expression_symbols() {
        let mut resource = ResourceType::new("native", "Native");
        resource.declaration.rule = Some(RuleNode::Leaf(
            OwnershipClause::new("visibility").expression(Expression::parse("lower(privat)").unwrap()),
        ));
        assert_eq!(
            with_resource(registry(), resource).validate().unwrap_err(),
            AccessError::Expression(ExpressionError::UndefinedSymbol("privat".to_string()))
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry();
        assert!(registry.register_record(RecordShape::new("Native", "native", ["id"])).is_err());
    }
}
