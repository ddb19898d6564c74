//! File format for access declarations.
//!
//! ```yaml
//! constants:
//!   public: public
//! records:
//!   Native:
//!     table: native
//!     fields: [id, prop, created_by, foreign_id]
//!     relations:
//!       foreign: { record: Foreign, local: foreign_id }
//!     owner: { field: created_by }
//!     field_access:
//!       prop: { roles: [ADMIN] }
//! resources:
//!   native:
//!     exposes: Native
//!     restriction: { rights: [READ_OWN] }
//!     ownership:
//!       - leaf: { path: created_by }
//!     operations:
//!       list:
//!         ownership:
//!           - or:
//!               - leaf: { path: created_by }
//!               - leaf: { path: f.owner, joins: [{ relation: foreign, alias: f }] }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

use super::error::AccessError;
use super::expression::Expression;
use super::field::{FieldAccessRule, OwnerRule};
use super::locator::Declaration;
use super::policy::RestrictionPolicy;
use super::registry::{AccessRegistry, RecordShape, Relation, ResourceType};
use super::rule::{Comparator, Join, OwnershipClause, RuleNode, ValueSource};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessDeclarations {
    #[serde(default)]
    pub constants: BTreeMap<String, String>,
    #[serde(default)]
    pub records: BTreeMap<String, RecordDecl>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordDecl {
    /// Defaults to the record type name in lower case
    pub table: Option<String>,
    pub fields: Vec<String>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationDecl>,
    pub owner: Option<OwnerRule>,
    #[serde(default)]
    pub field_access: BTreeMap<String, FieldAccessRule>,
    pub restriction: Option<RestrictionPolicy>,
    #[serde(default)]
    pub ownership: Vec<RuleDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationDecl {
    pub record: String,
    pub local: String,
    #[serde(default = "default_foreign")]
    pub foreign: String,
}

fn default_foreign() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    pub exposes: String,
    pub restriction: Option<RestrictionPolicy>,
    #[serde(default)]
    pub ownership: Vec<RuleDecl>,
    #[serde(default)]
    pub operations: BTreeMap<String, OperationDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationDecl {
    pub restriction: Option<RestrictionPolicy>,
    #[serde(default)]
    pub ownership: Vec<RuleDecl>,
}

/// One rule node. Exactly one of the keys must be present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDecl {
    pub leaf: Option<ClauseDecl>,
    pub and: Option<Vec<RuleDecl>>,
    pub or: Option<Vec<RuleDecl>>,
    pub conjunction: Option<ConjunctionDecl>,
    pub disjunction: Option<DisjunctionDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConjunctionDecl {
    pub ors: Vec<Vec<RuleDecl>>,
    #[serde(default)]
    pub and: Vec<ClauseDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisjunctionDecl {
    pub ands: Vec<Vec<RuleDecl>>,
    #[serde(default)]
    pub or: Vec<ClauseDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClauseDecl {
    pub path: String,
    #[serde(default)]
    pub op: Comparator,
    /// Literal comparison value
    pub value: Option<String>,
    /// Computed comparison value
    pub expression: Option<String>,
    /// Caller attribute supplying the value; `id` when nothing else is given
    pub attribute: Option<String>,
    #[serde(default)]
    pub joins: Vec<Join>,
}

impl ClauseDecl {
    fn into_clause(self) -> Result<OwnershipClause, AccessError> {
        let value_source = match (self.value, self.expression, self.attribute) {
            (None, None, None) => ValueSource::caller_id(),
            (Some(literal), None, None) => ValueSource::Literal(literal),
            (None, Some(source), None) => ValueSource::Expression(Expression::parse(&source)?),
            (None, None, Some(attribute)) => ValueSource::CallerAttribute(attribute),
            _ => {
                return Err(AccessError::InvalidDeclaration(format!(
                    "clause on '{}' declares more than one of value, expression, attribute",
                    self.path
                )))
            }
        };

        {
            let mut aliases = BTreeSet::new();
            if let Some(join) = self.joins.iter().find(|j| !aliases.insert(j.alias.as_str())) {
                return Err(AccessError::InvalidDeclaration(format!(
                    "join alias '{}' declared twice on '{}'",
                    join.alias, self.path
                )));
            }
        }

        Ok(OwnershipClause { entity_path: self.path, operator: self.op, value_source, joins: self.joins })
    }
}

impl RuleDecl {
    fn into_node(self) -> Result<RuleNode, AccessError> {
        let forms = [
            self.leaf.is_some(),
            self.and.is_some(),
            self.or.is_some(),
            self.conjunction.is_some(),
            self.disjunction.is_some(),
        ];
        if forms.iter().filter(|set| **set).count() != 1 {
            return Err(AccessError::InvalidDeclaration(
                "rule node must declare exactly one of leaf, and, or, conjunction, disjunction".to_string(),
            ));
        }

        if let Some(clause) = self.leaf {
            return Ok(RuleNode::Leaf(clause.into_clause()?));
        }
        if let Some(children) = self.and {
            return Ok(RuleNode::And(into_nodes(children)?));
        }
        if let Some(children) = self.or {
            return Ok(RuleNode::Or(into_nodes(children)?));
        }
        if let Some(c) = self.conjunction {
            return Ok(RuleNode::Conjunction {
                ors: c.ors.into_iter().map(into_nodes).collect::<Result<_, _>>()?,
                extra_and: into_clauses(c.and)?,
            });
        }
        match self.disjunction {
            Some(d) => Ok(RuleNode::Disjunction {
                ands: d.ands.into_iter().map(into_nodes).collect::<Result<_, _>>()?,
                extra_or: into_clauses(d.or)?,
            }),
            None => Err(AccessError::InvalidDeclaration("empty rule node".to_string())),
        }
    }
}

fn into_nodes(decls: Vec<RuleDecl>) -> Result<Vec<RuleNode>, AccessError> {
    decls.into_iter().map(RuleDecl::into_node).collect()
}

fn into_clauses(decls: Vec<ClauseDecl>) -> Result<Vec<OwnershipClause>, AccessError> {
    decls.into_iter().map(ClauseDecl::into_clause).collect()
}

/// Several ownership declarations on one scope must all hold
fn declaration(restriction: Option<RestrictionPolicy>, ownership: Vec<RuleDecl>) -> Result<Declaration, AccessError> {
    let rule = RuleNode::all_of(into_nodes(ownership)?);
    Ok(Declaration::new(rule, restriction))
}

impl AccessDeclarations {
    pub fn from_yaml_str(source: &str) -> Result<Self, AccessError> {
        serde_yaml::from_str(source).map_err(|e| AccessError::InvalidDeclaration(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AccessError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| AccessError::InvalidDeclaration(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&source)
    }

    /// Build and validate a registry from these declarations
    pub fn into_registry(self) -> Result<AccessRegistry, AccessError> {
        let mut registry = AccessRegistry::new(self.constants);

        for (name, record) in self.records {
            let mut shape = RecordShape::new(
                name.clone(),
                record.table.unwrap_or_else(|| name.to_lowercase()),
                record.fields,
            );
            shape.relations = record
                .relations
                .into_iter()
                .map(|(relation, decl)| {
                    (relation, Relation { target: decl.record, local_column: decl.local, foreign_column: decl.foreign })
                })
                .collect();
            shape.owner = record.owner;
            shape.field_access = record.field_access;
            shape.declaration = declaration(record.restriction, record.ownership)?;
            registry.register_record(shape)?;
        }

        for (name, resource) in self.resources {
            let mut resource_type = ResourceType::new(name, resource.exposes);
            resource_type.declaration = declaration(resource.restriction, resource.ownership)?;
            for (operation, decl) in resource.operations {
                resource_type.operations.insert(operation, declaration(decl.restriction, decl.ownership)?);
            }
            registry.register_resource(resource_type)?;
        }

        registry.validate()?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::rule::JoinKind;

    const YAML: &str = r#"
constants:
  public: public
records:
  Native:
    fields: [id, prop, created_by, visibility, foreign_id]
    relations:
      foreign: { record: Foreign, local: foreign_id }
    owner: { field: created_by }
    field_access:
      prop: { roles: [ADMIN], allow_for_owner: false }
  Foreign:
    table: foreign_entity
    fields: [id, owner]
resources:
  native:
    exposes: Native
    restriction: { rights: [READ_OWN] }
    ownership:
      - leaf: { path: created_by }
      - leaf: { path: visibility, op: not_equal, expression: "upper(public)" }
    operations:
      list:
        ownership:
          - or:
              - leaf: { path: created_by, attribute: email }
              - leaf:
                  path: f.owner
                  joins: [{ relation: foreign, alias: f, kind: inner }]
"#;

    #[test]
    fn loads_records_resources_and_rules() {
        let registry = AccessDeclarations::from_yaml_str(YAML).unwrap().into_registry().unwrap();

        let native = registry.record("Native").unwrap();
        assert_eq!(native.table, "native");
        assert_eq!(native.relations["foreign"].foreign_column, "id");
        assert_eq!(native.owner.as_ref().unwrap().attribute, "id");
        assert!(!native.field_access["prop"].allow_for_owner);
        assert_eq!(registry.record("Foreign").unwrap().table, "foreign_entity");

        let resource = registry.resource("native").unwrap();
        // two ownership entries on one scope are ANDed
        match resource.declaration.rule.as_ref().unwrap() {
            RuleNode::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }

        let list = resource.operations["list"].rule.as_ref().unwrap();
        let clauses = list.clauses();
        assert_eq!(clauses[0].value_source, ValueSource::CallerAttribute("email".into()));
        assert_eq!(clauses[1].joins[0].kind, JoinKind::Inner);
        assert_eq!(clauses[1].value_source, ValueSource::caller_id());
    }

    #[test]
    fn rule_node_needs_exactly_one_form() {
        let yaml = r#"
records:
  Native: { fields: [id] }
resources:
  native:
    exposes: Native
    ownership:
      - leaf: { path: id }
        or: []
"#;
        let err = AccessDeclarations::from_yaml_str(yaml).unwrap().into_registry().unwrap_err();
        assert!(matches!(err, AccessError::InvalidDeclaration(_)));
    }

    #[test]
    fn clause_with_two_value_sources_is_rejected() {
        let yaml = r#"
records:
  Native: { fields: [id] }
resources:
  native:
    exposes: Native
    ownership:
      - leaf: { path: id, value: "1", attribute: id }
"#;
        let err = AccessDeclarations::from_yaml_str(yaml).unwrap().into_registry().unwrap_err();
        assert!(matches!(err, AccessError::InvalidDeclaration(_)));
    }

    #[test]
    fn malformed_expression_fails_at_load() {
        let yaml = r#"
records:
  Native: { fields: [id] }
resources:
  native:
    exposes: Native
    ownership:
      - leaf: { path: id, expression: "days(" }
"#;
        let err = AccessDeclarations::from_yaml_str(yaml).unwrap().into_registry().unwrap_err();
        assert!(matches!(err, AccessError::Expression(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(AccessDeclarations::from_yaml_str("recrods: {}").is_err());
    }
}
