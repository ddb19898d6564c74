mod common;

use anyhow::Result;

use custodian_api::access::{AccessDeclarations, AccessError};

fn load(yaml: &str) -> Result<custodian_api::access::AccessRegistry, AccessError> {
    AccessDeclarations::from_yaml_str(yaml)?.into_registry()
}

#[test]
fn fixture_reports_restricted_and_unrestricted_sites() -> Result<()> {
    let registry = common::registry();
    let report = registry.validate()?;

    assert_eq!(report.records, 2);
    assert_eq!(report.resources, 3);
    assert!(report.restricted.contains(&"notes:find".to_string()), "{:?}", report.restricted);
    assert!(report.restricted.contains(&"org_notes".to_string()), "{:?}", report.restricted);
    assert!(report.unrestricted.contains(&"orgs".to_string()), "{:?}", report.unrestricted);
    Ok(())
}

#[test]
fn policy_without_any_rule_is_rejected_at_load() {
    let err = load(
        r#"
records:
  Note: { fields: [id, created_by] }
resources:
  notes:
    exposes: Note
    restriction: { rights: [READ_OWN] }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, AccessError::MissingRuleTree { .. }), "{:?}", err);
}

#[test]
fn unknown_path_is_rejected_at_load() {
    let err = load(
        r#"
records:
  Note: { fields: [id, created_by] }
resources:
  notes:
    exposes: Note
    restriction: { rights: [READ_OWN] }
    ownership:
      - leaf: { path: author }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, AccessError::UnresolvableEntityPath { .. }), "{:?}", err);
}

#[test]
fn joined_path_must_exist_on_target() {
    let err = load(
        r#"
records:
  Org: { fields: [id, owner_id] }
  Note:
    fields: [id, org_id]
    relations:
      org: { record: Org, local: org_id }
resources:
  notes:
    exposes: Note
    restriction: { rights: [READ_ORG] }
    ownership:
      - leaf: { path: o.manager_id, joins: [{ relation: org, alias: o }] }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, AccessError::UnresolvableEntityPath { .. }), "{:?}", err);
}

#[test]
fn resource_must_expose_known_record() {
    let err = load(
        r#"
resources:
  notes:
    exposes: Note
"#,
    )
    .unwrap_err();
    assert!(matches!(err, AccessError::UnknownRecordType(_)), "{:?}", err);
}

#[test]
fn expression_symbols_must_be_declared_constants() {
    let err = load(
        r#"
records:
  Note: { fields: [id, visibility] }
resources:
  notes:
    exposes: Note
    restriction: { rights: [READ_OWN] }
    ownership:
      - leaf: { path: visibility, expression: "upper(shared)" }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, AccessError::Expression(_)), "{:?}", err);
}

#[test]
fn unknown_keys_are_rejected() {
    assert!(AccessDeclarations::from_yaml_str("records:\n  Note: { fields: [id], owner_field: id }\n").is_err());
}

#[test]
fn alias_bound_to_two_relations_is_rejected() {
    let err = load(
        r#"
records:
  A: { fields: [id, owner] }
  B: { fields: [id] }
  Note:
    fields: [id, a_id, b_id]
    relations:
      ra: { record: A, local: a_id }
      rb: { record: B, local: b_id }
resources:
  notes:
    exposes: Note
    restriction: { rights: [READ_OWN] }
    ownership:
      - or:
          - leaf: { path: f.owner, joins: [{ relation: ra, alias: f }] }
          - leaf: { path: f.id, value: "5", joins: [{ relation: rb, alias: f }] }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, AccessError::InvalidDeclaration(_)), "{:?}", err);
}
