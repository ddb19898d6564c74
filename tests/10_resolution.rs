mod common;

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{json, Map, Value};

use custodian_api::access::{
    AccessError, AccessResolver, CallSite, CallSiteDescriptor, Caller, Comparator, Declaration, Environment,
    FieldAccessFilter, FieldAccessRule, Ownable, OwnershipClause, PolicyLocator, Predicate, PredicateBuilder,
    RestrictionPolicy, RuleNode, ScopeLevel,
};

struct Subject {
    owner: &'static str,
}

impl Ownable for Subject {
    fn is_owned_by(&self, caller: &Caller) -> bool {
        caller.id() == Some(self.owner)
    }
}

fn leaf(path: &str) -> RuleNode {
    RuleNode::leaf(OwnershipClause::new(path))
}

// P1: exactly one level's rule is used, most specific first
#[test]
fn precedence_picks_most_specific_level_without_merging() {
    let operation = Declaration::new(Some(leaf("op_field")), None);
    let resource = Declaration::new(Some(leaf("resource_field")), Some(RestrictionPolicy::for_rights(["READ_OWN"])));
    let record = Declaration::new(Some(leaf("record_field")), None);

    let mut descriptor = CallSiteDescriptor::new("notes:list");
    descriptor.operation = operation.as_level();
    descriptor.resource_type = resource.as_level();
    descriptor.record_type = record.as_level();

    let located = PolicyLocator::locate(&descriptor);
    let (level, rule) = located.rule.unwrap();
    assert_eq!(level, ScopeLevel::Operation);
    assert_eq!(rule, &leaf("op_field"));
    assert_eq!(located.policy.unwrap().0, ScopeLevel::ResourceType);

    descriptor.operation = Default::default();
    assert_eq!(PolicyLocator::locate(&descriptor).rule.unwrap(), (ScopeLevel::ResourceType, &leaf("resource_field")));

    descriptor.resource_type.rule = None;
    assert_eq!(PolicyLocator::locate(&descriptor).rule.unwrap(), (ScopeLevel::RecordType, &leaf("record_field")));
}

// P2: sugar forms evaluate exactly like their spelled-out equivalents
#[test]
fn conjunction_desugars_to_equivalent_and() {
    let clause = |p: &str| OwnershipClause::new(p).literal(p);
    let sugared = RuleNode::Conjunction {
        ors: vec![vec![RuleNode::leaf(clause("a")), RuleNode::leaf(clause("b"))], vec![RuleNode::leaf(clause("c"))]],
        extra_and: vec![clause("d")],
    };
    let plain = RuleNode::And(vec![
        RuleNode::Or(vec![RuleNode::leaf(clause("a")), RuleNode::leaf(clause("b"))]),
        RuleNode::Or(vec![RuleNode::leaf(clause("c"))]),
        RuleNode::leaf(clause("d")),
    ]);

    let constants = BTreeMap::new();
    let env = Environment::new(&constants);
    let caller = Caller::new("1");
    let sugared = PredicateBuilder::build(&sugared, &caller, &env).unwrap();
    let plain = PredicateBuilder::build(&plain, &caller, &env).unwrap();

    for bits in 0u8..16 {
        let truth = |cmp: &custodian_api::access::Comparison| {
            let index = ["a", "b", "c", "d"].iter().position(|p| *p == cmp.path).unwrap();
            bits & (1 << index) != 0
        };
        assert_eq!(sugared.evaluate(&truth), plain.evaluate(&truth), "assignment {:04b}", bits);
    }
}

// P3: a caller outside the policy gets the base predicate back untouched
#[test]
fn gate_bypass_returns_base_unchanged() -> Result<()> {
    let resolver = common::resolver();
    let outsider = Caller::new("u-x").with_role("EDITOR").with_right("WRITE").with_attribute("email", "x@x.com");
    let base = Predicate::eq("title", "t");

    let resolved = resolver.resolve_for(&CallSite::new("notes", "list"), &outsider, base.clone())?;
    assert_eq!(resolved, base);
    Ok(())
}

// P4: an applied restriction is always ANDed with the base
#[test]
fn applied_restriction_is_anded_with_base() -> Result<()> {
    let resolver = common::resolver();
    let base = Predicate::eq("title", "t");

    for operation in ["list", "read", "find"] {
        let resolved = resolver.resolve_for(&CallSite::new("notes", operation), &common::alice(), base.clone())?;
        match resolved {
            Predicate::And(parts) => {
                assert_eq!(parts.len(), 2, "{}", operation);
                assert_eq!(parts[0], base);
            }
            other => panic!("{} resolved to {:?}", operation, other),
        }
    }
    Ok(())
}

// P5: fields without a rule are visible to everyone
#[test]
fn fields_without_rule_are_always_included() {
    for caller in [Caller::new("1"), common::admin(), Caller::new("2").with_right("ANY")] {
        assert!(FieldAccessFilter::included(None, None, &caller));
        assert!(FieldAccessFilter::included(None, Some(&Subject { owner: "nobody" }), &caller));
    }
}

// P6: with no roles or rights listed, ownership alone decides
#[test]
fn owner_fallback_decides_empty_rule() {
    let rule = FieldAccessRule::default().allow_for_owner(true);
    let caller = Caller::new("u-1");
    assert!(FieldAccessFilter::included(Some(&rule), Some(&Subject { owner: "u-1" }), &caller));
    assert!(!FieldAccessFilter::included(Some(&rule), Some(&Subject { owner: "u-2" }), &caller));
    assert!(!FieldAccessFilter::included(Some(&rule), None, &caller));
}

fn scenario_resolver(policy: RestrictionPolicy) -> AccessResolver {
    let yaml = format!(
        r#"
records:
  Note: {{ fields: [id, created_by, visibility] }}
resources:
  notes:
    exposes: Note
    restriction: {}
    ownership:
      - leaf: {{ path: created_by, attribute: email }}
"#,
        serde_json::to_string(&policy).unwrap()
    );
    let registry = custodian_api::access::AccessDeclarations::from_yaml_str(&yaml).unwrap().into_registry().unwrap();
    AccessResolver::new(std::sync::Arc::new(registry))
}

#[test]
fn scenario_a_read_own_right_restricts_to_email() -> Result<()> {
    let resolver = scenario_resolver(RestrictionPolicy::for_rights(["READ_OWN"]));
    let caller = Caller::new("7").with_right("READ_OWN").with_attribute("email", "a@x.com");
    let base = Predicate::all();

    let resolved = resolver.resolve_for(&CallSite::new("notes", "list"), &caller, base.clone())?;
    assert_eq!(resolved, Predicate::And(vec![base, Predicate::eq("created_by", "a@x.com")]));
    Ok(())
}

#[test]
fn scenario_b_admin_role_only_gated_when_policy_lists_it() -> Result<()> {
    let admin = Caller::new("7").with_role("ADMIN").with_attribute("email", "a@x.com");
    let base = Predicate::eq("visibility", "public");
    let site = CallSite::new("notes", "list");

    let rights_only = scenario_resolver(RestrictionPolicy::for_rights(["READ_OWN"]));
    assert_eq!(rights_only.resolve_for(&site, &admin, base.clone())?, base);

    let with_admin = scenario_resolver(RestrictionPolicy::for_rights(["READ_OWN"]).with_role("ADMIN"));
    assert_eq!(
        with_admin.resolve_for(&site, &admin, base.clone())?,
        Predicate::And(vec![base, Predicate::eq("created_by", "a@x.com")])
    );
    Ok(())
}

#[test]
fn scenario_c_disjunction_with_public_literal() {
    let rule = RuleNode::Disjunction {
        ands: vec![vec![RuleNode::leaf(OwnershipClause::new("created_by").attribute("email"))]],
        extra_or: vec![OwnershipClause::new("visibility").literal("public")],
    };
    let constants = BTreeMap::new();
    let caller = Caller::new("7").with_attribute("email", "a@x.com");

    let predicate = PredicateBuilder::build(&rule, &caller, &Environment::new(&constants)).unwrap();
    assert_eq!(
        predicate,
        Predicate::Or(vec![
            Predicate::And(vec![Predicate::eq("created_by", "a@x.com")]),
            Predicate::compare("visibility", Comparator::Equal, "public"),
        ])
    );
}

#[test]
fn scenario_d_role_rule_excludes_non_owner_without_role() {
    let rule = FieldAccessRule::default().with_role("ADMIN").allow_for_owner(false);
    let caller = Caller::new("u-1").with_role("USER");
    assert!(!FieldAccessFilter::included(Some(&rule), Some(&Subject { owner: "u-2" }), &caller));
    assert!(!FieldAccessFilter::included(Some(&rule), Some(&Subject { owner: "u-1" }), &caller));
}

#[test]
fn missing_attribute_fails_instead_of_widening() {
    let resolver = common::resolver();
    let no_email = Caller::new("u-alice").with_right("READ_OWN");
    let err = resolver.resolve_for(&CallSite::new("notes", "list"), &no_email, Predicate::all()).unwrap_err();
    assert_eq!(err, AccessError::AttributeNotFound("email".into()));
}

#[test]
fn operation_policy_overrides_resource_policy() -> Result<()> {
    let resolver = common::resolver();
    let auditor = Caller::new("u-audit").with_role("AUDITOR").with_attribute("email", "audit@x.com");

    // audit declares only a policy; the rule comes from the resource
    let explanation = resolver.explain(&CallSite::new("notes", "audit"), &auditor, Predicate::all())?;
    assert_eq!(explanation.policy_level, Some(ScopeLevel::Operation));
    assert_eq!(explanation.rule_level, Some(ScopeLevel::ResourceType));
    assert!(explanation.applies);

    // READ_OWN no longer triggers the restriction on audit
    let resolved = resolver.resolve_for(&CallSite::new("notes", "audit"), &common::alice(), Predicate::all())?;
    assert!(resolved.is_unconstrained());
    Ok(())
}

#[test]
fn filter_record_applies_declared_field_rules() -> Result<()> {
    let resolver = common::resolver();
    let row: Map<String, Value> = json!({
        "id": 1, "title": "t", "body": "b", "secret": "s", "created_by": "alice@x.com"
    })
    .as_object()
    .cloned()
    .unwrap_or_default();

    let own = resolver.filter_record("notes", row.clone(), &common::alice())?;
    assert!(own.contains_key("body"));
    assert!(!own.contains_key("secret"));

    let other = resolver.filter_record("notes", row.clone(), &common::bob())?;
    assert!(!other.contains_key("body"));
    assert!(other.contains_key("title"));

    let admin = resolver.filter_record("notes", row, &common::admin())?;
    assert!(admin.contains_key("secret"));
    Ok(())
}

#[test]
fn filter_record_descends_into_embedded_relations() -> Result<()> {
    let resolver = common::resolver();
    let row: Map<String, Value> = json!({
        "id": 1, "created_by": "alice@x.com", "org_id": 10,
        "org": { "id": 10, "name": "Acme", "owner_id": "u-carol" }
    })
    .as_object()
    .cloned()
    .unwrap_or_default();

    let own = resolver.filter_record("notes", row.clone(), &common::alice())?;
    assert_eq!(own["org"], json!({ "id": 10, "name": "Acme" }));

    let admin = resolver.filter_record("notes", row, &common::admin())?;
    assert_eq!(admin["org"]["owner_id"], "u-carol");
    Ok(())
}

#[test]
fn facade_field_inclusion_matches_filter() {
    let resolver = common::resolver();
    let rule = FieldAccessRule::default().with_right("READ_BODY").allow_for_owner(true);
    let owner = Subject { owner: "u-alice" };

    assert!(resolver.resolve_field_inclusion(None, None, &common::bob()));
    assert!(resolver.resolve_field_inclusion(Some(&rule), Some(&owner), &common::alice()));
    assert!(!resolver.resolve_field_inclusion(Some(&rule), Some(&owner), &common::bob()));

    // API tokens are matched on rights only, never on ownership
    let token = common::alice().with_kind(custodian_api::access::PrincipalKind::ApiToken);
    assert!(!resolver.resolve_field_inclusion(Some(&rule), Some(&owner), &token));
}
