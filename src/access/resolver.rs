use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use super::caller::Caller;
use super::error::AccessError;
use super::expression::Environment;
use super::field::{FieldAccessFilter, FieldAccessRule, Ownable, OwnedRecord};
use super::locator::{CallSiteDescriptor, PolicyLocator, ScopeLevel};
use super::policy::RestrictionGate;
use super::predicate::{Predicate, PredicateBuilder};
use super::registry::{AccessRegistry, CallSite, RecordShape};

/// How a call site was resolved for a caller
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub site: String,
    pub rule_level: Option<ScopeLevel>,
    pub policy_level: Option<ScopeLevel>,
    pub applies: bool,
    pub predicate: Predicate,
}

/// Single entry point for query restriction and field exposure.
///
/// Holds only the startup-built registry, so one instance can be shared
/// across all requests.
#[derive(Debug, Clone)]
pub struct AccessResolver {
    registry: Arc<AccessRegistry>,
    audit: bool,
}

impl AccessResolver {
    pub fn new(registry: Arc<AccessRegistry>) -> Self {
        Self { registry, audit: false }
    }

    /// Log every applied restriction at info level
    pub fn with_audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &AccessRegistry {
        &self.registry
    }

    /// Effective predicate for a query: the base predicate, ANDed with the
    /// ownership restriction when the located policy applies to the caller.
    pub fn resolve_query_predicate(
        &self,
        descriptor: &CallSiteDescriptor<'_>,
        caller: &Caller,
        base: Predicate,
    ) -> Result<Predicate, AccessError> {
        let Some(restriction) = PolicyLocator::locate_restriction(descriptor)? else {
            return Ok(base);
        };
        if !RestrictionGate::applies(restriction.policy, caller) {
            return Ok(base);
        }

        let env = Environment::new(self.registry.constants());
        let restricted = PredicateBuilder::build(restriction.rule, caller, &env).map_err(|e| {
            let caller_id = caller.id().unwrap_or("<anonymous>");
            if e.is_configuration_error() {
                tracing::error!(site = %descriptor.site, caller = caller_id, "access resolution failed: {}", e);
            } else {
                tracing::debug!(site = %descriptor.site, caller = caller_id, "access resolution failed: {}", e);
            }
            e
        })?;

        tracing::debug!(site = %descriptor.site, rule_level = %restriction.rule_level, predicate = ?restricted, "restriction applied");
        if self.audit {
            tracing::info!(
                site = %descriptor.site,
                caller = caller.id().unwrap_or("<anonymous>"),
                policy_level = %restriction.policy_level,
                "ownership restriction enforced"
            );
        }
        Ok(Predicate::And(vec![base, restricted]))
    }

    pub fn resolve_field_inclusion(
        &self,
        rule: Option<&FieldAccessRule>,
        subject: Option<&dyn Ownable>,
        caller: &Caller,
    ) -> bool {
        FieldAccessFilter::included(rule, subject, caller)
    }

    /// Look the call site up in the registry, then resolve
    pub fn resolve_for(&self, site: &CallSite, caller: &Caller, base: Predicate) -> Result<Predicate, AccessError> {
        let descriptor = self.registry.descriptor(site)?;
        self.resolve_query_predicate(&descriptor, caller, base)
    }

    /// Apply the field rules of the record type a resource exposes, and of
    /// the related record types embedded under their relation names
    pub fn filter_record(
        &self,
        resource: &str,
        record: Map<String, Value>,
        caller: &Caller,
    ) -> Result<Map<String, Value>, AccessError> {
        let shape = self.registry.record_for(resource)?;
        Ok(self.filter_shape(shape, record, caller))
    }

    fn filter_shape(&self, shape: &RecordShape, record: Map<String, Value>, caller: &Caller) -> Map<String, Value> {
        let mut record = if shape.field_access.is_empty() {
            record
        } else {
            // the owner check reads the unfiltered record
            let snapshot = shape.owner.as_ref().map(|rule| (record.clone(), rule));
            let subject = snapshot.as_ref().map(|(snapshot, rule)| OwnedRecord::new(snapshot, rule));
            FieldAccessFilter::filter_record(
                record,
                &shape.field_access,
                subject.as_ref().map(|s| s as &dyn Ownable),
                caller,
            )
        };

        for (name, relation) in &shape.relations {
            let Some(target) = self.registry.record(&relation.target) else {
                continue;
            };
            if let Some(Value::Object(embedded)) = record.get_mut(name) {
                let inner = std::mem::take(embedded);
                *embedded = self.filter_shape(target, inner, caller);
            }
        }
        record
    }

    /// Describe the resolution without running a query
    pub fn explain(&self, site: &CallSite, caller: &Caller, base: Predicate) -> Result<Explanation, AccessError> {
        let descriptor = self.registry.descriptor(site)?;
        let located = PolicyLocator::locate(&descriptor);
        let applies = located.policy.is_some_and(|(_, policy)| RestrictionGate::applies(policy, caller));
        let predicate = self.resolve_query_predicate(&descriptor, caller, base)?;

        Ok(Explanation {
            site: site.to_string(),
            rule_level: located.rule.map(|(level, _)| level),
            policy_level: located.policy.map(|(level, _)| level),
            applies,
            predicate,
        })
    }
}
