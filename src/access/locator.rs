use std::fmt;

use serde::Serialize;

use super::error::AccessError;
use super::policy::RestrictionPolicy;
use super::rule::RuleNode;

/// Scope a rule or policy was declared on, most specific first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Operation,
    ResourceType,
    RecordType,
}

impl ScopeLevel {
    pub const PRECEDENCE: [ScopeLevel; 3] = [ScopeLevel::Operation, ScopeLevel::ResourceType, ScopeLevel::RecordType];
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeLevel::Operation => "operation",
            ScopeLevel::ResourceType => "resource type",
            ScopeLevel::RecordType => "record type",
        };
        f.write_str(name)
    }
}

/// Rule and policy declared on a single scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Declaration {
    pub rule: Option<RuleNode>,
    pub policy: Option<RestrictionPolicy>,
}

impl Declaration {
    pub fn new(rule: Option<RuleNode>, policy: Option<RestrictionPolicy>) -> Self {
        Self { rule, policy }
    }

    pub fn as_level(&self) -> LevelDeclaration<'_> {
        LevelDeclaration { rule: self.rule.as_ref(), policy: self.policy.as_ref() }
    }
}

/// Borrowed view of one scope's declaration
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelDeclaration<'a> {
    pub rule: Option<&'a RuleNode>,
    pub policy: Option<&'a RestrictionPolicy>,
}

/// Everything declared for one call site, one entry per scope level
#[derive(Debug, Clone, Default)]
pub struct CallSiteDescriptor<'a> {
    /// Human readable call site name used in errors and logs
    pub site: String,
    pub operation: LevelDeclaration<'a>,
    pub resource_type: LevelDeclaration<'a>,
    pub record_type: LevelDeclaration<'a>,
}

impl<'a> CallSiteDescriptor<'a> {
    pub fn new(site: impl Into<String>) -> Self {
        Self { site: site.into(), ..Default::default() }
    }

    pub fn level(&self, level: ScopeLevel) -> &LevelDeclaration<'a> {
        match level {
            ScopeLevel::Operation => &self.operation,
            ScopeLevel::ResourceType => &self.resource_type,
            ScopeLevel::RecordType => &self.record_type,
        }
    }
}

/// Result of the lookup. Rule and policy are located independently and may
/// come from different levels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Located<'a> {
    pub rule: Option<(ScopeLevel, &'a RuleNode)>,
    pub policy: Option<(ScopeLevel, &'a RestrictionPolicy)>,
}

/// A policy paired with the rule tree that enforces it
#[derive(Debug, Clone, Copy)]
pub struct Restriction<'a> {
    pub rule: &'a RuleNode,
    pub rule_level: ScopeLevel,
    pub policy: &'a RestrictionPolicy,
    pub policy_level: ScopeLevel,
}

impl<'a> Located<'a> {
    /// `None` when no policy is declared anywhere. A policy without a rule
    /// tree cannot be enforced and is an error.
    pub fn restriction(&self, site: &str) -> Result<Option<Restriction<'a>>, AccessError> {
        let Some((policy_level, policy)) = self.policy else {
            return Ok(None);
        };
        let Some((rule_level, rule)) = self.rule else {
            return Err(AccessError::MissingRuleTree { site: site.to_string() });
        };
        Ok(Some(Restriction { rule, rule_level, policy, policy_level }))
    }
}

/// Finds the most specific rule tree and policy for a call site
pub struct PolicyLocator;

impl PolicyLocator {
    pub fn locate<'a>(descriptor: &CallSiteDescriptor<'a>) -> Located<'a> {
        let rule = ScopeLevel::PRECEDENCE
            .iter()
            .find_map(|level| descriptor.level(*level).rule.map(|r| (*level, r)));
        let policy = ScopeLevel::PRECEDENCE
            .iter()
            .find_map(|level| descriptor.level(*level).policy.map(|p| (*level, p)));

        tracing::trace!(
            site = %descriptor.site,
            rule_level = ?rule.map(|(l, _)| l),
            policy_level = ?policy.map(|(l, _)| l),
            "located access declarations"
        );

        Located { rule, policy }
    }

    /// Locate and pair policy with rule tree in one step
    pub fn locate_restriction<'a>(descriptor: &CallSiteDescriptor<'a>) -> Result<Option<Restriction<'a>>, AccessError> {
        Self::locate(descriptor).restriction(&descriptor.site)
    }
}
