use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::caller::Caller;
use super::error::AccessError;
use super::expression::Environment;
use super::rule::{Comparator, Join, RuleNode};
use super::value::ValueResolver;

/// Leaf comparison of a record field against a concrete value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub path: String,
    pub comparator: Comparator,
    pub value: Value,
    /// Joins the persistence layer must add before the path can be read
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<Join>,
}

/// AND/OR tree over comparisons, handed to the persistence layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare(Comparison),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Default for Predicate {
    fn default() -> Self {
        Self::all()
    }
}

impl Predicate {
    /// Predicate matching every record (empty conjunction)
    pub fn all() -> Self {
        Predicate::And(vec![])
    }

    pub fn compare(path: impl Into<String>, comparator: Comparator, value: impl Into<Value>) -> Self {
        Predicate::Compare(Comparison { path: path.into(), comparator, value: value.into(), joins: vec![] })
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, Comparator::Equal, value)
    }

    pub fn is_unconstrained(&self) -> bool {
        matches!(self, Predicate::And(children) if children.iter().all(Predicate::is_unconstrained))
    }

    /// Every distinct join required anywhere in the tree
    pub fn joins(&self) -> Vec<&Join> {
        let mut out: Vec<&Join> = Vec::new();
        self.walk(&mut |cmp| {
            for join in &cmp.joins {
                if !out.iter().any(|j| j.alias == join.alias) {
                    out.push(join);
                }
            }
        });
        out
    }

    /// Every comparison in the tree, depth first
    pub fn comparisons(&self) -> Vec<&Comparison> {
        let mut out = Vec::new();
        self.walk(&mut |cmp| out.push(cmp));
        out
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Comparison)) {
        match self {
            Predicate::Compare(cmp) => f(cmp),
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.walk(f);
                }
            }
        }
    }

    /// Truth value of the tree for a given truth assignment of its leaves
    pub fn evaluate(&self, leaf: &impl Fn(&Comparison) -> bool) -> bool {
        match self {
            Predicate::Compare(cmp) => leaf(cmp),
            Predicate::And(children) => children.iter().all(|c| c.evaluate(leaf)),
            Predicate::Or(children) => children.iter().any(|c| c.evaluate(leaf)),
        }
    }

    /// Evaluate against an in-memory JSON record. Joined paths (`alias.field`)
    /// are read from the object embedded under the join's relation name.
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        self.evaluate(&|cmp| cmp.matches(record))
    }
}

impl Comparison {
    fn lookup<'r>(&self, record: &'r Map<String, Value>) -> Option<&'r Value> {
        match self.path.split_once('.') {
            None => record.get(&self.path),
            Some((alias, field)) => {
                let relation = self.joins.iter().find(|j| j.alias == alias).map(|j| j.relation.as_str())?;
                record.get(relation)?.as_object()?.get(field)
            }
        }
    }

    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        let actual = self.lookup(record).unwrap_or(&Value::Null);

        if self.value.is_null() {
            return match self.comparator {
                Comparator::Equal => actual.is_null(),
                Comparator::NotEqual => !actual.is_null(),
                _ => false,
            };
        }
        if actual.is_null() {
            return false;
        }

        let actual_text = scalar_text(actual);
        match self.comparator {
            Comparator::Equal => actual_text == scalar_text(&self.value),
            Comparator::NotEqual => actual_text != scalar_text(&self.value),
            Comparator::Like => like(&actual_text, &scalar_text(&self.value)),
            Comparator::LikeIgnoreCase => like(&actual_text.to_lowercase(), &scalar_text(&self.value).to_lowercase()),
            Comparator::StartsWith => actual_text.starts_with(&scalar_text(&self.value)),
            Comparator::In => match &self.value {
                Value::Array(values) => values.iter().any(|v| scalar_text(v) == actual_text),
                other => scalar_text(other) == actual_text,
            },
            Comparator::GreaterThan => ordering(actual, &self.value).is_some_and(|o| o.is_gt()),
            Comparator::GreaterThanOrEqual => ordering(actual, &self.value).is_some_and(|o| o.is_ge()),
            Comparator::LessThan => ordering(actual, &self.value).is_some_and(|o| o.is_lt()),
            Comparator::LessThanOrEqual => ordering(actual, &self.value).is_some_and(|o| o.is_le()),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn ordering(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    let (a, b) = (scalar_text(actual), scalar_text(expected));
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y),
        _ => Some(a.cmp(&b)),
    }
}

/// SQL LIKE semantics: `%` any run, `_` any single character
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

/// Turns a rule tree into a predicate for one caller
pub struct PredicateBuilder;

impl PredicateBuilder {
    pub fn build(node: &RuleNode, caller: &Caller, env: &Environment<'_>) -> Result<Predicate, AccessError> {
        match node {
            RuleNode::Leaf(clause) => {
                let value = ValueResolver::resolve(&clause.value_source, caller, env)?;
                Ok(Predicate::Compare(Comparison {
                    path: clause.entity_path.clone(),
                    comparator: clause.operator,
                    value: Value::String(value),
                    joins: clause.joins.clone(),
                }))
            }
            RuleNode::And(children) => Ok(Predicate::And(Self::build_all(children, caller, env)?)),
            RuleNode::Or(children) => Ok(Predicate::Or(Self::build_all(children, caller, env)?)),
            RuleNode::Conjunction { .. } | RuleNode::Disjunction { .. } => Self::build(&node.desugar(), caller, env),
        }
    }

    fn build_all(children: &[RuleNode], caller: &Caller, env: &Environment<'_>) -> Result<Vec<Predicate>, AccessError> {
        children.iter().map(|child| Self::build(child, caller, env)).collect()
    }
}
