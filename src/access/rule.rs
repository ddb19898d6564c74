use serde::{Deserialize, Serialize};

use super::expression::Expression;

/// Comparison applied between a record field and the resolved clause value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    #[default]
    Equal,
    NotEqual,
    Like,
    LikeIgnoreCase,
    StartsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Equal => "equal",
            Comparator::NotEqual => "not_equal",
            Comparator::Like => "like",
            Comparator::LikeIgnoreCase => "like_ignore_case",
            Comparator::StartsWith => "starts_with",
            Comparator::GreaterThan => "greater_than",
            Comparator::GreaterThanOrEqual => "greater_than_or_equal",
            Comparator::LessThan => "less_than",
            Comparator::LessThanOrEqual => "less_than_or_equal",
            Comparator::In => "in",
        }
    }
}

/// Where the right-hand side of an ownership clause comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    Literal(String),
    Expression(Expression),
    CallerAttribute(String),
}

impl ValueSource {
    pub const DEFAULT_ATTRIBUTE: &'static str = "id";

    pub fn caller_id() -> Self {
        ValueSource::CallerAttribute(Self::DEFAULT_ATTRIBUTE.to_string())
    }
}

impl Default for ValueSource {
    fn default() -> Self {
        Self::caller_id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    #[default]
    Left,
}

/// Explicit join a clause needs so that `alias.field` paths can be resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Join {
    pub relation: String,
    pub alias: String,
    #[serde(default)]
    pub kind: JoinKind,
}

/// Atomic comparison between a record field and a resolved value
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipClause {
    pub entity_path: String,
    pub operator: Comparator,
    pub value_source: ValueSource,
    pub joins: Vec<Join>,
}

impl OwnershipClause {
    /// Clause comparing `entity_path` with the caller's `id` attribute
    pub fn new(entity_path: impl Into<String>) -> Self {
        Self {
            entity_path: entity_path.into(),
            operator: Comparator::default(),
            value_source: ValueSource::default(),
            joins: vec![],
        }
    }

    pub fn operator(mut self, operator: Comparator) -> Self {
        self.operator = operator;
        self
    }

    pub fn literal(mut self, value: impl Into<String>) -> Self {
        self.value_source = ValueSource::Literal(value.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.value_source = ValueSource::CallerAttribute(name.into());
        self
    }

    pub fn expression(mut self, expression: Expression) -> Self {
        self.value_source = ValueSource::Expression(expression);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Join declared on this clause for the alias, if any
    pub fn join_for(&self, alias: &str) -> Option<&Join> {
        self.joins.iter().find(|j| j.alias == alias)
    }
}

/// Boolean expression over ownership clauses.
///
/// `Conjunction` and `Disjunction` exist so that declarations attached at one
/// scope can be written without spelling out the full nesting. They are
/// rewritten into `And`/`Or` by [`RuleNode::desugar`] before evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleNode {
    Leaf(OwnershipClause),
    And(Vec<RuleNode>),
    Or(Vec<RuleNode>),
    /// AND of the Or-groups, further ANDed with `extra_and`
    Conjunction {
        ors: Vec<Vec<RuleNode>>,
        extra_and: Vec<OwnershipClause>,
    },
    /// OR of the And-groups, further ORed with `extra_or`
    Disjunction {
        ands: Vec<Vec<RuleNode>>,
        extra_or: Vec<OwnershipClause>,
    },
}

impl RuleNode {
    pub fn leaf(clause: OwnershipClause) -> Self {
        RuleNode::Leaf(clause)
    }

    /// Rewrite the convenience forms into plain `And`/`Or`/`Leaf` nodes
    pub fn desugar(&self) -> RuleNode {
        match self {
            RuleNode::Leaf(clause) => RuleNode::Leaf(clause.clone()),
            RuleNode::And(children) => RuleNode::And(children.iter().map(RuleNode::desugar).collect()),
            RuleNode::Or(children) => RuleNode::Or(children.iter().map(RuleNode::desugar).collect()),
            RuleNode::Conjunction { ors, extra_and } => {
                let mut children: Vec<RuleNode> = ors
                    .iter()
                    .map(|group| RuleNode::Or(group.iter().map(RuleNode::desugar).collect()))
                    .collect();
                children.extend(extra_and.iter().cloned().map(RuleNode::Leaf));
                RuleNode::And(children)
            }
            RuleNode::Disjunction { ands, extra_or } => {
                let mut children: Vec<RuleNode> = ands
                    .iter()
                    .map(|group| RuleNode::And(group.iter().map(RuleNode::desugar).collect()))
                    .collect();
                children.extend(extra_or.iter().cloned().map(RuleNode::Leaf));
                RuleNode::Or(children)
            }
        }
    }

    /// Fold several nodes declared side by side on one scope into a single node
    pub fn all_of(mut nodes: Vec<RuleNode>) -> Option<RuleNode> {
        match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            _ => Some(RuleNode::And(nodes)),
        }
    }

    /// Every clause in the tree, in declaration order
    pub fn clauses(&self) -> Vec<&OwnershipClause> {
        let mut out = Vec::new();
        self.collect_clauses(&mut out);
        out
    }

    fn collect_clauses<'a>(&'a self, out: &mut Vec<&'a OwnershipClause>) {
        match self {
            RuleNode::Leaf(clause) => out.push(clause),
            RuleNode::And(children) | RuleNode::Or(children) => {
                for child in children {
                    child.collect_clauses(out);
                }
            }
            RuleNode::Conjunction { ors: groups, extra_and: extra }
            | RuleNode::Disjunction { ands: groups, extra_or: extra } => {
                for node in groups.iter().flatten() {
                    node.collect_clauses(out);
                }
                out.extend(extra.iter());
            }
        }
    }
}
