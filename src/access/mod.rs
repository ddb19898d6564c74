//! Ownership-based access control.
//!
//! Rule trees and restriction policies are declared per operation, resource
//! and record type, loaded once into an [`AccessRegistry`], and resolved per
//! request by [`AccessResolver`] into a [`Predicate`] the store can execute.

pub mod caller;
pub mod declarations;
pub mod error;
pub mod expression;
pub mod field;
pub mod locator;
pub mod policy;
pub mod predicate;
pub mod registry;
pub mod resolver;
pub mod rule;
pub mod value;

pub use caller::{Caller, PrincipalKind};
pub use declarations::AccessDeclarations;
pub use error::AccessError;
pub use expression::{Environment, Expression, ExpressionError};
pub use field::{FieldAccessFilter, FieldAccessRule, Ownable, OwnedRecord, OwnerRule};
pub use locator::{CallSiteDescriptor, Declaration, PolicyLocator, ScopeLevel};
pub use policy::{RestrictionGate, RestrictionPolicy};
pub use predicate::{Comparison, Predicate, PredicateBuilder};
pub use registry::{AccessRegistry, CallSite, RecordShape, Relation, ResourceType, ValidationReport};
pub use resolver::{AccessResolver, Explanation};
pub use rule::{Comparator, Join, JoinKind, OwnershipClause, RuleNode, ValueSource};
pub use value::ValueResolver;
