use thiserror::Error;

use super::expression::ExpressionError;

/// Errors raised while loading declarations or resolving access for a request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    #[error("Restriction policy declared for {site} but no ownership rule found at any level")]
    MissingRuleTree { site: String },

    #[error("Caller has no attribute '{0}'")]
    AttributeNotFound(String),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Entity path '{path}' cannot be resolved on record type '{record_type}'")]
    UnresolvableEntityPath { record_type: String, path: String },

    #[error("Unknown record type: {0}")]
    UnknownRecordType(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Invalid access declaration: {0}")]
    InvalidDeclaration(String),
}

impl AccessError {
    /// Configuration-shape errors should never reach request handling once
    /// startup validation has passed
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, AccessError::AttributeNotFound(_))
    }
}
