use super::caller::Caller;
use super::error::AccessError;
use super::expression::Environment;
use super::rule::ValueSource;

/// Resolves the right-hand side of an ownership clause to a concrete value
pub struct ValueResolver;

impl ValueResolver {
    pub fn resolve(source: &ValueSource, caller: &Caller, env: &Environment<'_>) -> Result<String, AccessError> {
        match source {
            ValueSource::Literal(value) => Ok(value.clone()),
            ValueSource::Expression(expression) => Ok(expression.evaluate(env)?),
            ValueSource::CallerAttribute(name) => caller.require_attribute(name).map(str::to_string),
        }
    }
}
