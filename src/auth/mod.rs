use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::access::{Caller, PrincipalKind};
use crate::config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub kind: PrincipalKind,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub rights: BTreeSet<String>,
    /// Extra caller attributes referenced by ownership rules
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(sub: impl Into<String>) -> Self {
        Self::with_expiry(sub, config::config().security.jwt_expiry_hours)
    }

    pub fn with_expiry(sub: impl Into<String>, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: sub.into(),
            kind: PrincipalKind::User,
            roles: BTreeSet::new(),
            rights: BTreeSet::new(),
            attributes: BTreeMap::new(),
            exp,
            iat: now.timestamp(),
        }
    }
}

/// The subject always becomes the caller's `id` attribute
impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        let mut caller = Caller::new(claims.sub).with_kind(claims.kind);
        caller.roles = claims.roles;
        caller.rights = claims.rights;
        for (name, value) in claims.attributes {
            if name != Caller::ID_ATTRIBUTE {
                caller.attributes.insert(name, value);
            }
        }
        caller
    }
}

#[derive(Debug)]
pub enum JwtError {
    TokenGeneration(String),
    InvalidToken(String),
    InvalidSecret,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::TokenGeneration(msg) => write!(f, "JWT generation error: {}", msg),
            JwtError::InvalidToken(msg) => write!(f, "Invalid JWT token: {}", msg),
            JwtError::InvalidSecret => write!(f, "Invalid JWT secret"),
        }
    }
}

impl std::error::Error for JwtError {}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &decoding_key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_preserves_caller() {
        let mut claims = Claims::with_expiry("42", 1);
        claims.rights.insert("READ_OWN".into());
        claims.attributes.insert("email".into(), "a@x.com".into());

        let token = generate_jwt(&claims, "secret").unwrap();
        let caller: Caller = validate_jwt(&token, "secret").unwrap().into();
        assert_eq!(caller.id(), Some("42"));
        assert_eq!(caller.attribute("email"), Some("a@x.com"));
        assert!(caller.rights.contains("READ_OWN"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_jwt(&Claims::with_expiry("42", 1), "secret").unwrap();
        assert!(matches!(validate_jwt(&token, "other"), Err(JwtError::InvalidToken(_))));
        assert!(matches!(generate_jwt(&Claims::with_expiry("42", 1), ""), Err(JwtError::InvalidSecret)));
    }

    #[test]
    fn id_attribute_cannot_be_overridden_by_claims() {
        let mut claims = Claims::with_expiry("42", 1);
        claims.attributes.insert("id".into(), "1".into());
        let caller = Caller::from(claims);
        assert_eq!(caller.id(), Some("42"));
    }
}
