//! Password hashing and session tokens.
//!
//! Tokens are stateless HS256 JWTs carrying `{email, id}`; by default they do
//! not expire, matching the cookie session. A TTL can be configured, in which
//! case `exp` is embedded and enforced.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bcrypt::{hash, verify};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::models::User;

#[derive(Clone, Debug)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn hash(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        hash(password, self.cost)
    }

    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        verify(password, hash)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Claims {
    pub email: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Outcome of checking the caller's session token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenCheck {
    Valid(Claims),
    Expired,
    Invalid,
    Missing,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Option<Duration>,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Option<Duration>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is only present when a TTL is configured; when present it is
        // still validated.
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    pub fn sign(&self, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
        let exp = self.ttl.map(|ttl| unix_now().saturating_add(ttl.as_secs()));
        let claims = Claims {
            email: user.email.clone(),
            id: user.id.clone(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn check(&self, token: Option<&str>) -> TokenCheck {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return TokenCheck::Missing,
        };

        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => TokenCheck::Valid(data.claims),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => TokenCheck::Expired,
            Err(_) => TokenCheck::Invalid,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
