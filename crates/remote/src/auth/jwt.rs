use std::{collections::HashSet, sync::Arc};

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{Account, AuthSession};

/// Lifetime of an access token.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token")]
    InvalidToken,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: Uuid,
    pub session_id: Uuid,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct JwtIdentity {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

#[derive(Clone)]
pub struct JwtService {
    secret: Arc<SecretString>,
}

impl JwtService {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }

    pub fn encode(&self, session: &AuthSession, account: &Account) -> Result<String, JwtError> {
        let now = Utc::now();
        let claims = JwtClaims {
            sub: account.id,
            session_id: session.id,
            email: account.email.clone(),
            role: "authenticated".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ACCESS_TOKEN_TTL_SECS)).timestamp(),
        };

        let encoding_key = EncodingKey::from_base64_secret(self.secret.expose_secret())?;
        let token = encode(&Header::new(Algorithm::HS256), &claims, &encoding_key)?;

        Ok(token)
    }

    pub fn decode(&self, token: &str) -> Result<JwtIdentity, JwtError> {
        if token.trim().is_empty() {
            return Err(JwtError::InvalidToken);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = false;
        validation.required_spec_claims = HashSet::from(["sub".to_string(), "exp".to_string()]);

        let decoding_key = DecodingKey::from_base64_secret(self.secret.expose_secret())?;
        let data = decode::<JwtClaims>(token, &decoding_key, &validation)?;

        let claims = data.claims;
        Ok(JwtIdentity {
            user_id: claims.sub,
            session_id: claims.session_id,
        })
    }
}
