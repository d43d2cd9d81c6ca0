use std::{env, net::SocketAddr};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use secrecy::SecretString;
use thiserror::Error;
use utils::api::storage::AVATAR_BUCKET;
use uuid::Uuid;

const DEFAULT_BIND: &str = "127.0.0.1:54321";
const DEFAULT_ANON_KEY: &str = "local-anon-key";
const DEFAULT_MAX_OBJECT_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` has an invalid value: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct RemoteServerConfig {
    pub listen_addr: SocketAddr,
    pub anon_key: SecretString,
    /// Base64-encoded HS256 key for access tokens.
    pub jwt_secret: SecretString,
    pub buckets: Vec<String>,
    pub max_object_bytes: usize,
}

impl RemoteServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = env::var("REMOTE_BIND")
            .unwrap_or_else(|_| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid("REMOTE_BIND", e.to_string()))?;

        let anon_key = env::var("REMOTE_ANON_KEY").unwrap_or_else(|_| DEFAULT_ANON_KEY.to_string());

        let jwt_secret = match env::var("REMOTE_JWT_SECRET") {
            Ok(secret) => {
                BASE64_STANDARD
                    .decode(secret.as_bytes())
                    .map_err(|e| ConfigError::Invalid("REMOTE_JWT_SECRET", e.to_string()))?;
                secret
            }
            Err(_) => random_secret(),
        };

        let max_object_bytes = match env::var("REMOTE_MAX_OBJECT_BYTES") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("REMOTE_MAX_OBJECT_BYTES", raw))?,
            Err(_) => DEFAULT_MAX_OBJECT_BYTES,
        };

        Ok(Self {
            listen_addr,
            anon_key: SecretString::from(anon_key),
            jwt_secret: SecretString::from(jwt_secret),
            buckets: vec![AVATAR_BUCKET.to_string()],
            max_object_bytes,
        })
    }

    /// Config for a server bound to `listen_addr`, with a fresh signing key.
    pub fn local(listen_addr: SocketAddr, anon_key: &str) -> Self {
        Self {
            listen_addr,
            anon_key: SecretString::from(anon_key.to_string()),
            jwt_secret: SecretString::from(random_secret()),
            buckets: vec![AVATAR_BUCKET.to_string()],
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
        }
    }
}

fn random_secret() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    BASE64_STANDARD.encode(bytes)
}
