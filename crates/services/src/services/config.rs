use std::{sync::Arc, time::Duration};

use secrecy::SecretString;
use thiserror::Error;
use url::Url;
use utils::api::storage::AVATAR_BUCKET;

const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    Missing(&'static str),
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_base: Url,
    pub anon_key: Arc<SecretString>,
    pub avatar_bucket: String,
    /// `None` leaves requests bounded only by the backend's own limits.
    pub request_timeout: Option<Duration>,
    pub upload_chunk_bytes: usize,
}

impl BackendConfig {
    pub fn new(api_base: &str, anon_key: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: normalize_base(api_base)?,
            anon_key: Arc::new(SecretString::from(anon_key.into())),
            avatar_bucket: AVATAR_BUCKET.to_string(),
            request_timeout: None,
            upload_chunk_bytes: DEFAULT_UPLOAD_CHUNK_BYTES,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base = std::env::var("FARMERLINK_API_URL")
            .map_err(|_| ConfigError::Missing("FARMERLINK_API_URL"))?;
        let anon_key = std::env::var("FARMERLINK_ANON_KEY")
            .map_err(|_| ConfigError::Missing("FARMERLINK_ANON_KEY"))?;

        let mut config = Self::new(&api_base, anon_key)?;

        if let Ok(bucket) = std::env::var("FARMERLINK_AVATAR_BUCKET")
            && !bucket.trim().is_empty()
        {
            config.avatar_bucket = bucket.trim().to_string();
        }

        if let Ok(raw) = std::env::var("FARMERLINK_REQUEST_TIMEOUT_SECS") {
            let secs = raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "FARMERLINK_REQUEST_TIMEOUT_SECS",
                reason: e.to_string(),
            })?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        if let Ok(raw) = std::env::var("FARMERLINK_UPLOAD_CHUNK_BYTES") {
            config.upload_chunk_bytes = match raw.parse::<usize>() {
                Ok(0) | Err(_) => {
                    return Err(ConfigError::Invalid {
                        name: "FARMERLINK_UPLOAD_CHUNK_BYTES",
                        reason: format!("expected a positive integer, got `{raw}`"),
                    });
                }
                Ok(n) => n,
            };
        }

        Ok(config)
    }
}

// `Url::join` drops the last path segment unless the base ends with a slash.
fn normalize_base(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        name: "FARMERLINK_API_URL",
        reason: e.to_string(),
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
