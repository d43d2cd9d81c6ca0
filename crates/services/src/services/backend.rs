//! Seams to the hosted backend: profile rows, object storage and auth.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;
use utils::api::{
    auth::{AuthUser, UpdateUserRequest},
    profile::{ProfilePatch, ProfileRecord, ProfileRow},
};
use uuid::Uuid;

use super::session::Session;

/// Shown when the backend does not say what went wrong.
pub const GENERIC_FAILURE_MESSAGE: &str = "Please try again later.";

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("unauthorized")]
    Auth,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("json error: {0}")]
    Serde(String),
    #[error("url error: {0}")]
    Url(String),
}

impl BackendError {
    /// Message reported by the backend, if it sent one.
    pub fn remote_message(&self) -> Option<String> {
        match self {
            Self::Api { message, .. } => Some(message.clone()),
            Self::NotFound(_) | Self::Auth => Some(self.to_string()),
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        self.remote_message()
            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string())
    }
}

/// Receives byte counts while an upload body is streamed.
pub trait ProgressSink: Send + Sync {
    fn bytes_sent(&self, sent: u64, total: u64);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn bytes_sent(&self, _sent: u64, _total: u64) {}
}

#[derive(Debug, Clone)]
pub struct UploadObject {
    pub bytes: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Reads the profile projection for `user_id`; `None` when no row exists.
    async fn fetch_profile(
        &self,
        session: &Session,
        user_id: Uuid,
    ) -> Result<Option<ProfileRow>, BackendError>;

    /// Applies a partial update and returns the row as stored.
    async fn update_profile(
        &self,
        session: &Session,
        user_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, BackendError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        session: &Session,
        bucket: &str,
        path: &str,
        object: UploadObject,
        upsert: bool,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(), BackendError>;

    /// Public address of an uploaded object.
    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, BackendError>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, BackendError>;

    async fn update_user(
        &self,
        session: &Session,
        request: &UpdateUserRequest,
    ) -> Result<AuthUser, BackendError>;

    async fn delete_user(&self, session: &Session, user_id: Uuid) -> Result<(), BackendError>;

    async fn sign_out(&self, session: &Session) -> Result<(), BackendError>;
}
