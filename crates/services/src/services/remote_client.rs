//! HTTP client for the hosted backend's row, storage and auth APIs.
//!
//! Calls are never retried; failures are handed back to the caller, which
//! decides what the user sees.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{CACHE_CONTROL, CONTENT_TYPE},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;
use utils::api::{
    auth::{AuthUser, PasswordGrantRequest, TokenResponse, UpdateUserRequest},
    error::ApiErrorBody,
    profile::{PROFILE_PROJECTION, ProfilePatch, ProfileRecord, ProfileRow},
    storage::{UPSERT_HEADER, UploadObjectResponse, public_object_path},
};
use uuid::Uuid;

use super::{
    backend::{AuthProvider, BackendError, BlobStore, ProfileStore, ProgressSink, UploadObject},
    config::BackendConfig,
    session::{Identity, Session},
};

const PROFILES_TABLE: &str = "rest/v1/profiles";

#[derive(Debug, Clone)]
pub struct BackendClient {
    base: Url,
    http: Client,
    anon_key: Arc<SecretString>,
    upload_chunk_bytes: usize,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut builder =
            Client::builder().user_agent(concat!("farmerlink/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            base: config.api_base.clone(),
            http,
            anon_key: Arc::clone(&config.anon_key),
            upload_chunk_bytes: config.upload_chunk_bytes.max(1),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base
            .join(path)
            .map_err(|e| BackendError::Url(e.to_string()))
    }

    fn profile_url(&self, user_id: Uuid) -> Result<Url, BackendError> {
        let mut url = self.endpoint(PROFILES_TABLE)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{user_id}"));
        Ok(url)
    }

    /// Every request carries the project key; the bearer is the session token
    /// when there is one.
    fn authorize(&self, req: RequestBuilder, session: Option<&Session>) -> RequestBuilder {
        let bearer = match session {
            Some(session) => session.access_token().expose_secret(),
            None => self.anon_key.expose_secret(),
        };
        req.header("apikey", self.anon_key.expose_secret())
            .bearer_auth(bearer)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, BackendError> {
        let res = req.send().await.map_err(map_reqwest_error)?;
        if res.status().is_success() {
            Ok(res)
        } else {
            Err(error_from_response(res).await)
        }
    }
}

#[async_trait]
impl ProfileStore for BackendClient {
    #[instrument(name = "backend.fetch_profile", skip(self, session), fields(user_id = %user_id))]
    async fn fetch_profile(
        &self,
        session: &Session,
        user_id: Uuid,
    ) -> Result<Option<ProfileRow>, BackendError> {
        let mut url = self.profile_url(user_id)?;
        url.query_pairs_mut()
            .append_pair("select", PROFILE_PROJECTION);

        let res = self
            .send(self.authorize(self.http.get(url), Some(session)))
            .await?;
        let mut rows: Vec<ProfileRow> = decode(res).await?;
        debug!(rows = rows.len(), "profile rows fetched");
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    #[instrument(name = "backend.update_profile", skip(self, session, patch), fields(user_id = %user_id))]
    async fn update_profile(
        &self,
        session: &Session,
        user_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, BackendError> {
        let url = self.profile_url(user_id)?;
        let req = self
            .http
            .patch(url)
            .header("Prefer", "return=representation")
            .json(patch);

        let res = self.send(self.authorize(req, Some(session))).await?;
        let rows: Vec<ProfileRecord> = decode(res).await?;
        rows.into_iter().next().ok_or(BackendError::NotFound("profile"))
    }
}

#[async_trait]
impl BlobStore for BackendClient {
    #[instrument(name = "backend.upload", skip(self, session, object, progress), fields(user_id = %session.user_id(), bytes = object.bytes.len()))]
    async fn upload(
        &self,
        session: &Session,
        bucket: &str,
        path: &str,
        object: UploadObject,
        upsert: bool,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&format!("storage/v1/object/{bucket}/{path}"))?;
        let total = object.bytes.len() as u64;
        let body = reqwest::Body::wrap_stream(progress_stream(
            object.bytes,
            self.upload_chunk_bytes,
            progress,
        ));

        let req = self
            .http
            .post(url)
            .header(CONTENT_TYPE, object.content_type)
            .header(CACHE_CONTROL, "max-age=3600")
            .header(UPSERT_HEADER, if upsert { "true" } else { "false" })
            .body(body);

        let res = self.send(self.authorize(req, Some(session))).await?;
        let stored: UploadObjectResponse = decode(res).await?;
        debug!(key = %stored.key, total, "object stored");
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, BackendError> {
        self.endpoint(&format!("storage/v1/{}", public_object_path(bucket, path)))
    }
}

#[async_trait]
impl AuthProvider for BackendClient {
    #[instrument(name = "backend.sign_in", skip(self, password))]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, BackendError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let body = PasswordGrantRequest {
            email: email.to_string(),
            password: password.expose_secret().to_string(),
        };

        let res = self
            .send(self.authorize(self.http.post(url).json(&body), None))
            .await?;
        let token: TokenResponse = decode(res).await?;
        Ok(Session::new(
            Identity::from(token.user),
            SecretString::from(token.access_token),
        ))
    }

    #[instrument(name = "backend.update_user", skip_all, fields(user_id = %session.user_id()))]
    async fn update_user(
        &self,
        session: &Session,
        request: &UpdateUserRequest,
    ) -> Result<AuthUser, BackendError> {
        let url = self.endpoint("auth/v1/user")?;
        let res = self
            .send(self.authorize(self.http.put(url).json(request), Some(session)))
            .await?;
        decode(res).await
    }

    #[instrument(name = "backend.delete_user", skip(self, session), fields(user_id = %user_id))]
    async fn delete_user(&self, session: &Session, user_id: Uuid) -> Result<(), BackendError> {
        let url = self.endpoint(&format!("auth/v1/admin/users/{user_id}"))?;
        self.send(self.authorize(self.http.delete(url), Some(session)))
            .await?;
        Ok(())
    }

    #[instrument(name = "backend.sign_out", skip_all, fields(user_id = %session.user_id()))]
    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        let url = self.endpoint("auth/v1/logout")?;
        self.send(self.authorize(self.http.post(url), Some(session)))
            .await?;
        Ok(())
    }
}

/// Splits `bytes` into chunks and reports each one as the transport pulls it.
fn progress_stream(
    bytes: Bytes,
    chunk_size: usize,
    progress: Arc<dyn ProgressSink>,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let total = bytes.len() as u64;
    let mut chunks = Vec::with_capacity(bytes.len() / chunk_size + 1);
    let mut rest = bytes;
    while rest.len() > chunk_size {
        chunks.push(rest.split_to(chunk_size));
    }
    chunks.push(rest);

    let mut sent = 0u64;
    futures::stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        progress.bytes_sent(sent, total);
        Ok(chunk)
    }))
}

async fn decode<T>(res: Response) -> Result<T, BackendError>
where
    T: for<'de> Deserialize<'de>,
{
    res.json::<T>()
        .await
        .map_err(|e| BackendError::Serde(e.to_string()))
}

async fn error_from_response(res: Response) -> BackendError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();

    if let Ok(api) = serde_json::from_str::<ApiErrorBody>(&body)
        && let Some(message) = api.message()
    {
        return BackendError::Api {
            status: status.as_u16(),
            message: message.to_string(),
        };
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Auth,
        s => BackendError::Http {
            status: s.as_u16(),
            body,
        },
    }
}

fn map_reqwest_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(e.to_string())
    }
}
