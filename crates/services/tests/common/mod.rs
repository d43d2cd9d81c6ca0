#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use remote::{AppState, RemoteServerConfig};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use services::services::{
    backend::{
        AuthProvider, BackendError, BlobStore, ProfileStore, ProgressSink, UploadObject,
    },
    config::BackendConfig,
    remote_client::BackendClient,
    session::{Session, SessionHandle},
};
use tokio::net::TcpListener;
use url::Url;
use utils::api::profile::{ProfilePatch, ProfileRecord, ProfileRow};
use uuid::Uuid;

pub const ANON_KEY: &str = "integration-anon-key";
pub const PASSWORD: &str = "secret1";

pub struct Backend {
    pub config: BackendConfig,
    pub client: Arc<BackendClient>,
}

/// Starts the local backend on an ephemeral port.
pub async fn start_backend() -> Backend {
    start_backend_with(|config| config).await
}

pub async fn start_backend_with(
    tune: impl FnOnce(BackendConfig) -> BackendConfig,
) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RemoteServerConfig::local(addr, ANON_KEY);
    tokio::spawn(remote::serve(listener, AppState::new(server)));

    let config = tune(BackendConfig::new(&format!("http://{addr}"), ANON_KEY).unwrap());
    let client = Arc::new(BackendClient::new(&config).unwrap());
    Backend { config, client }
}

impl Backend {
    /// Registers an account over HTTP and signs it in through the client.
    pub async fn sign_up(&self, email: &str) -> Session {
        let url = self.config.api_base.join("auth/v1/signup").unwrap();
        let res = reqwest::Client::new()
            .post(url)
            .header("apikey", ANON_KEY)
            .json(&json!({"email": email, "password": PASSWORD}))
            .send()
            .await
            .unwrap();
        assert!(res.status().is_success(), "signup failed: {}", res.status());

        self.client
            .sign_in_with_password(email, &SecretString::from(PASSWORD.to_string()))
            .await
            .unwrap()
    }

    pub async fn signed_in(&self, email: &str) -> SessionHandle {
        SessionHandle::signed_in(self.sign_up(email).await)
    }

    /// Status of `GET /auth/v1/user` for a bearer token.
    pub async fn user_status(&self, token: &SecretString) -> reqwest::StatusCode {
        let url = self.config.api_base.join("auth/v1/user").unwrap();
        reqwest::Client::new()
            .get(url)
            .header("apikey", ANON_KEY)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .unwrap()
            .status()
    }

    pub async fn download(&self, url: &str) -> (reqwest::StatusCode, Vec<u8>) {
        let res = reqwest::get(url).await.unwrap();
        let status = res.status();
        (status, res.bytes().await.unwrap().to_vec())
    }
}

/// Counts every call that would reach the network.
pub struct Counting<S> {
    inner: Arc<S>,
    calls: AtomicUsize,
}

impl<S> Counting<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: ProfileStore> ProfileStore for Counting<S> {
    async fn fetch_profile(
        &self,
        session: &Session,
        user_id: Uuid,
    ) -> Result<Option<ProfileRow>, BackendError> {
        self.hit();
        self.inner.fetch_profile(session, user_id).await
    }

    async fn update_profile(
        &self,
        session: &Session,
        user_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, BackendError> {
        self.hit();
        self.inner.update_profile(session, user_id, patch).await
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for Counting<S> {
    async fn upload(
        &self,
        session: &Session,
        bucket: &str,
        path: &str,
        object: UploadObject,
        upsert: bool,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(), BackendError> {
        self.hit();
        self.inner
            .upload(session, bucket, path, object, upsert, progress)
            .await
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, BackendError> {
        self.inner.public_url(bucket, path)
    }
}
