//! In-process stand-in for the hosted backend.
//!
//! Behaves like the real row and storage services closely enough to drive the
//! account flows without a network: rows are keyed by identity, objects by
//! `bucket/path`, and public addresses resolve back to the stored bytes. Every
//! call is counted and failures can be queued per operation.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use url::Url;
use utils::api::{
    auth::{AuthUser, UpdateUserRequest, UserMetadata},
    profile::{ProfilePatch, ProfileRecord, ProfileRow},
    storage::public_object_path,
};
use uuid::Uuid;

use super::{
    backend::{AuthProvider, BackendError, BlobStore, ProfileStore, ProgressSink, UploadObject},
    session::{Identity, Session},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchProfile,
    UpdateProfile,
    Upload,
    SignIn,
    UpdateUser,
    DeleteUser,
    SignOut,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone)]
struct Account {
    id: Uuid,
    email: String,
    password: String,
    metadata: UserMetadata,
}

#[derive(Default)]
struct State {
    profiles: HashMap<Uuid, ProfileRecord>,
    objects: HashMap<String, StoredObject>,
    accounts: Vec<Account>,
    failures: HashMap<Operation, VecDeque<BackendError>>,
    calls: HashMap<Operation, usize>,
    latency: HashMap<Operation, Duration>,
}

const DEFAULT_PUBLIC_BASE: &str = "http://backend.test/";

#[derive(Clone)]
pub struct InMemoryBackend {
    public_base: String,
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_public_base(DEFAULT_PUBLIC_BASE)
    }

    pub fn with_public_base(public_base: impl Into<String>) -> Self {
        let mut public_base = public_base.into();
        if !public_base.ends_with('/') {
            public_base.push('/');
        }
        Self {
            public_base,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates an account with an empty profile row, as sign-up would.
    pub fn register(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut state = self.state();
        state.accounts.push(Account {
            id,
            email: email.to_string(),
            password: password.to_string(),
            metadata: UserMetadata::default(),
        });
        state.profiles.insert(
            id,
            ProfileRecord {
                id,
                username: None,
                full_name: None,
                avatar_url: None,
                updated_at: None,
            },
        );
        id
    }

    /// A session for `user_id` that bypasses password sign-in.
    pub fn session_for(&self, user_id: Uuid) -> Session {
        let email = self
            .state()
            .accounts
            .iter()
            .find(|a| a.id == user_id)
            .map(|a| a.email.clone());
        Session::new(
            Identity {
                id: user_id,
                email,
                metadata: UserMetadata::default(),
            },
            SecretString::from(format!("memory-token-{user_id}")),
        )
    }

    pub fn seed_profile(&self, user_id: Uuid, row: ProfileRow) {
        self.state().profiles.insert(
            user_id,
            ProfileRecord {
                id: user_id,
                username: row.username,
                full_name: row.full_name,
                avatar_url: row.avatar_url,
                updated_at: None,
            },
        );
    }

    pub fn remove_profile(&self, user_id: Uuid) {
        self.state().profiles.remove(&user_id);
    }

    pub fn profile(&self, user_id: Uuid) -> Option<ProfileRecord> {
        self.state().profiles.get(&user_id).cloned()
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.state().objects.get(&object_key(bucket, path)).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Dereferences a public address produced by [`BlobStore::public_url`].
    pub fn fetch_public(&self, url: &Url) -> Option<Bytes> {
        let prefix = format!("{}storage/v1/object/public/", self.public_base);
        let key = url.as_str().strip_prefix(prefix.as_str())?;
        self.state().objects.get(key).map(|o| o.bytes.clone())
    }

    pub fn fail_next(&self, op: Operation, error: BackendError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    pub fn set_latency(&self, op: Operation, latency: Duration) {
        self.state().latency.insert(op, latency);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Counts the call, waits out any configured latency, then pops a queued
    /// failure.
    async fn enter(&self, op: Operation) -> Result<(), BackendError> {
        let latency = {
            let mut state = self.state();
            *state.calls.entry(op).or_default() += 1;
            state.latency.get(&op).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self
            .state()
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn object_key(bucket: &str, path: &str) -> String {
    format!("{bucket}/{path}")
}

#[async_trait]
impl ProfileStore for InMemoryBackend {
    async fn fetch_profile(
        &self,
        _session: &Session,
        user_id: Uuid,
    ) -> Result<Option<ProfileRow>, BackendError> {
        self.enter(Operation::FetchProfile).await?;
        Ok(self
            .state()
            .profiles
            .get(&user_id)
            .cloned()
            .map(ProfileRow::from))
    }

    async fn update_profile(
        &self,
        _session: &Session,
        user_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, BackendError> {
        self.enter(Operation::UpdateProfile).await?;
        let mut state = self.state();
        let record = state
            .profiles
            .get_mut(&user_id)
            .ok_or(BackendError::NotFound("profile"))?;
        patch.apply(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBackend {
    async fn upload(
        &self,
        _session: &Session,
        bucket: &str,
        path: &str,
        object: UploadObject,
        upsert: bool,
        _progress: Arc<dyn ProgressSink>,
    ) -> Result<(), BackendError> {
        self.enter(Operation::Upload).await?;
        let key = object_key(bucket, path);
        let mut state = self.state();
        if !upsert && state.objects.contains_key(&key) {
            return Err(BackendError::Api {
                status: 409,
                message: "The resource already exists".to_string(),
            });
        }
        state.objects.insert(
            key,
            StoredObject {
                bytes: object.bytes,
                content_type: object.content_type,
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, BackendError> {
        Url::parse(&format!(
            "{}storage/v1/{}",
            self.public_base,
            public_object_path(bucket, path)
        ))
        .map_err(|e| BackendError::Url(e.to_string()))
    }
}

#[async_trait]
impl AuthProvider for InMemoryBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, BackendError> {
        self.enter(Operation::SignIn).await?;
        let account = self
            .state()
            .accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .filter(|a| a.password == password.expose_secret())
            .cloned()
            .ok_or_else(|| BackendError::Api {
                status: 400,
                message: "Invalid login credentials".to_string(),
            })?;

        Ok(Session::new(
            Identity {
                id: account.id,
                email: Some(account.email),
                metadata: account.metadata,
            },
            SecretString::from(format!("memory-token-{}-{}", account.id, Uuid::new_v4())),
        ))
    }

    async fn update_user(
        &self,
        session: &Session,
        request: &UpdateUserRequest,
    ) -> Result<AuthUser, BackendError> {
        self.enter(Operation::UpdateUser).await?;
        let mut state = self.state();
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.id == session.user_id())
            .ok_or(BackendError::NotFound("user"))?;
        // Email changes wait for confirmation, so only the password applies now.
        if let Some(password) = &request.password {
            account.password = password.clone();
        }
        Ok(AuthUser {
            id: account.id,
            email: Some(account.email.clone()),
            user_metadata: account.metadata.clone(),
        })
    }

    async fn delete_user(&self, _session: &Session, user_id: Uuid) -> Result<(), BackendError> {
        self.enter(Operation::DeleteUser).await?;
        let mut state = self.state();
        let before = state.accounts.len();
        state.accounts.retain(|a| a.id != user_id);
        if state.accounts.len() == before {
            return Err(BackendError::NotFound("user"));
        }
        state.profiles.remove(&user_id);
        Ok(())
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), BackendError> {
        self.enter(Operation::SignOut).await
    }
}
