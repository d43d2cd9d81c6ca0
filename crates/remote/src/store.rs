//! Process-local backing data: accounts, sessions, profile rows and objects.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use utils::api::{
    auth::{AuthUser, UserMetadata},
    profile::{ProfilePatch, ProfileRecord},
};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("Invalid login credentials")]
    InvalidCredentials,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    password: String,
    /// Address waiting for confirmation.
    pub new_email: Option<String>,
    pub metadata: UserMetadata,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn to_user(&self) -> AuthUser {
        AuthUser {
            id: self.id,
            email: Some(self.email.clone()),
            user_metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_control: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    sessions: HashMap<Uuid, AuthSession>,
    profiles: HashMap<Uuid, ProfileRecord>,
    objects: HashMap<(String, String), StoredObject>,
}

#[derive(Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an account and its empty profile row.
    pub async fn create_account(&self, email: &str, password: &str) -> Result<Account, StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(email))
        {
            return Err(StoreError::Conflict("User already registered".to_string()));
        }
        let account = Account {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password: password.to_string(),
            new_email: None,
            metadata: UserMetadata::default(),
            created_at: Utc::now(),
        };
        tables.accounts.insert(account.id, account.clone());
        tables.profiles.insert(
            account.id,
            ProfileRecord {
                id: account.id,
                username: None,
                full_name: None,
                avatar_url: None,
                updated_at: None,
            },
        );
        Ok(account)
    }

    pub async fn verify_password(&self, email: &str, password: &str) -> Result<Account, StoreError> {
        self.tables
            .read()
            .await
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email) && a.password == password)
            .cloned()
            .ok_or(StoreError::InvalidCredentials)
    }

    pub async fn account(&self, id: Uuid) -> Result<Account, StoreError> {
        self.tables
            .read()
            .await
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("user"))
    }

    pub async fn update_account(
        &self,
        id: Uuid,
        new_email: Option<String>,
        password: Option<String>,
    ) -> Result<Account, StoreError> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::NotFound("user"))?;
        if let Some(email) = new_email {
            account.new_email = Some(email);
        }
        if let Some(password) = password {
            account.password = password;
        }
        Ok(account.clone())
    }

    /// Removes the account, its sessions and its profile row. Stored objects
    /// stay behind.
    pub async fn delete_account(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .accounts
            .remove(&id)
            .ok_or(StoreError::NotFound("user"))?;
        tables.sessions.retain(|_, s| s.user_id != id);
        tables.profiles.remove(&id);
        Ok(())
    }

    pub async fn open_session(&self, user_id: Uuid) -> AuthSession {
        let session = AuthSession {
            id: Uuid::new_v4(),
            user_id,
            revoked_at: None,
        };
        self.tables.write().await.sessions.insert(session.id, session);
        session
    }

    pub async fn session(&self, id: Uuid) -> Result<AuthSession, StoreError> {
        self.tables
            .read()
            .await
            .sessions
            .get(&id)
            .copied()
            .ok_or(StoreError::NotFound("session"))
    }

    pub async fn revoke_session(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .get_mut(&id)
            .ok_or(StoreError::NotFound("session"))?;
        session.revoked_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    pub async fn profile(&self, id: Uuid) -> Option<ProfileRecord> {
        self.tables.read().await.profiles.get(&id).cloned()
    }

    /// Applies a partial update. Usernames are unique across rows.
    pub async fn patch_profile(
        &self,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<ProfileRecord>, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(username) = &patch.username
            && tables
                .profiles
                .values()
                .any(|p| p.id != id && p.username.as_deref() == Some(username.as_str()))
        {
            return Err(StoreError::Conflict(
                "duplicate key value violates unique constraint \"profiles_username_key\""
                    .to_string(),
            ));
        }
        Ok(tables.profiles.get_mut(&id).map(|record| {
            patch.apply(record);
            record.clone()
        }))
    }

    pub async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        object: StoredObject,
        upsert: bool,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let key = (bucket.to_string(), path.to_string());
        if !upsert && tables.objects.contains_key(&key) {
            return Err(StoreError::Conflict("The resource already exists".to_string()));
        }
        tables.objects.insert(key, object);
        Ok(())
    }

    pub async fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.tables
            .read()
            .await
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }
}
