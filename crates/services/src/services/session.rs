use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use secrecy::SecretString;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, watch};
use utils::api::auth::{AuthUser, UserMetadata};
use uuid::Uuid;

/// The authenticated user as seen by the account pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
    pub metadata: UserMetadata,
}

impl From<AuthUser> for Identity {
    fn from(user: AuthUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            metadata: user.user_metadata,
        }
    }
}

/// An identity together with the bearer token used for its requests.
#[derive(Debug, Clone)]
pub struct Session {
    identity: Identity,
    access_token: Arc<SecretString>,
}

impl Session {
    pub fn new(identity: Identity, access_token: SecretString) -> Self {
        Self {
            identity,
            access_token: Arc::new(access_token),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.id
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }
}

/// Shared handle to the current session.
///
/// Acquired once at start-up and passed to every component. Identity changes
/// (sign-in, sign-out, switching accounts) are broadcast to subscribers; token
/// rotation is not, since it does not change whose data is shown.
#[derive(Clone)]
pub struct SessionHandle {
    current: Arc<RwLock<Option<Session>>>,
    identity_tx: Arc<watch::Sender<Option<Identity>>>,
    row_writers: Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        let (identity_tx, _) = watch::channel(None);
        Self {
            current: Arc::new(RwLock::new(None)),
            identity_tx: Arc::new(identity_tx),
            row_writers: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn signed_in(session: Session) -> Self {
        let (identity_tx, _) = watch::channel(Some(session.identity.clone()));
        Self {
            current: Arc::new(RwLock::new(Some(session))),
            identity_tx: Arc::new(identity_tx),
            row_writers: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub async fn sign_in(&self, session: Session) {
        tracing::info!(user_id = %session.user_id(), "session started");
        let identity = session.identity.clone();
        *self.current.write().await = Some(session);
        self.publish(Some(identity));
    }

    /// Replaces the access token of the active session. Returns false when
    /// nobody is signed in.
    pub async fn rotate_token(&self, access_token: SecretString) -> bool {
        let mut guard = self.current.write().await;
        match guard.as_mut() {
            Some(session) => {
                session.access_token = Arc::new(access_token);
                tracing::debug!(user_id = %session.user_id(), "access token rotated");
                true
            }
            None => false,
        }
    }

    pub async fn sign_out(&self) {
        if let Some(session) = self.current.write().await.take() {
            tracing::info!(user_id = %session.user_id(), "session ended");
        }
        self.publish(None);
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.identity_tx.subscribe()
    }

    /// Serializes profile-row writes issued through this handle for one user.
    pub async fn lock_profile_row(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let gate = {
            let mut writers = self
                .row_writers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Gates nobody holds or waits on are only referenced by the map.
            writers.retain(|_, gate| Arc::strong_count(gate) > 1);
            Arc::clone(writers.entry(user_id).or_default())
        };
        gate.lock_owned().await
    }

    fn publish(&self, identity: Option<Identity>) {
        self.identity_tx.send_if_modified(|current| {
            let changed = current.as_ref().map(|i| i.id) != identity.as_ref().map(|i| i.id);
            *current = identity;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: Uuid) -> Session {
        Session::new(
            Identity {
                id,
                email: Some("asha@example.com".into()),
                metadata: UserMetadata::default(),
            },
            SecretString::from("token-1".to_string()),
        )
    }

    #[tokio::test]
    async fn identity_changes_are_broadcast_but_rotation_is_not() {
        let handle = SessionHandle::new();
        let mut rx = handle.subscribe();
        let id = Uuid::new_v4();

        handle.sign_in(session(id)).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().map(|i| i.id), Some(id));

        assert!(
            handle
                .rotate_token(SecretString::from("token-2".to_string()))
                .await
        );
        assert!(!rx.has_changed().unwrap());

        handle.sign_out().await;
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_none());
        assert!(handle.current().await.is_none());
    }

    #[tokio::test]
    async fn rotate_without_session_is_rejected() {
        let handle = SessionHandle::new();
        assert!(
            !handle
                .rotate_token(SecretString::from("token".to_string()))
                .await
        );
    }

    #[tokio::test]
    async fn row_writes_for_one_user_are_serialized() {
        let handle = SessionHandle::new();
        let id = Uuid::new_v4();

        let first = handle.lock_profile_row(id).await;
        let other_user = handle.lock_profile_row(Uuid::new_v4()).await;
        drop(other_user);

        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.lock_profile_row(id).await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        drop(first);
        pending.await.unwrap();
    }

    #[tokio::test]
    async fn idle_row_gates_are_released() {
        let handle = SessionHandle::new();
        let tracked = || handle.row_writers.lock().unwrap().len();

        for _ in 0..3 {
            drop(handle.lock_profile_row(Uuid::new_v4()).await);
        }
        assert_eq!(tracked(), 1);

        let held = handle.lock_profile_row(Uuid::new_v4()).await;
        assert_eq!(tracked(), 1);
        let also_held = handle.lock_profile_row(Uuid::new_v4()).await;
        assert_eq!(tracked(), 2);
        drop((held, also_held));
    }
}
