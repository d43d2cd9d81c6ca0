//! Profile page: loading the row for the signed-in identity, editing the
//! personal details and keeping the local copy in step with the backend.

mod display;
mod form;
mod page;

use std::sync::Arc;

use chrono::Utc;
pub use display::{ProfileCard, UploadCaption, initials};
pub use form::{
    FULL_NAME_MIN_CHARS, FULL_NAME_TOO_SHORT, ProfileField, ProfileForm, ProfileFormValues,
    USERNAME_MIN_CHARS, USERNAME_TOO_SHORT,
};
pub use page::ProfilePage;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, instrument, warn};
use utils::api::profile::{ProfilePatch, ProfileRow};
use uuid::Uuid;

use super::{
    backend::{BackendError, ProfileStore},
    notifications::{Notification, Notifier},
    session::{Identity, Session, SessionHandle},
    validation::FieldErrors,
};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid profile details: {0}")]
    Validation(FieldErrors<ProfileField>),
    #[error("not signed in")]
    NotSignedIn,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// What a call to [`ProfileController::on_identity_change`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Same identity as the last load; nothing was fetched.
    Unchanged,
    /// Signed out; local state was cleared.
    Cleared,
    Loaded(ProfileRow),
    /// The identity has no profile row yet.
    Empty,
    Failed,
}

pub struct ProfileController {
    session: SessionHandle,
    store: Arc<dyn ProfileStore>,
    notifier: Arc<dyn Notifier>,
    form: ProfileForm,
    profile: Option<ProfileRow>,
    loaded_for: Option<Uuid>,
    loading: bool,
    saving: bool,
}

impl ProfileController {
    pub fn new(
        session: SessionHandle,
        store: Arc<dyn ProfileStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            session,
            store,
            notifier,
            form: ProfileForm::new(),
            profile: None,
            loaded_for: None,
            loading: false,
            saving: false,
        }
    }

    pub fn profile(&self) -> Option<&ProfileRow> {
        self.profile.as_ref()
    }

    pub fn form(&self) -> &ProfileForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut ProfileForm {
        &mut self.form
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    /// Loads the profile when the identity differs from the last one seen.
    ///
    /// Runs at most once per transition and never without an identity.
    pub async fn on_identity_change(&mut self, identity: Option<&Identity>) -> LoadOutcome {
        let next = identity.map(|i| i.id);
        if next == self.loaded_for {
            return LoadOutcome::Unchanged;
        }
        self.profile = None;
        self.form.set_defaults(None);

        let Some(user_id) = next else {
            self.loaded_for = None;
            return LoadOutcome::Cleared;
        };

        // Not recorded as seen until a session backs it, so a later call retries.
        let Some(session) = self.session_for(user_id).await else {
            warn!(%user_id, "identity changed but no matching session is active");
            return LoadOutcome::Failed;
        };
        self.loaded_for = next;
        self.load(&session).await
    }

    /// Follows identity changes until the session handle goes away.
    pub async fn follow_identity(&mut self, mut identities: watch::Receiver<Option<Identity>>) {
        loop {
            let identity = identities.borrow_and_update().clone();
            self.on_identity_change(identity.as_ref()).await;
            if identities.changed().await.is_err() {
                break;
            }
        }
    }

    #[instrument(name = "profile.load", skip_all, fields(user_id = %session.user_id()))]
    async fn load(&mut self, session: &Session) -> LoadOutcome {
        self.loading = true;
        let result = self
            .store
            .fetch_profile(session, session.user_id())
            .await;
        self.loading = false;

        match result {
            Ok(Some(row)) => {
                self.form.set_defaults(Some(&row));
                self.profile = Some(row.clone());
                LoadOutcome::Loaded(row)
            }
            Ok(None) => LoadOutcome::Empty,
            Err(err) => {
                error!(error = %err, "Error fetching profile");
                self.notifier.notify(Notification::error(
                    "Error fetching profile",
                    "Please try again later.",
                ));
                LoadOutcome::Failed
            }
        }
    }

    /// Validates the form and, when valid, saves it.
    pub async fn submit(&mut self) -> Result<ProfileRow, ProfileError> {
        let values = self.form.validated().map_err(ProfileError::Validation)?;
        self.update_profile(values).await
    }

    /// Validates and writes the details, then merges them into the local copy.
    #[instrument(name = "profile.update", skip_all)]
    pub async fn update_profile(
        &mut self,
        values: ProfileFormValues,
    ) -> Result<ProfileRow, ProfileError> {
        values.validate().map_err(ProfileError::Validation)?;
        let session = self
            .session
            .current()
            .await
            .ok_or(ProfileError::NotSignedIn)?;
        let user_id = session.user_id();
        let patch = ProfilePatch::details(
            values.username.clone(),
            values.full_name.clone(),
            Utc::now(),
        );

        self.saving = true;
        let result = {
            let _writer = self.session.lock_profile_row(user_id).await;
            self.store.update_profile(&session, user_id, &patch).await
        };
        self.saving = false;

        match result {
            Ok(_) => {
                let profile = self.profile.get_or_insert_with(ProfileRow::default);
                if let Some(username) = values.username {
                    profile.username = Some(username);
                }
                if let Some(full_name) = values.full_name {
                    profile.full_name = Some(full_name);
                }
                self.notifier.notify(Notification::info(
                    "Profile updated",
                    "Your profile information has been updated successfully.",
                ));
                Ok(profile.clone())
            }
            Err(err) => {
                error!(%user_id, error = %err, "Error updating profile");
                self.notifier.notify(Notification::error(
                    "Error updating profile",
                    err.user_message(),
                ));
                Err(err.into())
            }
        }
    }

    /// Records an avatar address written by the uploader.
    pub fn apply_avatar(&mut self, avatar_url: String) {
        self.profile
            .get_or_insert_with(ProfileRow::default)
            .avatar_url = Some(avatar_url);
    }

    async fn session_for(&self, user_id: Uuid) -> Option<Session> {
        self.session
            .current()
            .await
            .filter(|session| session.user_id() == user_id)
    }
}
