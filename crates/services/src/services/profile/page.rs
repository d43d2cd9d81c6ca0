use std::sync::Arc;

use utils::api::profile::ProfileRow;

use super::{ProfileCard, ProfileController, ProfileError, ProfileFormValues};
use crate::services::{
    avatar::{AvatarError, AvatarFile, AvatarUploader, UploadedAvatar, UploaderConfig},
    backend::{BlobStore, ProfileStore},
    notifications::Notifier,
    session::SessionHandle,
};

/// The profile screen: details form, avatar picker and the card summary.
pub struct ProfilePage {
    session: SessionHandle,
    controller: ProfileController,
    uploader: AvatarUploader,
    selected: Option<AvatarFile>,
}

impl ProfilePage {
    pub fn new<B>(
        session: SessionHandle,
        backend: Arc<B>,
        notifier: Arc<dyn Notifier>,
        uploads: UploaderConfig,
    ) -> Self
    where
        B: ProfileStore + BlobStore + 'static,
    {
        let controller = ProfileController::new(
            session.clone(),
            backend.clone(),
            notifier.clone(),
        );
        let uploader = AvatarUploader::new(
            session.clone(),
            backend.clone(),
            backend,
            notifier,
            uploads,
        );
        Self {
            session,
            controller,
            uploader,
            selected: None,
        }
    }

    pub fn controller(&self) -> &ProfileController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ProfileController {
        &mut self.controller
    }

    pub fn uploader(&self) -> &AvatarUploader {
        &self.uploader
    }

    pub fn profile(&self) -> Option<&ProfileRow> {
        self.controller.profile()
    }

    /// Loads the profile for whoever is signed in now.
    pub async fn refresh(&mut self) {
        let identity = self.session.identity();
        self.controller.on_identity_change(identity.as_ref()).await;
    }

    pub async fn save_details(&mut self) -> Result<ProfileRow, ProfileError> {
        self.controller.submit().await
    }

    pub async fn save_values(
        &mut self,
        values: ProfileFormValues,
    ) -> Result<ProfileRow, ProfileError> {
        self.controller.update_profile(values).await
    }

    pub fn selected_file(&self) -> Option<&AvatarFile> {
        self.selected.as_ref()
    }

    /// Picks a file and uploads it straight away. The pick is cleared after a
    /// successful upload so the same file can be chosen again.
    pub async fn choose_avatar(&mut self, file: AvatarFile) -> Result<UploadedAvatar, AvatarError> {
        if self.uploader.is_busy() {
            return Err(AvatarError::Busy);
        }
        self.selected = Some(file.clone());
        let uploaded = self.uploader.upload(file).await?;
        self.controller.apply_avatar(uploaded.avatar_url.clone());
        self.selected = None;
        Ok(uploaded)
    }

    pub fn card(&self) -> ProfileCard {
        let status = self.uploader.status();
        let identity = self.session.identity();
        ProfileCard::new(
            identity.as_ref(),
            self.controller.profile(),
            status.busy.then_some(status.progress),
        )
    }
}
