//! Account settings: email and password changes, notification preferences
//! and account deletion.

use std::{fmt, sync::Arc};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use utils::api::auth::UpdateUserRequest;

use super::{
    backend::{AuthProvider, BackendError},
    notifications::{Notification, Notifier},
    session::{Session, SessionHandle},
    validation::{FieldErrors, is_valid_email, min_chars},
};

pub const PASSWORD_MIN_CHARS: usize = 6;
pub const PASSWORD_TOO_SHORT: &str = "Password must be at least 6 characters";
pub const PASSWORDS_DIFFER: &str = "Passwords don't match";
pub const INVALID_EMAIL: &str = "Please enter a valid email address";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EmailField {
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PasswordField {
    CurrentPassword,
    NewPassword,
    ConfirmPassword,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid email: {0}")]
    InvalidEmail(FieldErrors<EmailField>),
    #[error("invalid password: {0}")]
    InvalidPassword(FieldErrors<PasswordField>),
    #[error("email address unchanged")]
    Unchanged,
    #[error("Current password is incorrect")]
    IncorrectPassword,
    #[error("not signed in")]
    NotSignedIn,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SettingsError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmailForm {
    pub email: String,
    errors: FieldErrors<EmailField>,
}

impl EmailForm {
    pub fn errors(&self) -> &FieldErrors<EmailField> {
        &self.errors
    }

    fn validated(&mut self) -> Result<String, FieldErrors<EmailField>> {
        let mut errors = FieldErrors::new();
        if !is_valid_email(self.email.trim()) {
            errors.add(EmailField::Email, INVALID_EMAIL);
        }
        self.errors = errors.clone();
        errors.into_result().map(|()| self.email.trim().to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PasswordForm {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
    errors: FieldErrors<PasswordField>,
}

impl PasswordForm {
    pub fn errors(&self) -> &FieldErrors<PasswordField> {
        &self.errors
    }

    fn validated(&mut self) -> Result<(), FieldErrors<PasswordField>> {
        let mut errors = FieldErrors::new();
        for (field, value) in [
            (PasswordField::CurrentPassword, &self.current_password),
            (PasswordField::NewPassword, &self.new_password),
            (PasswordField::ConfirmPassword, &self.confirm_password),
        ] {
            if !min_chars(value, PASSWORD_MIN_CHARS) {
                errors.add(field, PASSWORD_TOO_SHORT);
            }
        }
        // Only compared once every field has a plausible length.
        if errors.is_empty() && self.new_password != self.confirm_password {
            errors.add(PasswordField::ConfirmPassword, PASSWORDS_DIFFER);
        }
        self.errors = errors.clone();
        errors.into_result()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationPreference {
    EmailNotifications,
    MarketUpdates,
    NewListings,
    PriceAlerts,
}

impl NotificationPreference {
    pub const ALL: [Self; 4] = [
        Self::EmailNotifications,
        Self::MarketUpdates,
        Self::NewListings,
        Self::PriceAlerts,
    ];

    pub fn words(self) -> &'static str {
        match self {
            Self::EmailNotifications => "email notifications",
            Self::MarketUpdates => "market updates",
            Self::NewListings => "new listings",
            Self::PriceAlerts => "price alerts",
        }
    }
}

impl fmt::Display for NotificationPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.words())
    }
}

/// Kept on the device only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPreferences {
    pub email_notifications: bool,
    pub market_updates: bool,
    pub new_listings: bool,
    pub price_alerts: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email_notifications: true,
            market_updates: true,
            new_listings: false,
            price_alerts: true,
        }
    }
}

impl NotificationPreferences {
    pub fn get(&self, pref: NotificationPreference) -> bool {
        match pref {
            NotificationPreference::EmailNotifications => self.email_notifications,
            NotificationPreference::MarketUpdates => self.market_updates,
            NotificationPreference::NewListings => self.new_listings,
            NotificationPreference::PriceAlerts => self.price_alerts,
        }
    }

    fn slot(&mut self, pref: NotificationPreference) -> &mut bool {
        match pref {
            NotificationPreference::EmailNotifications => &mut self.email_notifications,
            NotificationPreference::MarketUpdates => &mut self.market_updates,
            NotificationPreference::NewListings => &mut self.new_listings,
            NotificationPreference::PriceAlerts => &mut self.price_alerts,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsBusy {
    pub email: bool,
    pub password: bool,
    pub delete_account: bool,
}

pub struct AccountSettings {
    session: SessionHandle,
    auth: Arc<dyn AuthProvider>,
    notifier: Arc<dyn Notifier>,
    email_form: EmailForm,
    password_form: PasswordForm,
    preferences: NotificationPreferences,
    busy: SettingsBusy,
}

impl AccountSettings {
    pub fn new(
        session: SessionHandle,
        auth: Arc<dyn AuthProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let email = session
            .identity()
            .and_then(|i| i.email)
            .unwrap_or_default();
        Self {
            session,
            auth,
            notifier,
            email_form: EmailForm {
                email,
                ..EmailForm::default()
            },
            password_form: PasswordForm::default(),
            preferences: NotificationPreferences::default(),
            busy: SettingsBusy::default(),
        }
    }

    pub fn email_form(&self) -> &EmailForm {
        &self.email_form
    }

    pub fn email_form_mut(&mut self) -> &mut EmailForm {
        &mut self.email_form
    }

    pub fn password_form(&self) -> &PasswordForm {
        &self.password_form
    }

    pub fn password_form_mut(&mut self) -> &mut PasswordForm {
        &mut self.password_form
    }

    pub fn preferences(&self) -> &NotificationPreferences {
        &self.preferences
    }

    pub fn busy(&self) -> SettingsBusy {
        self.busy
    }

    /// Requests an address change. The backend mails a confirmation link; the
    /// identity keeps its current address until that is followed.
    #[instrument(name = "settings.update_email", skip_all)]
    pub async fn update_email(&mut self) -> Result<(), SettingsError> {
        let email = self
            .email_form
            .validated()
            .map_err(SettingsError::InvalidEmail)?;
        let session = self
            .session
            .current()
            .await
            .ok_or(SettingsError::NotSignedIn)?;

        if session.identity().email.as_deref() == Some(email.as_str()) {
            self.notifier.notify(Notification::info(
                "No change",
                "The email address is the same as your current one.",
            ));
            return Err(SettingsError::Unchanged);
        }

        self.busy.email = true;
        let result = self
            .auth
            .update_user(
                &session,
                &UpdateUserRequest {
                    email: Some(email),
                    password: None,
                },
            )
            .await;
        self.busy.email = false;

        match result {
            Ok(_) => {
                info!(user_id = %session.user_id(), "email change requested");
                self.notifier.notify(Notification::info(
                    "Verification email sent",
                    "Please check your email to confirm the change.",
                ));
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Error updating email");
                self.notifier.notify(Notification::error(
                    "Error updating email",
                    err.user_message(),
                ));
                Err(err.into())
            }
        }
    }

    /// Verifies the current password by signing in with it, then sets the new
    /// one.
    #[instrument(name = "settings.update_password", skip_all)]
    pub async fn update_password(&mut self) -> Result<(), SettingsError> {
        self.password_form
            .validated()
            .map_err(SettingsError::InvalidPassword)?;
        let session = self
            .session
            .current()
            .await
            .ok_or(SettingsError::NotSignedIn)?;

        self.busy.password = true;
        let result = self.change_password(&session).await;
        self.busy.password = false;

        match result {
            Ok(()) => {
                self.password_form.reset();
                self.notifier.notify(Notification::info(
                    "Password updated",
                    "Your password has been updated successfully.",
                ));
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Error updating password");
                self.notifier.notify(Notification::error(
                    "Error updating password",
                    err.user_message(),
                ));
                Err(err)
            }
        }
    }

    async fn change_password(
        &self,
        session: &Session,
    ) -> Result<(), SettingsError> {
        let email = session.identity().email.clone().unwrap_or_default();
        let current = SecretString::from(self.password_form.current_password.clone());
        let verified = self
            .auth
            .sign_in_with_password(&email, &current)
            .await
            .map_err(|err| {
                warn!(error = %err, "current password rejected");
                SettingsError::IncorrectPassword
            })?;
        if verified.user_id() != session.user_id() {
            return Err(SettingsError::IncorrectPassword);
        }
        self.session
            .rotate_token(SecretString::from(
                verified.access_token().expose_secret().to_string(),
            ))
            .await;
        // The verifying sign-in opened a new remote session; retire the old one.
        if let Err(err) = self.auth.sign_out(session).await {
            warn!(
                user_id = %session.user_id(),
                error = %err,
                "previous session was not signed out"
            );
        }

        let refreshed = self
            .session
            .current()
            .await
            .ok_or(SettingsError::NotSignedIn)?;
        self.auth
            .update_user(
                &refreshed,
                &UpdateUserRequest {
                    email: None,
                    password: Some(self.password_form.new_password.clone()),
                },
            )
            .await?;
        Ok(())
    }

    /// Flips one preference and returns its new value.
    pub fn toggle_preference(&mut self, pref: NotificationPreference) -> bool {
        let slot = self.preferences.slot(pref);
        *slot = !*slot;
        let enabled = *slot;
        self.notifier.notify(Notification::info(
            "Notification settings updated",
            format!(
                "{pref} has been {}.",
                if enabled { "enabled" } else { "disabled" }
            ),
        ));
        enabled
    }

    /// Deletes the account and ends the session.
    #[instrument(name = "settings.delete_account", skip_all)]
    pub async fn delete_account(&mut self) -> Result<(), SettingsError> {
        let session = self
            .session
            .current()
            .await
            .ok_or(SettingsError::NotSignedIn)?;
        let user_id = session.user_id();

        self.busy.delete_account = true;
        let result = self.auth.delete_user(&session, user_id).await;
        if result.is_ok() {
            if let Err(err) = self.auth.sign_out(&session).await {
                warn!(%user_id, error = %err, "remote sign-out after deletion failed");
            }
            self.session.sign_out().await;
        }
        self.busy.delete_account = false;

        match result {
            Ok(()) => {
                info!(%user_id, "account deleted");
                self.notifier.notify(Notification::info(
                    "Account deleted",
                    "Your account has been successfully deleted.",
                ));
                Ok(())
            }
            Err(err) => {
                error!(%user_id, error = %err, "Error deleting account");
                self.notifier.notify(Notification::error(
                    "Error deleting account",
                    err.user_message(),
                ));
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::services::{
        memory::{InMemoryBackend, Operation},
        notifications::NotificationCenter,
    };

    struct Harness {
        backend: InMemoryBackend,
        notes: Arc<NotificationCenter>,
        session: SessionHandle,
        settings: AccountSettings,
        user_id: Uuid,
    }

    async fn harness() -> Harness {
        let backend = InMemoryBackend::new();
        let user_id = backend.register("asha@example.com", "secret1");
        let session = SessionHandle::new();
        let signed_in = backend
            .sign_in_with_password("asha@example.com", &SecretString::from("secret1".to_string()))
            .await
            .unwrap();
        session.sign_in(signed_in).await;
        let notes = Arc::new(NotificationCenter::new());
        let settings =
            AccountSettings::new(session.clone(), Arc::new(backend.clone()), notes.clone());
        Harness {
            backend,
            notes,
            session,
            settings,
            user_id,
        }
    }

    fn fill_passwords(settings: &mut AccountSettings, current: &str, new: &str, confirm: &str) {
        let form = settings.password_form_mut();
        form.current_password = current.into();
        form.new_password = new.into();
        form.confirm_password = confirm.into();
    }

    #[tokio::test]
    async fn email_form_starts_from_the_current_address() {
        let h = harness().await;
        assert_eq!(h.settings.email_form().email, "asha@example.com");
    }

    #[tokio::test]
    async fn same_email_is_a_no_op() {
        let mut h = harness().await;
        let calls = h.backend.total_calls();

        assert!(matches!(
            h.settings.update_email().await,
            Err(SettingsError::Unchanged)
        ));
        assert_eq!(h.backend.total_calls(), calls);
        assert_eq!(h.notes.last().unwrap().title, "No change");
    }

    #[tokio::test]
    async fn malformed_email_never_reaches_the_backend() {
        let mut h = harness().await;
        h.settings.email_form_mut().email = "asha@farm".into();

        assert!(matches!(
            h.settings.update_email().await,
            Err(SettingsError::InvalidEmail(_))
        ));
        assert_eq!(
            h.settings.email_form().errors().get(EmailField::Email),
            Some(INVALID_EMAIL)
        );
        assert_eq!(h.backend.calls(Operation::UpdateUser), 0);
    }

    #[tokio::test]
    async fn new_email_requests_verification() {
        let mut h = harness().await;
        h.settings.email_form_mut().email = "asha.rao@example.com".into();

        h.settings.update_email().await.unwrap();

        assert_eq!(h.backend.calls(Operation::UpdateUser), 1);
        assert_eq!(h.notes.last().unwrap().title, "Verification email sent");
        assert!(!h.settings.busy().email);
    }

    #[tokio::test]
    async fn mismatched_confirmation_is_reported_on_confirm_field() {
        let mut h = harness().await;
        fill_passwords(&mut h.settings, "secret1", "harvest9", "harvest8");

        assert!(h.settings.update_password().await.is_err());
        assert_eq!(
            h.settings
                .password_form()
                .errors()
                .get(PasswordField::ConfirmPassword),
            Some(PASSWORDS_DIFFER)
        );
        assert_eq!(h.backend.calls(Operation::UpdateUser), 0);
    }

    #[tokio::test]
    async fn short_passwords_are_rejected_per_field() {
        let mut h = harness().await;
        fill_passwords(&mut h.settings, "abc", "harvest9", "harvest9");

        assert!(h.settings.update_password().await.is_err());
        let errors = h.settings.password_form().errors();
        assert_eq!(errors.get(PasswordField::CurrentPassword), Some(PASSWORD_TOO_SHORT));
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn wrong_current_password_stops_the_change() {
        let mut h = harness().await;
        fill_passwords(&mut h.settings, "wrong-one", "harvest9", "harvest9");

        let err = h.settings.update_password().await.unwrap_err();

        assert!(matches!(err, SettingsError::IncorrectPassword));
        assert_eq!(h.backend.calls(Operation::UpdateUser), 0);
        let note = h.notes.last().unwrap();
        assert_eq!(note.title, "Error updating password");
        assert_eq!(note.description, "Current password is incorrect");
    }

    #[tokio::test]
    async fn password_change_takes_effect_and_resets_the_form() {
        let mut h = harness().await;
        fill_passwords(&mut h.settings, "secret1", "harvest9", "harvest9");

        h.settings.update_password().await.unwrap();

        assert!(h.settings.password_form().new_password.is_empty());
        assert_eq!(h.notes.last().unwrap().title, "Password updated");
        assert!(
            h.backend
                .sign_in_with_password("asha@example.com", &SecretString::from("harvest9".to_string()))
                .await
                .is_ok()
        );
        assert_eq!(h.session.identity().map(|i| i.id), Some(h.user_id));
        assert_eq!(h.backend.calls(Operation::SignOut), 1);
    }

    #[tokio::test]
    async fn retiring_the_old_session_is_best_effort() {
        let mut h = harness().await;
        h.backend.fail_next(Operation::SignOut, BackendError::Timeout);
        fill_passwords(&mut h.settings, "secret1", "harvest9", "harvest9");

        h.settings.update_password().await.unwrap();

        assert_eq!(h.backend.calls(Operation::UpdateUser), 1);
        assert_eq!(h.notes.last().unwrap().title, "Password updated");
    }

    #[tokio::test]
    async fn toggling_a_preference_describes_the_change() {
        let mut h = harness().await;

        assert!(h.settings.toggle_preference(NotificationPreference::NewListings));
        assert_eq!(
            h.notes.last().unwrap().description,
            "new listings has been enabled."
        );
        assert!(!h.settings.toggle_preference(NotificationPreference::EmailNotifications));
        assert_eq!(
            h.notes.last().unwrap().description,
            "email notifications has been disabled."
        );
        assert!(h.settings.preferences().price_alerts);
    }

    #[tokio::test]
    async fn deleting_the_account_signs_out() {
        let mut h = harness().await;
        let mut identities = h.session.subscribe();

        h.settings.delete_account().await.unwrap();

        assert!(h.session.current().await.is_none());
        assert!(identities.has_changed().unwrap());
        assert_eq!(*identities.borrow_and_update(), None);
        assert!(h.backend.profile(h.user_id).is_none());
        assert_eq!(h.notes.last().unwrap().title, "Account deleted");
    }

    #[tokio::test]
    async fn failed_deletion_keeps_the_session() {
        let mut h = harness().await;
        h.backend.fail_next(
            Operation::DeleteUser,
            BackendError::Api {
                status: 403,
                message: "User not allowed".into(),
            },
        );

        assert!(h.settings.delete_account().await.is_err());
        assert!(h.session.current().await.is_some());
        let note = h.notes.last().unwrap();
        assert_eq!(note.title, "Error deleting account");
        assert_eq!(note.description, "User not allowed");
        assert!(!h.settings.busy().delete_account);
    }
}
