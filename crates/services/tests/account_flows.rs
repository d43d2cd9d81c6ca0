mod common;

use std::sync::Arc;

use common::{PASSWORD, start_backend};
use secrecy::SecretString;
use services::services::{
    backend::{AuthProvider, BackendError},
    notifications::NotificationCenter,
    settings::{AccountSettings, SettingsError},
};

fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

#[tokio::test]
async fn changed_password_is_the_one_that_signs_in() {
    let backend = start_backend().await;
    let session = backend.signed_in("asha@example.com").await;
    let notes = Arc::new(NotificationCenter::new());
    let mut settings = AccountSettings::new(session.clone(), backend.client.clone(), notes.clone());
    let before = session.current().await.unwrap().access_token().clone();

    let form = settings.password_form_mut();
    form.current_password = PASSWORD.into();
    form.new_password = "harvest42".into();
    form.confirm_password = "harvest42".into();
    settings.update_password().await.unwrap();

    assert_eq!(notes.last().unwrap().title, "Password updated");
    assert!(settings.password_form().new_password.is_empty());
    let after = session.current().await.unwrap().access_token().clone();
    assert_eq!(backend.user_status(&after).await, reqwest::StatusCode::OK);
    assert_eq!(backend.user_status(&before).await, reqwest::StatusCode::UNAUTHORIZED);

    let old = backend
        .client
        .sign_in_with_password("asha@example.com", &secret(PASSWORD))
        .await;
    assert!(matches!(old, Err(BackendError::Api { status: 400, .. })));
    backend
        .client
        .sign_in_with_password("asha@example.com", &secret("harvest42"))
        .await
        .unwrap();
}

#[tokio::test]
async fn wrong_current_password_changes_nothing() {
    let backend = start_backend().await;
    let session = backend.signed_in("asha@example.com").await;
    let notes = Arc::new(NotificationCenter::new());
    let mut settings = AccountSettings::new(session, backend.client.clone(), notes.clone());

    let form = settings.password_form_mut();
    form.current_password = "not-it-1".into();
    form.new_password = "harvest42".into();
    form.confirm_password = "harvest42".into();
    let err = settings.update_password().await.unwrap_err();

    assert!(matches!(err, SettingsError::IncorrectPassword));
    assert_eq!(notes.last().unwrap().description, "Current password is incorrect");
    backend
        .client
        .sign_in_with_password("asha@example.com", &secret(PASSWORD))
        .await
        .unwrap();
}

#[tokio::test]
async fn deleted_account_is_signed_out_everywhere() {
    let backend = start_backend().await;
    let session = backend.signed_in("asha@example.com").await;
    let identities = session.subscribe();
    let notes = Arc::new(NotificationCenter::new());
    let mut settings = AccountSettings::new(session.clone(), backend.client.clone(), notes.clone());

    settings.delete_account().await.unwrap();

    assert!(session.current().await.is_none());
    assert!(identities.borrow().is_none());
    assert_eq!(notes.last().unwrap().title, "Account deleted");
    assert!(
        backend
            .client
            .sign_in_with_password("asha@example.com", &secret(PASSWORD))
            .await
            .is_err()
    );
}
