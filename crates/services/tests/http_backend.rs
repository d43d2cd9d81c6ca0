mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use common::{Counting, start_backend, start_backend_with};
use services::services::{
    avatar::{AvatarError, AvatarFile, AvatarUploader, MAX_AVATAR_BYTES, UploaderConfig},
    backend::{BackendError, BlobStore, ProfileStore, ProgressSink, UploadObject},
    notifications::NotificationCenter,
    profile::{LoadOutcome, ProfileController, ProfileError, ProfileFormValues, ProfilePage},
};
use uuid::Uuid;

fn uploads() -> UploaderConfig {
    UploaderConfig {
        settle_delay: Duration::ZERO,
        ..UploaderConfig::default()
    }
}

fn png(len: usize) -> AvatarFile {
    AvatarFile {
        name: "portrait.png".into(),
        content_type: "image/png".into(),
        bytes: Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>()),
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<(u64, u64)>>);

impl ProgressSink for Recorder {
    fn bytes_sent(&self, sent: u64, total: u64) {
        self.0.lock().unwrap().push((sent, total));
    }
}

#[tokio::test]
async fn avatar_round_trip_over_http() {
    let backend = start_backend().await;
    let session = backend.signed_in("asha@example.com").await;
    let notes = Arc::new(NotificationCenter::new());
    let mut page = ProfilePage::new(
        session.clone(),
        backend.client.clone(),
        notes.clone(),
        uploads(),
    );
    page.refresh().await;

    let file = png(200 * 1024);
    let uploaded = page.choose_avatar(file.clone()).await.unwrap();

    let current = session.current().await.unwrap();
    let row = backend
        .client
        .fetch_profile(&current, current.user_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.avatar_url.as_deref(), Some(uploaded.avatar_url.as_str()));

    let (status, bytes) = backend.download(&uploaded.avatar_url).await;
    assert!(status.is_success());
    assert_eq!(bytes, file.bytes.to_vec());
    assert_eq!(notes.last().unwrap().title, "Avatar updated");
}

#[tokio::test]
async fn upload_progress_is_measured_in_chunks() {
    let backend = start_backend_with(|mut config| {
        config.upload_chunk_bytes = 1024;
        config
    })
    .await;
    let session = backend.sign_up("asha@example.com").await;
    let recorder = Arc::new(Recorder::default());

    backend
        .client
        .upload(
            &session,
            "avatars",
            &format!("{}/avatar-1.png", session.user_id()),
            UploadObject {
                bytes: Bytes::from(vec![1u8; 4096 + 10]),
                content_type: "image/png".into(),
            },
            true,
            recorder.clone(),
        )
        .await
        .unwrap();

    let seen = recorder.0.lock().unwrap().clone();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen.first(), Some(&(1024, 4106)));
    assert_eq!(seen.last(), Some(&(4106, 4106)));
}

#[tokio::test]
async fn rejected_files_never_reach_the_network() {
    let backend = start_backend().await;
    let session = backend.signed_in("asha@example.com").await;
    let counting = Arc::new(Counting::new(backend.client.clone()));
    let uploader = AvatarUploader::new(
        session,
        counting.clone(),
        counting.clone(),
        Arc::new(NotificationCenter::new()),
        uploads(),
    );

    assert!(matches!(
        uploader.upload(png(MAX_AVATAR_BYTES + 1)).await,
        Err(AvatarError::TooLarge { .. })
    ));
    let svg = AvatarFile {
        name: "logo.svg".into(),
        content_type: "image/svg+xml".into(),
        bytes: Bytes::from_static(b"<svg/>"),
    };
    assert!(matches!(
        uploader.upload(svg).await,
        Err(AvatarError::UnsupportedType(_))
    ));
    assert_eq!(counting.calls(), 0);

    uploader.upload(png(MAX_AVATAR_BYTES)).await.unwrap();
    // Upload plus the row write.
    assert_eq!(counting.calls(), 2);
}

#[tokio::test]
async fn short_username_makes_zero_calls() {
    let backend = start_backend().await;
    let session = backend.signed_in("asha@example.com").await;
    let counting = Arc::new(Counting::new(backend.client.clone()));
    let mut controller = ProfileController::new(
        session,
        counting.clone(),
        Arc::new(NotificationCenter::new()),
    );

    controller.form_mut().set_username("ab");
    controller.form_mut().set_full_name("Asha Rao");
    let err = controller.submit().await.unwrap_err();

    assert!(matches!(err, ProfileError::Validation(_)));
    assert_eq!(counting.calls(), 0);
}

#[tokio::test]
async fn foreign_identity_has_no_visible_row() {
    let backend = start_backend().await;
    let session = backend.sign_up("asha@example.com").await;

    let row = backend
        .client
        .fetch_profile(&session, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(row, None);
}

#[tokio::test]
async fn remote_messages_reach_the_notification() {
    let backend = start_backend().await;
    let asha = backend.signed_in("asha@example.com").await;
    let ravi = backend.signed_in("ravi@example.com").await;
    let notes = Arc::new(NotificationCenter::new());

    let mut first = ProfileController::new(asha, backend.client.clone(), notes.clone());
    first
        .update_profile(ProfileFormValues {
            username: Some("kisan".into()),
            full_name: None,
        })
        .await
        .unwrap();

    let mut second = ProfileController::new(ravi, backend.client.clone(), notes.clone());
    let err = second
        .update_profile(ProfileFormValues {
            username: Some("kisan".into()),
            full_name: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProfileError::Backend(BackendError::Api { status: 409, .. })
    ));
    let note = notes.last().unwrap();
    assert_eq!(note.title, "Error updating profile");
    assert_eq!(
        note.description,
        "duplicate key value violates unique constraint \"profiles_username_key\""
    );
}

#[tokio::test]
async fn concurrent_details_and_avatar_writes_both_survive() {
    let backend = start_backend().await;
    let session = backend.signed_in("asha@example.com").await;
    let notes = Arc::new(NotificationCenter::new());
    let mut controller =
        ProfileController::new(session.clone(), backend.client.clone(), notes.clone());
    let uploader = AvatarUploader::new(
        session.clone(),
        backend.client.clone(),
        backend.client.clone(),
        notes,
        uploads(),
    );
    let identity = session.identity();
    assert!(matches!(
        controller.on_identity_change(identity.as_ref()).await,
        LoadOutcome::Loaded(_)
    ));

    let (details, avatar) = tokio::join!(
        controller.update_profile(ProfileFormValues {
            username: Some("asharao".into()),
            full_name: Some("Asha Rao".into()),
        }),
        uploader.upload(png(64 * 1024)),
    );
    details.unwrap();
    let avatar = avatar.unwrap();

    let current = session.current().await.unwrap();
    let row = backend
        .client
        .fetch_profile(&current, current.user_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.username.as_deref(), Some("asharao"));
    assert_eq!(row.full_name.as_deref(), Some("Asha Rao"));
    assert_eq!(row.avatar_url.as_deref(), Some(avatar.avatar_url.as_str()));

    let local = controller.profile().unwrap();
    assert_eq!(local.username.as_deref(), Some("asharao"));
}
