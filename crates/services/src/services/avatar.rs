//! Avatar upload: validate the picked image, store it, resolve its public
//! address and point the profile row at it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, instrument};
use utils::api::{profile::ProfilePatch, storage::AVATAR_BUCKET};

use super::{
    backend::{BackendError, BlobStore, ProfileStore, ProgressSink, UploadObject},
    config::BackendConfig,
    notifications::{Notification, Notifier},
    session::SessionHandle,
};

pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;
pub const ALLOWED_AVATAR_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Share of the progress bar covered by the byte transfer.
const TRANSFER_CEILING: u8 = 90;
const RESOLVED_MILESTONE: u8 = 95;

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("an avatar upload is already in progress")]
    Busy,
    #[error("unsupported image type `{0}`")]
    UnsupportedType(String),
    #[error("image is {size} bytes, the limit is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("upload failed: {0}")]
    Upload(BackendError),
    #[error("could not resolve the public address: {0}")]
    Resolve(BackendError),
    #[error("could not save the avatar address: {0}")]
    Write(BackendError),
}

impl AvatarError {
    fn backend(&self) -> Option<&BackendError> {
        match self {
            Self::Upload(e) | Self::Resolve(e) | Self::Write(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Work is happening but the transport is not reporting bytes.
    Indeterminate,
    Percent(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Idle,
    Validating,
    Uploading,
    Resolving,
    Writing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStatus {
    pub stage: UploadStage,
    pub busy: bool,
    pub progress: Progress,
}

impl UploadStatus {
    pub const IDLE: Self = Self {
        stage: UploadStage::Idle,
        busy: false,
        progress: Progress::Percent(0),
    };

    fn at(stage: UploadStage, progress: Progress) -> Self {
        Self {
            stage,
            busy: true,
            progress,
        }
    }
}

/// An image picked by the user.
#[derive(Debug, Clone)]
pub struct AvatarFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl AvatarFile {
    /// Text after the last `.` of the name, or the whole name.
    pub fn extension(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAvatar {
    pub path: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub bucket: String,
    pub max_bytes: usize,
    pub allowed_types: Vec<String>,
    /// How long the finished state stays visible before going idle.
    pub settle_delay: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            bucket: AVATAR_BUCKET.to_string(),
            max_bytes: MAX_AVATAR_BYTES,
            allowed_types: ALLOWED_AVATAR_TYPES.iter().map(|t| t.to_string()).collect(),
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl UploaderConfig {
    /// Defaults, with the bucket taken from the backend connection settings.
    pub fn for_backend(backend: &BackendConfig) -> Self {
        Self {
            bucket: backend.avatar_bucket.clone(),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct AvatarUploader {
    session: SessionHandle,
    blobs: Arc<dyn BlobStore>,
    profiles: Arc<dyn ProfileStore>,
    notifier: Arc<dyn Notifier>,
    config: Arc<UploaderConfig>,
    status: Arc<watch::Sender<UploadStatus>>,
    busy: Arc<AtomicBool>,
}

impl AvatarUploader {
    pub fn new(
        session: SessionHandle,
        blobs: Arc<dyn BlobStore>,
        profiles: Arc<dyn ProfileStore>,
        notifier: Arc<dyn Notifier>,
        config: UploaderConfig,
    ) -> Self {
        let (status, _) = watch::channel(UploadStatus::IDLE);
        Self {
            session,
            blobs,
            profiles,
            notifier,
            config: Arc::new(config),
            status: Arc::new(status),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> UploadStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadStatus> {
        self.status.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Runs one upload from validation to the profile write.
    ///
    /// Validation failures never touch the network. Whatever the outcome, the
    /// busy flag and progress return to idle after the settle delay.
    pub async fn upload(&self, file: AvatarFile) -> Result<UploadedAvatar, AvatarError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AvatarError::Busy);
        }
        let in_flight = InFlight {
            busy: Arc::clone(&self.busy),
            status: Arc::clone(&self.status),
            armed: true,
        };

        let result = self.run(file).await;
        if let Err(err) = &result {
            self.report(err);
        }
        in_flight.settle(self.config.settle_delay);
        result
    }

    #[instrument(name = "avatar.upload", skip_all, fields(file = %file.name, bytes = file.bytes.len()))]
    async fn run(&self, file: AvatarFile) -> Result<UploadedAvatar, AvatarError> {
        let session = self
            .session
            .current()
            .await
            .ok_or(AvatarError::NotSignedIn)?;
        let user_id = session.user_id();

        self.set(UploadStage::Validating, Progress::Percent(0));
        self.validate(&file)?;

        let path = format!(
            "{user_id}/avatar-{}.{}",
            Utc::now().timestamp_millis(),
            file.extension()
        );

        self.set(UploadStage::Uploading, Progress::Indeterminate);
        let progress = Arc::new(TransferProgress {
            status: Arc::clone(&self.status),
        });
        self.blobs
            .upload(
                &session,
                &self.config.bucket,
                &path,
                UploadObject {
                    bytes: file.bytes,
                    content_type: file.content_type,
                },
                true,
                progress,
            )
            .await
            .map_err(AvatarError::Upload)?;

        let avatar_url = self
            .blobs
            .public_url(&self.config.bucket, &path)
            .map_err(AvatarError::Resolve)?
            .to_string();
        self.set(
            UploadStage::Resolving,
            Progress::Percent(RESOLVED_MILESTONE),
        );

        self.set(
            UploadStage::Writing,
            Progress::Percent(RESOLVED_MILESTONE),
        );
        {
            let _writer = self.session.lock_profile_row(user_id).await;
            self.profiles
                .update_profile(
                    &session,
                    user_id,
                    &ProfilePatch::avatar(avatar_url.clone(), Utc::now()),
                )
                .await
                .map_err(AvatarError::Write)?;
        }

        self.set(UploadStage::Done, Progress::Percent(100));
        info!(%user_id, %path, "avatar updated");
        self.notifier.notify(Notification::info(
            "Avatar updated",
            "Your profile picture has been updated successfully.",
        ));
        Ok(UploadedAvatar { path, avatar_url })
    }

    fn validate(&self, file: &AvatarFile) -> Result<(), AvatarError> {
        if !self
            .config
            .allowed_types
            .iter()
            .any(|t| t == &file.content_type)
        {
            return Err(AvatarError::UnsupportedType(file.content_type.clone()));
        }
        if file.bytes.len() > self.config.max_bytes {
            return Err(AvatarError::TooLarge {
                size: file.bytes.len(),
                max: self.config.max_bytes,
            });
        }
        Ok(())
    }

    fn report(&self, err: &AvatarError) {
        let note = match err {
            AvatarError::UnsupportedType(_) => Notification::error(
                "Invalid file type",
                "Please upload a JPG, PNG, WEBP, or GIF image.",
            ),
            AvatarError::TooLarge { .. } => Notification::error(
                "File too large",
                "Please upload an image smaller than 5MB.",
            ),
            AvatarError::NotSignedIn | AvatarError::Busy => return,
            other => {
                error!(error = %other, "Error uploading avatar");
                let description = other
                    .backend()
                    .map(BackendError::user_message)
                    .unwrap_or_default();
                Notification::error("Error updating avatar", description)
            }
        };
        self.notifier.notify(note);
    }

    fn set(&self, stage: UploadStage, progress: Progress) {
        self.status.send_replace(UploadStatus::at(stage, progress));
    }
}

/// Maps measured transfer bytes onto the first 90% of the bar.
struct TransferProgress {
    status: Arc<watch::Sender<UploadStatus>>,
}

impl ProgressSink for TransferProgress {
    fn bytes_sent(&self, sent: u64, total: u64) {
        if total == 0 {
            return;
        }
        let pct = (sent.min(total) * u64::from(TRANSFER_CEILING) / total) as u8;
        self.status.send_if_modified(|status| {
            let ahead = match status.progress {
                Progress::Percent(current) => pct > current,
                Progress::Indeterminate => true,
            };
            if status.stage == UploadStage::Uploading && ahead {
                status.progress = Progress::Percent(pct);
                true
            } else {
                false
            }
        });
    }
}

/// Returns the uploader to idle. Dropping it early (an abandoned upload)
/// resets immediately.
struct InFlight {
    busy: Arc<AtomicBool>,
    status: Arc<watch::Sender<UploadStatus>>,
    armed: bool,
}

impl InFlight {
    fn settle(mut self, delay: Duration) {
        self.armed = false;
        let busy = Arc::clone(&self.busy);
        let status = Arc::clone(&self.status);
        if delay.is_zero() {
            reset(&busy, &status);
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            reset(&busy, &status);
        });
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.armed {
            reset(&self.busy, &self.status);
        }
    }
}

fn reset(busy: &AtomicBool, status: &watch::Sender<UploadStatus>) {
    status.send_replace(UploadStatus::IDLE);
    busy.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use utils::api::profile::ProfileRow;
    use uuid::Uuid;

    use super::*;
    use crate::services::{
        memory::{InMemoryBackend, Operation},
        notifications::NotificationCenter,
    };

    struct Harness {
        backend: InMemoryBackend,
        notes: Arc<NotificationCenter>,
        uploader: AvatarUploader,
        user_id: Uuid,
    }

    async fn harness(settle_delay: Duration) -> Harness {
        let backend = InMemoryBackend::new();
        let notes = Arc::new(NotificationCenter::new());
        let user_id = backend.register("asha@example.com", "secret1");
        let session = SessionHandle::signed_in(backend.session_for(user_id));
        let uploader = AvatarUploader::new(
            session,
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            notes.clone(),
            UploaderConfig {
                settle_delay,
                ..UploaderConfig::default()
            },
        );
        Harness {
            backend,
            notes,
            uploader,
            user_id,
        }
    }

    fn png(len: usize) -> AvatarFile {
        AvatarFile {
            name: "me.PNG".into(),
            content_type: "image/png".into(),
            bytes: Bytes::from(vec![0x89; len]),
        }
    }

    #[test]
    fn extension_is_text_after_last_dot() {
        let mut file = png(1);
        assert_eq!(file.extension(), "PNG");
        file.name = "farm.photo.jpeg".into();
        assert_eq!(file.extension(), "jpeg");
        file.name = "avatar".into();
        assert_eq!(file.extension(), "avatar");
    }

    #[tokio::test]
    async fn stored_bytes_are_reachable_from_the_profile() {
        let h = harness(Duration::ZERO).await;
        let file = png(2048);

        let uploaded = h.uploader.upload(file.clone()).await.unwrap();

        assert!(uploaded.path.starts_with(&format!("{}/avatar-", h.user_id)));
        assert!(uploaded.path.ends_with(".PNG"));
        let record = h.backend.profile(h.user_id).unwrap();
        assert_eq!(record.avatar_url.as_deref(), Some(uploaded.avatar_url.as_str()));
        assert!(record.updated_at.is_some());

        let url = url::Url::parse(&uploaded.avatar_url).unwrap();
        assert_eq!(h.backend.fetch_public(&url), Some(file.bytes));
        assert_eq!(
            h.backend.object("avatars", &uploaded.path).unwrap().content_type,
            "image/png"
        );
        assert_eq!(h.notes.last().unwrap().title, "Avatar updated");
        assert_eq!(h.uploader.status(), UploadStatus::IDLE);
    }

    #[tokio::test]
    async fn disallowed_type_is_rejected_before_the_network() {
        let h = harness(Duration::ZERO).await;
        let file = AvatarFile {
            name: "scan.bmp".into(),
            content_type: "image/bmp".into(),
            bytes: Bytes::from_static(b"BM"),
        };

        let err = h.uploader.upload(file).await.unwrap_err();

        assert!(matches!(err, AvatarError::UnsupportedType(_)));
        assert_eq!(h.backend.total_calls(), 0);
        let note = h.notes.last().unwrap();
        assert_eq!(note.title, "Invalid file type");
        assert_eq!(note.description, "Please upload a JPG, PNG, WEBP, or GIF image.");
    }

    #[tokio::test]
    async fn size_limit_is_inclusive() {
        let h = harness(Duration::ZERO).await;

        let err = h.uploader.upload(png(MAX_AVATAR_BYTES + 1)).await.unwrap_err();
        assert!(matches!(err, AvatarError::TooLarge { .. }));
        assert_eq!(h.backend.total_calls(), 0);
        assert_eq!(h.notes.last().unwrap().title, "File too large");

        h.uploader.upload(png(MAX_AVATAR_BYTES)).await.unwrap();
        assert_eq!(h.backend.calls(Operation::Upload), 1);
    }

    #[tokio::test]
    async fn failed_write_keeps_the_prior_avatar() {
        let h = harness(Duration::ZERO).await;
        h.backend.seed_profile(
            h.user_id,
            ProfileRow {
                avatar_url: Some("http://backend.test/old.png".into()),
                ..ProfileRow::default()
            },
        );
        h.backend.fail_next(
            Operation::UpdateProfile,
            BackendError::Api {
                status: 403,
                message: "new row violates row-level security policy".into(),
            },
        );

        let err = h.uploader.upload(png(16)).await.unwrap_err();

        assert!(matches!(err, AvatarError::Write(_)));
        assert_eq!(
            h.backend.profile(h.user_id).unwrap().avatar_url.as_deref(),
            Some("http://backend.test/old.png")
        );
        let note = h.notes.last().unwrap();
        assert_eq!(note.title, "Error updating avatar");
        assert_eq!(note.description, "new row violates row-level security policy");
        assert!(!h.uploader.is_busy());
    }

    #[tokio::test]
    async fn failed_upload_skips_the_remaining_steps() {
        let h = harness(Duration::ZERO).await;
        h.backend
            .fail_next(Operation::Upload, BackendError::Transport("broken pipe".into()));

        assert!(matches!(
            h.uploader.upload(png(16)).await,
            Err(AvatarError::Upload(_))
        ));
        assert_eq!(h.backend.calls(Operation::UpdateProfile), 0);
        assert_eq!(h.notes.last().unwrap().description, "Please try again later.");
    }

    #[tokio::test]
    async fn second_upload_while_busy_is_rejected() {
        let h = harness(Duration::ZERO).await;
        h.backend
            .set_latency(Operation::Upload, Duration::from_millis(100));

        let first = {
            let uploader = h.uploader.clone();
            tokio::spawn(async move { uploader.upload(png(16)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.uploader.is_busy());
        assert_eq!(h.uploader.status().progress, Progress::Indeterminate);

        assert!(matches!(
            h.uploader.upload(png(16)).await,
            Err(AvatarError::Busy)
        ));
        first.await.unwrap().unwrap();
        assert_eq!(h.backend.calls(Operation::Upload), 1);
    }

    #[tokio::test]
    async fn finished_state_is_held_for_the_settle_delay() {
        let h = harness(Duration::from_millis(50)).await;
        let mut status = h.uploader.subscribe();

        h.uploader.upload(png(16)).await.unwrap();

        let done = *status.borrow_and_update();
        assert_eq!(done.stage, UploadStage::Done);
        assert_eq!(done.progress, Progress::Percent(100));
        assert!(h.uploader.is_busy());

        status.changed().await.unwrap();
        assert_eq!(*status.borrow(), UploadStatus::IDLE);
        assert!(!h.uploader.is_busy());
    }

    #[test]
    fn measured_bytes_fill_up_to_ninety_percent() {
        let (tx, _rx) = watch::channel(UploadStatus::at(
            UploadStage::Uploading,
            Progress::Indeterminate,
        ));
        let status = Arc::new(tx);
        let sink = TransferProgress {
            status: Arc::clone(&status),
        };

        sink.bytes_sent(5, 10);
        assert_eq!(status.borrow().progress, Progress::Percent(45));
        sink.bytes_sent(3, 10);
        assert_eq!(status.borrow().progress, Progress::Percent(45));
        sink.bytes_sent(10, 10);
        assert_eq!(status.borrow().progress, Progress::Percent(90));
    }

    #[tokio::test]
    async fn configured_bucket_receives_the_object() {
        let backend = InMemoryBackend::new();
        let user_id = backend.register("asha@example.com", "secret1");
        let mut connection = BackendConfig::new("http://backend.test", "anon").unwrap();
        connection.avatar_bucket = "farm-avatars".into();
        let uploader = AvatarUploader::new(
            SessionHandle::signed_in(backend.session_for(user_id)),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(NotificationCenter::new()),
            UploaderConfig {
                settle_delay: Duration::ZERO,
                ..UploaderConfig::for_backend(&connection)
            },
        );

        let uploaded = uploader.upload(png(128)).await.unwrap();

        assert!(backend.object("farm-avatars", &uploaded.path).is_some());
        assert!(backend.object(AVATAR_BUCKET, &uploaded.path).is_none());
    }
}
