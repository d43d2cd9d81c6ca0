use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Default,
    Destructive,
}

/// A short toast shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub variant: Variant,
}

impl Notification {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: Variant::Default,
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: Variant::Destructive,
        }
    }

    pub fn is_error(&self) -> bool {
        self.variant == Variant::Destructive
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Keeps notifications until the UI drains them.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    pending: Mutex<Vec<Notification>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.lock())
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<Notification> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Notification>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Notifier for NotificationCenter {
    fn notify(&self, notification: Notification) {
        self.lock().push(notification);
    }
}

/// Writes notifications to the log. Used by the command-line front-end.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        let Notification {
            title,
            description,
            variant,
        } = notification;
        match variant {
            Variant::Default => tracing::info!("{title}: {description}"),
            Variant::Destructive => tracing::error!("{title}: {description}"),
        }
    }
}
