use utils::api::profile::ProfileRow;

use crate::services::{avatar::Progress, session::Identity};

const SIGNED_OUT_INITIALS: &str = "U";
const HANDLE_PLACEHOLDER: &str = "username";

/// Fallback text for the avatar when there is no picture.
pub fn initials(identity: Option<&Identity>, profile: Option<&ProfileRow>) -> String {
    let Some(identity) = identity else {
        return SIGNED_OUT_INITIALS.to_string();
    };

    if let Some(full_name) = profile.and_then(|p| non_empty(p.full_name.as_deref())) {
        let parts: Vec<&str> = full_name.split_whitespace().collect();
        if let [first, .., last] = parts.as_slice() {
            return first
                .chars()
                .take(1)
                .chain(last.chars().take(1))
                .collect::<String>()
                .to_uppercase();
        }
        return leading(full_name);
    }

    if let Some(username) = profile.and_then(|p| non_empty(p.username.as_deref())) {
        return leading(username);
    }

    leading(identity.email.as_deref().unwrap_or_default())
}

fn leading(value: &str) -> String {
    value.chars().take(2).collect::<String>().to_uppercase()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadCaption {
    Uploading,
    Processing,
}

impl UploadCaption {
    pub fn for_progress(progress: Progress) -> Self {
        match progress {
            Progress::Percent(100) => Self::Processing,
            _ => Self::Uploading,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::Uploading => "Uploading...",
            Self::Processing => "Processing...",
        }
    }
}

/// Everything the profile card shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCard {
    pub display_name: String,
    pub handle: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub initials: String,
    /// Present only while an avatar upload is running.
    pub upload: Option<(Progress, UploadCaption)>,
}

impl ProfileCard {
    pub fn new(
        identity: Option<&Identity>,
        profile: Option<&ProfileRow>,
        upload: Option<Progress>,
    ) -> Self {
        let email = identity.and_then(|i| i.email.clone());
        let display_name = profile
            .and_then(|p| non_empty(p.full_name.as_deref()))
            .map(str::to_string)
            .or_else(|| email.clone())
            .unwrap_or_default();
        let handle = format!(
            "@{}",
            profile
                .and_then(|p| non_empty(p.username.as_deref()))
                .unwrap_or(HANDLE_PLACEHOLDER)
        );

        Self {
            display_name,
            handle,
            email,
            avatar_url: profile.and_then(|p| p.avatar_url.clone()),
            initials: initials(identity, profile),
            upload: upload.map(|p| (p, UploadCaption::for_progress(p))),
        }
    }
}
