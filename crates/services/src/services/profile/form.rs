use std::future::Future;

use utils::api::profile::ProfileRow;

use crate::services::validation::{FieldErrors, min_chars};

pub const USERNAME_MIN_CHARS: usize = 3;
pub const FULL_NAME_MIN_CHARS: usize = 2;

pub const USERNAME_TOO_SHORT: &str = "Username must be at least 3 characters";
pub const FULL_NAME_TOO_SHORT: &str = "Full name must be at least 2 characters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProfileField {
    Username,
    FullName,
}

/// Values submitted from the personal-information form.
///
/// An absent field is neither validated nor written; a present empty string
/// is validated like any other value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFormValues {
    pub username: Option<String>,
    pub full_name: Option<String>,
}

impl ProfileFormValues {
    pub fn validate(&self) -> Result<(), FieldErrors<ProfileField>> {
        let mut errors = FieldErrors::new();
        if let Some(username) = &self.username
            && !min_chars(username, USERNAME_MIN_CHARS)
        {
            errors.add(ProfileField::Username, USERNAME_TOO_SHORT);
        }
        if let Some(full_name) = &self.full_name
            && !min_chars(full_name, FULL_NAME_MIN_CHARS)
        {
            errors.add(ProfileField::FullName, FULL_NAME_TOO_SHORT);
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone)]
pub struct ProfileForm {
    values: ProfileFormValues,
    errors: FieldErrors<ProfileField>,
}

impl Default for ProfileForm {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileForm {
    /// A form with blank fields.
    pub fn new() -> Self {
        Self {
            values: ProfileFormValues {
                username: Some(String::new()),
                full_name: Some(String::new()),
            },
            errors: FieldErrors::new(),
        }
    }

    /// Overwrites the field values from a loaded profile. `None` resets to
    /// blanks.
    pub fn set_defaults(&mut self, profile: Option<&ProfileRow>) {
        let profile = profile.cloned().unwrap_or_default();
        self.values = ProfileFormValues {
            username: Some(profile.username.unwrap_or_default()),
            full_name: Some(profile.full_name.unwrap_or_default()),
        };
        self.errors.clear();
    }

    pub fn set_username(&mut self, value: impl Into<String>) {
        self.values.username = Some(value.into());
    }

    pub fn set_full_name(&mut self, value: impl Into<String>) {
        self.values.full_name = Some(value.into());
    }

    pub fn values(&self) -> &ProfileFormValues {
        &self.values
    }

    pub fn errors(&self) -> &FieldErrors<ProfileField> {
        &self.errors
    }

    pub fn error(&self, field: ProfileField) -> Option<&str> {
        self.errors.get(field)
    }

    /// Validates the current values, recording per-field errors on failure.
    pub fn validated(&mut self) -> Result<ProfileFormValues, FieldErrors<ProfileField>> {
        match self.values.validate() {
            Ok(()) => {
                self.errors.clear();
                Ok(self.values.clone())
            }
            Err(errors) => {
                self.errors = errors.clone();
                Err(errors)
            }
        }
    }

    /// Runs `handler` with the validated values. The handler is never invoked
    /// when validation fails.
    pub async fn validate_and_submit<F, Fut>(
        &mut self,
        handler: F,
    ) -> Result<Fut::Output, FieldErrors<ProfileField>>
    where
        F: FnOnce(ProfileFormValues) -> Fut,
        Fut: Future,
    {
        let values = self.validated()?;
        Ok(handler(values).await)
    }
}
