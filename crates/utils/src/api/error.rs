use serde::{Deserialize, Serialize};

/// Error body returned by the hosted backend.
///
/// The row, storage and auth services each use a slightly different shape,
/// so every known message field is optional and [`ApiErrorBody::message`]
/// picks the first one present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<serde_json::Value>,
}

impl ApiErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn message(&self) -> Option<&str> {
        [
            &self.message,
            &self.error_description,
            &self.msg,
            &self.error,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .find(|m| !m.trim().is_empty())
    }
}
