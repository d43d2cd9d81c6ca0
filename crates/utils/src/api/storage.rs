use serde::{Deserialize, Serialize};

/// Bucket holding profile pictures.
pub const AVATAR_BUCKET: &str = "avatars";

/// Header carrying the overwrite policy of an object upload.
pub const UPSERT_HEADER: &str = "x-upsert";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadObjectResponse {
    #[serde(rename = "Key")]
    pub key: String,
}

/// Object path of a public object relative to the storage API root.
pub fn public_object_path(bucket: &str, path: &str) -> String {
    format!("object/public/{bucket}/{path}")
}
