use chrono::Utc;
use uuid::Uuid;

use crate::models::ImageKind;

/// Generates a new unique object key for an image of the given kind.
pub fn new_object_key(kind: ImageKind) -> String {
    format!(
        "image-{}-{}.{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().to_simple(),
        kind.as_file_extension(),
    )
}
