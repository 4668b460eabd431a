use chrono::{DateTime, Utc};
use hashbrown::HashSet;
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageKind {
    /// Resolves the kind from a subtype of the `image/*` mime type.
    ///
    /// `jpg` is accepted as an alias of `jpeg` as some clients send it.
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn as_content_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    pub fn as_file_extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }

    /// Whether the image can be decoded, downscaled and encoded again
    /// without losing information the client cares about.
    ///
    /// Gifs are skipped to keep animations intact.
    pub fn is_resizable(&self) -> bool {
        matches!(self, Self::Png | Self::Jpeg)
    }
}

impl From<ImageKind> for image::ImageFormat {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
            ImageKind::Gif => image::ImageFormat::Gif,
            ImageKind::Webp => image::ImageFormat::WebP,
        }
    }
}

#[derive(Object, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// A reference to the user who wrote the comment.
    pub author: String,

    /// The comment body.
    pub text: String,

    pub created_at: DateTime<Utc>,
}

#[derive(Object, Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// The unique id generated for the image at upload time.
    pub image_id: Uuid,

    /// The album owning this image.
    ///
    /// This never changes once the record is created.
    pub album_id: String,

    /// The opaque reference returned by the object store.
    pub object_ref: String,

    pub filename: String,
    pub content_type: String,

    /// The size of the stored object in bytes.
    pub size: u64,

    pub tags: Vec<String>,
    pub person: Option<String>,
    pub is_favorite: bool,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    #[inline]
    pub fn key(&self) -> ImageKey {
        ImageKey {
            album_id: self.album_id.clone(),
            image_id: self.image_id,
        }
    }
}

/// The compound key every image lookup is scoped by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub album_id: String,
    pub image_id: Uuid,
}

/// A mutation applied to a single metadata record.
#[derive(Debug, Clone)]
pub enum ImagePatch {
    /// Flips the favorite flag against the stored value.
    ToggleFavorite,
    AppendComment(Comment),
    Metadata {
        tags: Option<Vec<String>>,

        /// `Some(None)` clears the person field.
        person: Option<Option<String>>,
    },
}

impl ImagePatch {
    pub fn apply(&self, record: &mut ImageRecord) {
        match self {
            Self::ToggleFavorite => record.is_favorite = !record.is_favorite,
            Self::AppendComment(comment) => record.comments.push(comment.clone()),
            Self::Metadata { tags, person } => {
                if let Some(tags) = tags {
                    record.tags = tags.clone();
                }

                if let Some(person) = person {
                    record.person = person.clone();
                }
            },
        }
    }
}

/// Selects the records removed by a bulk deletion.
///
/// Deletions always name the exact records they were planned against so
/// a record created in the meantime is never removed along with them.
#[derive(Debug, Clone)]
pub enum RecordFilter {
    ByKeys(HashSet<ImageKey>),
}

impl RecordFilter {
    pub fn matches(&self, record: &ImageRecord) -> bool {
        match self {
            Self::ByKeys(keys) => keys.contains(&record.key()),
        }
    }
}

/// A file received from the client along with what it claims to be.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub content_type: String,
    pub data: bytes::Bytes,
}

#[derive(Object, Debug, Clone, PartialEq)]
pub struct SingleDeletion {
    pub deleted: bool,

    /// The object store error, if removing the underlying object failed.
    pub storage_error: Option<String>,
}

#[derive(Object, Debug, Clone, PartialEq)]
pub struct BulkDeletion {
    pub deleted_count: u64,
    pub errors: Vec<String>,
}

#[derive(Object, Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub cleaned_count: u64,
    pub errors: Vec<String>,
}
