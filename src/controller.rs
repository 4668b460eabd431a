use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use chrono::Utc;
use futures::{future, StreamExt};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::ImageCache;
use crate::config::{DimensionLimits, RuntimeConfig};
use crate::error::{LifecycleError, ALBUM_NOT_FOUND, IMAGE_NOT_FOUND, OBJECT_MISSING};
use crate::models::{
    BulkDeletion,
    Comment,
    FileUpload,
    ImagePatch,
    ImageRecord,
    Reconciliation,
    RecordFilter,
    SingleDeletion,
};
use crate::processor::resizer;
use crate::repository::{AlbumDirectory, MetadataRepository};
use crate::storage::StorageBackend;
use crate::validation::{self, ValidationError};

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// The optional metadata sent along with an upload or a metadata update.
///
/// Both fields are left raw so they go through the same validation
/// regardless of which route they came from.
#[derive(Debug, Default, Clone)]
pub struct MetadataInput {
    pub tags: Value,
    pub person: Value,
}

pub struct LifecycleSettings {
    pub max_upload_size: usize,
    pub max_dimensions: Option<DimensionLimits>,
    pub object_store_timeout: Duration,
    pub max_concurrency: usize,
    pub cache_size: u64,
}

impl From<&RuntimeConfig> for LifecycleSettings {
    fn from(cfg: &RuntimeConfig) -> Self {
        Self {
            max_upload_size: cfg.max_upload_size,
            max_dimensions: cfg.max_dimensions,
            object_store_timeout: cfg.object_store_timeout(),
            max_concurrency: cfg.max_concurrency,
            cache_size: cfg.cache_size,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_upload_size: validation::DEFAULT_MAX_UPLOAD_SIZE,
            max_dimensions: None,
            object_store_timeout: Duration::from_secs(30),
            max_concurrency: 16,
            cache_size: 0,
        }
    }
}

/// Keeps the object store and the metadata repository consistent.
///
/// The two stores cannot be updated atomically, so every operation is
/// ordered such that the only inconsistency a failure can leave behind
/// is an object without a record. Records whose album has disappeared
/// are repaired by `reconcile_orphans`.
pub struct ImageLifecycleManager {
    storage: Arc<dyn StorageBackend>,
    repository: Arc<dyn MetadataRepository>,
    albums: Arc<dyn AlbumDirectory>,
    cache: ImageCache,
    settings: LifecycleSettings,
}

impl ImageLifecycleManager {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        repository: Arc<dyn MetadataRepository>,
        albums: Arc<dyn AlbumDirectory>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            cache: ImageCache::new(settings.cache_size),
            storage,
            repository,
            albums,
            settings,
        }
    }

    #[inline]
    pub fn max_upload_size(&self) -> usize {
        self.settings.max_upload_size
    }

    /// Stores the image data and then creates its record.
    ///
    /// The object is always written first, if the process dies between
    /// the two writes only an invisible object is left behind.
    #[instrument(skip(self, file, metadata))]
    pub async fn upload(
        &self,
        album_id: &str,
        file: Option<FileUpload>,
        metadata: MetadataInput,
    ) -> Result<ImageRecord> {
        let kind = validation::validate_file(file.as_ref(), self.settings.max_upload_size)?;
        let tags = validation::parse_tags(&metadata.tags)?.unwrap_or_default();
        let person = validation::parse_person(&metadata.person)?.flatten();

        // Validation has already rejected a missing file.
        let file = file.ok_or(ValidationError::MissingFile)?;

        self.ensure_album(album_id).await?;

        let data = match self.settings.max_dimensions {
            Some(limits) => resizer::fit_within_async(limits, kind, file.data)
                .await
                .map_err(|e| {
                    debug!("Failed to downscale upload: {:?}", e);
                    ValidationError::CorruptImage
                })?,
            None => file.data,
        };

        let size = data.len() as u64;
        let object_ref = self
            .with_timeout(self.storage.store(kind, data))
            .await
            .map_err(|e| {
                error!("Failed to store image for album {}: {:?}", album_id, e);
                LifecycleError::ObjectStore(e.to_string())
            })?;

        let record = ImageRecord {
            image_id: Uuid::new_v4(),
            album_id: album_id.to_string(),
            object_ref,
            filename: file.filename,
            content_type: kind.as_content_type().to_string(),
            size,
            tags,
            person,
            is_favorite: false,
            comments: vec![],
            created_at: Utc::now(),
        };

        if let Err(e) = self.repository.insert(record.clone()).await {
            error!("Failed to persist record for image {}: {:?}", record.image_id, e);
            if let Err(cleanup) = self.delete_object(&record.object_ref).await {
                warn!(
                    "Failed to clean up object {} after failed insert: {}",
                    &record.object_ref, cleanup,
                );
            }
            return Err(LifecycleError::repository(e));
        }

        info!("Uploaded {} image {} to album {}", kind.as_ref(), record.image_id, album_id);
        Ok(record)
    }

    /// All images in the album, newest first.
    pub async fn list_images(&self, album_id: &str) -> Result<Vec<ImageRecord>> {
        self.ensure_album(album_id).await?;

        let mut records = self
            .repository
            .find_by_album(album_id)
            .await
            .map_err(LifecycleError::repository)?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(records)
    }

    pub async fn list_favorites(&self, album_id: &str) -> Result<Vec<ImageRecord>> {
        let mut records = self.list_images(album_id).await?;
        records.retain(|record| record.is_favorite);
        Ok(records)
    }

    /// Fetches the record and raw data of an image.
    ///
    /// A record whose object has gone missing is reported rather than
    /// served as an empty body.
    pub async fn fetch_image(&self, image_id: Uuid, album_id: &str) -> Result<(ImageRecord, Bytes)> {
        let record = self.find_image(image_id, album_id).await?;

        if let Some(data) = self.cache.get(&record.object_ref) {
            return Ok((record, data));
        }

        let data = self
            .with_timeout(self.storage.fetch(&record.object_ref))
            .await
            .map_err(|e| LifecycleError::ObjectStore(e.to_string()))?;

        match data {
            Some(data) => {
                self.cache.set(&record.object_ref, data.clone()).await;
                Ok((record, data))
            },
            None => {
                warn!(
                    "Image {} references missing object {}",
                    record.image_id, &record.object_ref,
                );
                Err(LifecycleError::NotFound(OBJECT_MISSING))
            },
        }
    }

    pub async fn toggle_favorite(&self, image_id: Uuid, album_id: &str) -> Result<ImageRecord> {
        self.apply(image_id, album_id, ImagePatch::ToggleFavorite).await
    }

    pub async fn add_comment(
        &self,
        image_id: Uuid,
        album_id: &str,
        author: &str,
        text: &str,
    ) -> Result<ImageRecord> {
        let text = validation::validate_comment(text)?;

        let comment = Comment {
            author: author.to_string(),
            text,
            created_at: Utc::now(),
        };

        self.apply(image_id, album_id, ImagePatch::AppendComment(comment))
            .await
    }

    /// Replaces the tags and/or person of an image using the same rules
    /// as upload. Fields left out are unchanged.
    pub async fn update_metadata(
        &self,
        image_id: Uuid,
        album_id: &str,
        metadata: MetadataInput,
    ) -> Result<ImageRecord> {
        let tags = validation::parse_tags(&metadata.tags)?;
        let person = validation::parse_person(&metadata.person)?;

        self.apply(image_id, album_id, ImagePatch::Metadata { tags, person })
            .await
    }

    /// Deletes a single image.
    ///
    /// The record is removed even if the object could not be, its
    /// absence is what clients observe. The object store error is
    /// returned alongside for visibility.
    #[instrument(skip(self))]
    pub async fn delete_single(&self, image_id: Uuid, album_id: &str) -> Result<SingleDeletion> {
        let record = self.find_image(image_id, album_id).await?;

        let storage_error = match self.delete_object(&record.object_ref).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to delete image {} from object store: {}", image_id, e);
                Some(e.to_string())
            },
        };

        let removed = self
            .repository
            .delete_one(image_id, album_id)
            .await
            .map_err(LifecycleError::repository)?;

        Ok(SingleDeletion {
            deleted: removed > 0,
            storage_error,
        })
    }

    /// Deletes every image in the album.
    ///
    /// All object deletions are attempted before the records are removed
    /// in bulk, object store failures are collected rather than aborting.
    #[instrument(skip(self))]
    pub async fn delete_all_for_album(&self, album_id: &str) -> Result<BulkDeletion> {
        let records = self
            .repository
            .find_by_album(album_id)
            .await
            .map_err(LifecycleError::repository)?;

        if records.is_empty() {
            return Ok(BulkDeletion {
                deleted_count: 0,
                errors: vec![],
            });
        }

        let keys = records.iter().map(ImageRecord::key).collect();
        let errors = self.purge_objects(records, "image").await;

        let deleted_count = self
            .repository
            .delete_many(RecordFilter::ByKeys(keys))
            .await
            .map_err(LifecycleError::repository)?;

        info!("Deleted {} images from album {}", deleted_count, album_id);
        Ok(BulkDeletion {
            deleted_count,
            errors,
        })
    }

    /// Removes every record (and its object) whose album no longer exists.
    ///
    /// Album existence is resolved once per distinct album.
    #[instrument(skip(self))]
    pub async fn reconcile_orphans(&self) -> Result<Reconciliation> {
        let records = self
            .repository
            .find_all()
            .await
            .map_err(LifecycleError::repository)?;

        let mut album_ids: Vec<String> = records.iter().map(|r| r.album_id.clone()).collect();
        album_ids.sort_unstable();
        album_ids.dedup();

        let existing = self
            .albums
            .existing(&album_ids)
            .await
            .map_err(LifecycleError::repository)?;

        let orphaned: Vec<ImageRecord> = records
            .into_iter()
            .filter(|record| !existing.contains(&record.album_id))
            .collect();

        if orphaned.is_empty() {
            return Ok(Reconciliation {
                cleaned_count: 0,
                errors: vec![],
            });
        }

        let keys = orphaned.iter().map(ImageRecord::key).collect();
        let errors = self.purge_objects(orphaned, "orphaned image").await;

        let cleaned_count = self
            .repository
            .delete_many(RecordFilter::ByKeys(keys))
            .await
            .map_err(LifecycleError::repository)?;

        info!("Cleaned up {} orphaned images", cleaned_count);
        Ok(Reconciliation {
            cleaned_count,
            errors,
        })
    }

    /// Deletes the objects of every record, waiting for every attempt to
    /// settle and returning the failures.
    async fn purge_objects(&self, records: Vec<ImageRecord>, label: &str) -> Vec<String> {
        futures::stream::iter(records)
            .map(|record| async move {
                let result = self.delete_object(&record.object_ref).await;
                (record, result)
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .filter_map(|(record, result)| {
                let failure = result.err().map(|e| {
                    let msg = format!(
                        "Failed to delete {} {} from object store: {}",
                        label, record.image_id, e,
                    );
                    warn!("{}", &msg);
                    msg
                });
                future::ready(failure)
            })
            .collect()
            .await
    }

    async fn delete_object(&self, reference: &str) -> anyhow::Result<()> {
        self.cache.invalidate(reference).await;
        self.with_timeout(self.storage.delete(reference)).await
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let timeout = self.settings.object_store_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("object store call timed out after {:?}", timeout)),
        }
    }

    async fn apply(&self, image_id: Uuid, album_id: &str, patch: ImagePatch) -> Result<ImageRecord> {
        self.repository
            .update_one(image_id, album_id, patch)
            .await
            .map_err(LifecycleError::repository)?
            .ok_or(LifecycleError::NotFound(IMAGE_NOT_FOUND))
    }

    async fn find_image(&self, image_id: Uuid, album_id: &str) -> Result<ImageRecord> {
        self.repository
            .find_one(image_id, album_id)
            .await
            .map_err(LifecycleError::repository)?
            .ok_or(LifecycleError::NotFound(IMAGE_NOT_FOUND))
    }

    async fn ensure_album(&self, album_id: &str) -> Result<()> {
        let exists = self
            .albums
            .exists(album_id)
            .await
            .map_err(LifecycleError::repository)?;

        if exists {
            Ok(())
        } else {
            Err(LifecycleError::NotFound(ALBUM_NOT_FOUND))
        }
    }
}
