use async_trait::async_trait;
use futures::future::join_all;
use hashbrown::HashSet;
use uuid::Uuid;

use crate::models::{ImagePatch, ImageRecord, RecordFilter};

/// The durable store of image records.
///
/// Records are always addressed by both their image and album id.
#[async_trait]
pub trait MetadataRepository: Sync + Send + 'static {
    async fn insert(&self, record: ImageRecord) -> anyhow::Result<()>;

    /// Every record in the repository.
    async fn find_all(&self) -> anyhow::Result<Vec<ImageRecord>>;

    async fn find_by_album(&self, album_id: &str) -> anyhow::Result<Vec<ImageRecord>>;

    async fn find_one(&self, image_id: Uuid, album_id: &str) -> anyhow::Result<Option<ImageRecord>>;

    /// Applies the patch, returning the updated record or `None` if the
    /// record does not exist.
    ///
    /// A record deleted concurrently is never recreated by an update.
    async fn update_one(
        &self,
        image_id: Uuid,
        album_id: &str,
        patch: ImagePatch,
    ) -> anyhow::Result<Option<ImageRecord>>;

    /// Deletes a single record returning how many records were removed.
    async fn delete_one(&self, image_id: Uuid, album_id: &str) -> anyhow::Result<u64>;

    /// Deletes every record matching the filter returning how many were removed.
    async fn delete_many(&self, filter: RecordFilter) -> anyhow::Result<u64>;
}

/// Answers whether an album still exists.
///
/// Albums themselves are owned by another service, this is the only
/// question asked of it.
#[async_trait]
pub trait AlbumDirectory: Sync + Send + 'static {
    async fn exists(&self, album_id: &str) -> anyhow::Result<bool>;

    /// Resolves which of the given albums exist, checking each id once.
    async fn existing(&self, album_ids: &[String]) -> anyhow::Result<HashSet<String>> {
        let checks = album_ids.iter().map(|album_id| async move {
            self.exists(album_id)
                .await
                .map(|exists| (album_id, exists))
        });

        let mut found = HashSet::new();
        for result in join_all(checks).await {
            let (album_id, exists) = result?;
            if exists {
                found.insert(album_id.clone());
            }
        }

        Ok(found)
    }
}
