use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{ImageKey, ImagePatch, ImageRecord, RecordFilter};
use crate::repository::{AlbumDirectory, MetadataRepository};

/// A process local metadata repository.
#[derive(Default)]
pub struct MemoryRepository {
    records: RwLock<HashMap<ImageKey, ImageRecord>>,
}

#[async_trait]
impl MetadataRepository for MemoryRepository {
    async fn insert(&self, record: ImageRecord) -> anyhow::Result<()> {
        self.records.write().await.insert(record.key(), record);
        Ok(())
    }

    async fn find_all(&self) -> anyhow::Result<Vec<ImageRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn find_by_album(&self, album_id: &str) -> anyhow::Result<Vec<ImageRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|record| record.album_id == album_id)
            .cloned()
            .collect())
    }

    async fn find_one(&self, image_id: Uuid, album_id: &str) -> anyhow::Result<Option<ImageRecord>> {
        let key = ImageKey {
            album_id: album_id.to_string(),
            image_id,
        };

        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn update_one(
        &self,
        image_id: Uuid,
        album_id: &str,
        patch: ImagePatch,
    ) -> anyhow::Result<Option<ImageRecord>> {
        let key = ImageKey {
            album_id: album_id.to_string(),
            image_id,
        };

        let mut records = self.records.write().await;
        Ok(records.get_mut(&key).map(|record| {
            patch.apply(record);
            record.clone()
        }))
    }

    async fn delete_one(&self, image_id: Uuid, album_id: &str) -> anyhow::Result<u64> {
        let key = ImageKey {
            album_id: album_id.to_string(),
            image_id,
        };

        Ok(self.records.write().await.remove(&key).map(|_| 1).unwrap_or(0))
    }

    async fn delete_many(&self, filter: RecordFilter) -> anyhow::Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !filter.matches(record));

        Ok((before - records.len()) as u64)
    }
}

/// A process local set of existing albums.
#[derive(Default)]
pub struct MemoryAlbumDirectory {
    albums: RwLock<HashSet<String>>,
}

impl MemoryAlbumDirectory {
    pub fn with_albums(albums: impl IntoIterator<Item = String>) -> Self {
        Self {
            albums: RwLock::new(albums.into_iter().collect()),
        }
    }

    #[cfg(test)]
    pub async fn register(&self, album_id: &str) {
        self.albums.write().await.insert(album_id.to_string());
    }

    /// Removes the album without touching any of its images, the same
    /// as an album service deleting it out of band.
    #[cfg(test)]
    pub async fn remove(&self, album_id: &str) -> bool {
        self.albums.write().await.remove(album_id)
    }
}

#[async_trait]
impl AlbumDirectory for MemoryAlbumDirectory {
    async fn exists(&self, album_id: &str) -> anyhow::Result<bool> {
        Ok(self.albums.read().await.contains(album_id))
    }
}
