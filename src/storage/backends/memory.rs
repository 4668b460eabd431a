use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use crate::models::ImageKind;
use crate::utils::new_object_key;
use crate::StorageBackend;

/// A process local object store.
///
/// Everything is lost when the process exits, this is intended for
/// development and testing.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<String, Bytes>>,
}

#[cfg(test)]
impl MemoryBackend {
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn contains(&self, reference: &str) -> bool {
        self.objects.read().await.contains_key(reference)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn store(&self, kind: ImageKind, data: Bytes) -> anyhow::Result<String> {
        let reference = new_object_key(kind);

        debug!("Storing image in memory @ {}", &reference);
        self.objects.write().await.insert(reference.clone(), data);

        Ok(reference)
    }

    async fn fetch(&self, reference: &str) -> anyhow::Result<Option<Bytes>> {
        Ok(self.objects.read().await.get(reference).cloned())
    }

    async fn delete(&self, reference: &str) -> anyhow::Result<()> {
        debug!("Purging image in memory @ {}", reference);
        self.objects.write().await.remove(reference);

        Ok(())
    }
}
