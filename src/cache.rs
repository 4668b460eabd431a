use bytes::Bytes;
use moka::future::Cache;

/// A byte weighted cache of raw image data keyed by object reference.
///
/// Object references are never reused so entries cannot go stale, they
/// only need removing once the object is deleted.
#[derive(Clone)]
pub struct ImageCache(Option<Cache<String, Bytes>>);

impl ImageCache {
    /// Creates a new cache holding up to `size_mb` megabytes, `0` disables it.
    pub fn new(size_mb: u64) -> Self {
        if size_mb == 0 {
            return Self(None);
        }

        let cache = Cache::builder()
            .weigher(|_: &String, data: &Bytes| data.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(size_mb * 1024 * 1024)
            .build();

        Self(Some(cache))
    }

    #[inline]
    pub fn get(&self, reference: &str) -> Option<Bytes> {
        self.0.as_ref()?.get(&reference.to_string())
    }

    pub async fn set(&self, reference: &str, data: Bytes) {
        if let Some(cache) = self.0.as_ref() {
            cache.insert(reference.to_string(), data).await;
        }
    }

    pub async fn invalidate(&self, reference: &str) {
        if let Some(cache) = self.0.as_ref() {
            cache.invalidate(&reference.to_string()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_cache_stores_nothing() {
        let cache = ImageCache::new(0);
        cache.set("a", Bytes::from_static(b"data")).await;
        assert!(cache.get("a").is_none());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = ImageCache::new(1);
        cache.set("a", Bytes::from_static(b"data")).await;
        assert_eq!(cache.get("a"), Some(Bytes::from_static(b"data")));

        cache.invalidate("a").await;
        assert!(cache.get("a").is_none());
    }
}
