use async_trait::async_trait;
use bytes::Bytes;

use crate::models::ImageKind;

/// A remote (or local) store holding the raw image data.
///
/// Every operation may fail independently of the metadata repository,
/// callers decide how fatal a failure is.
#[async_trait]
pub trait StorageBackend: Sync + Send + 'static {
    /// Stores the data under a newly generated key, returning the
    /// opaque reference used to access it later.
    async fn store(&self, kind: ImageKind, data: Bytes) -> anyhow::Result<String>;

    /// Fetches the data for the given reference or `None` if the object
    /// does not exist.
    async fn fetch(&self, reference: &str) -> anyhow::Result<Option<Bytes>>;

    /// Deletes the object with the given reference.
    ///
    /// Deleting an object which does not exist is not an error.
    async fn delete(&self, reference: &str) -> anyhow::Result<()>;
}
