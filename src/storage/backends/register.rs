use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::StorageBackend;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendConfigs {
    Memory,
    FileSystem {
        directory: PathBuf,
    },
    S3 {
        name: String,
        region: String,
        endpoint: String,
        access_key: String,
        secret_key: String,

        #[serde(default)]
        /// An optional folder every key is stored under.
        prefix: Option<String>,
    },
}

impl BackendConfigs {
    pub async fn connect(&self) -> anyhow::Result<Arc<dyn StorageBackend>> {
        match self {
            Self::Memory => Ok(Arc::new(super::memory::MemoryBackend::default())),
            Self::FileSystem { directory } => {
                tokio::fs::create_dir_all(directory).await?;
                Ok(Arc::new(super::filesystem::FileSystemBackend::new(directory.clone())))
            },
            Self::S3 {
                name,
                region,
                endpoint,
                access_key,
                secret_key,
                prefix,
            } => {
                let backend = super::blob_storage::BlobStorageBackend::new(
                    name.clone(),
                    region.clone(),
                    endpoint.clone(),
                    access_key.clone(),
                    secret_key.clone(),
                    prefix.clone(),
                )?;

                Ok(Arc::new(backend))
            },
        }
    }
}
