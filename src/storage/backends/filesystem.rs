use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;

use crate::models::ImageKind;
use crate::utils::new_object_key;
use crate::StorageBackend;

pub struct FileSystemBackend {
    directory: PathBuf,
}

impl FileSystemBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self { directory: dir }
    }

    /// Resolves a reference to a path inside the storage directory.
    ///
    /// References are plain file names, anything that could walk out of
    /// the directory is refused.
    #[inline]
    fn format_path(&self, reference: &str) -> anyhow::Result<PathBuf> {
        let mut components = Path::new(reference).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.directory.join(name)),
            _ => Err(anyhow!("Invalid object reference {:?}", reference)),
        }
    }
}

#[async_trait]
impl StorageBackend for FileSystemBackend {
    async fn store(&self, kind: ImageKind, data: Bytes) -> anyhow::Result<String> {
        let reference = new_object_key(kind);
        let path = self.format_path(&reference)?;

        debug!("Storing image @ {:?}", &path);
        match tokio::fs::write(&path, &data).await {
            Ok(()) => {},
            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.directory).await?;
                tokio::fs::write(&path, data).await?;
            },
            Err(other) => return Err(other.into()),
        }

        Ok(reference)
    }

    async fn fetch(&self, reference: &str) -> anyhow::Result<Option<Bytes>> {
        let path = self.format_path(reference)?;

        debug!("Retrieving image @ {:?}", &path);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(other) => Err(other.into()),
        }
    }

    async fn delete(&self, reference: &str) -> anyhow::Result<()> {
        let path = self.format_path(reference)?;

        debug!("Purging image @ {:?}", &path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(other) => Err(other.into()),
        }
    }
}
