use std::sync::Arc;

use serde::Deserialize;

use super::memory::{MemoryAlbumDirectory, MemoryRepository};
use super::scylladb::{ScyllaAlbumDirectory, ScyllaRepository};
use crate::repository::{AlbumDirectory, MetadataRepository};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataConfigs {
    Memory {
        #[serde(default)]
        /// Albums which exist from startup.
        albums: Vec<String>,
    },
    Scylla {
        nodes: Vec<String>,
        keyspace: String,

        #[serde(default)]
        user: Option<String>,

        #[serde(default)]
        password: Option<String>,

        #[serde(default)]
        /// The table holding image records, defaults to `album_images`.
        table: Option<String>,

        #[serde(default)]
        /// The album service's table, defaults to `albums`.
        albums_table: Option<String>,
    },
}

/// The connected metadata side of the service.
pub struct MetadataStores {
    pub repository: Arc<dyn MetadataRepository>,
    pub albums: Arc<dyn AlbumDirectory>,
}

impl MetadataConfigs {
    pub async fn connect(&self) -> anyhow::Result<MetadataStores> {
        match self {
            Self::Memory { albums } => Ok(MetadataStores {
                repository: Arc::new(MemoryRepository::default()),
                albums: Arc::new(MemoryAlbumDirectory::with_albums(albums.iter().cloned())),
            }),
            Self::Scylla {
                nodes,
                keyspace,
                user,
                password,
                table,
                albums_table,
            } => {
                let repository = ScyllaRepository::connect(
                    keyspace.clone(),
                    table.clone(),
                    nodes,
                    user.clone(),
                    password.clone(),
                )
                .await?;

                let albums = ScyllaAlbumDirectory::connect(
                    keyspace.clone(),
                    albums_table.clone(),
                    nodes,
                    user.clone(),
                    password.clone(),
                )
                .await?;

                Ok(MetadataStores {
                    repository: Arc::new(repository),
                    albums: Arc::new(albums),
                })
            },
        }
    }
}
