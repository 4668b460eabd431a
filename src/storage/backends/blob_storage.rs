use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use rusoto_core::credential::StaticProvider;
use rusoto_core::{HttpClient, Region, RusotoError};
use rusoto_s3::{
    DeleteObjectRequest,
    GetObjectError,
    GetObjectRequest,
    PutObjectRequest,
    S3Client,
    S3,
};

use crate::models::ImageKind;
use crate::utils::new_object_key;
use crate::StorageBackend;

/// An S3 compatible bucket.
pub struct BlobStorageBackend {
    bucket: String,
    prefix: Option<String>,
    client: S3Client,
}

impl BlobStorageBackend {
    pub fn new(
        name: String,
        region: String,
        endpoint: String,
        access_key: String,
        secret_key: String,
        prefix: Option<String>,
    ) -> Result<Self> {
        let creds = StaticProvider::new_minimal(access_key, secret_key);
        let region = Region::Custom {
            name: region,
            endpoint,
        };
        let client = S3Client::new_with(HttpClient::new()?, creds, region);

        Ok(Self {
            bucket: name,
            prefix,
            client,
        })
    }

    #[inline]
    fn format_key(&self, name: String) -> String {
        match self.prefix.as_deref() {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), name),
            None => name,
        }
    }
}

#[async_trait]
impl StorageBackend for BlobStorageBackend {
    async fn store(&self, kind: ImageKind, data: Bytes) -> Result<String> {
        let key = self.format_key(new_object_key(kind));

        debug!("Storing image in bucket @ {}", &key);
        let request = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: key.clone(),
            body: Some(data.to_vec().into()),
            content_type: Some(kind.as_content_type().to_string()),
            content_length: Some(data.len() as i64),
            ..Default::default()
        };
        self.client.put_object(request).await?;

        Ok(key)
    }

    async fn fetch(&self, reference: &str) -> Result<Option<Bytes>> {
        debug!("Retrieving image in bucket @ {}", reference);
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: reference.to_string(),
            ..Default::default()
        };

        let output = match self.client.get_object(request).await {
            Ok(output) => output,
            Err(RusotoError::Service(GetObjectError::NoSuchKey(_))) => return Ok(None),
            Err(other) => return Err(other.into()),
        };

        let mut body = match output.body {
            Some(body) => body,
            None => return Ok(Some(Bytes::new())),
        };

        let mut buff = BytesMut::new();
        while let Some(chunk) = body.try_next().await? {
            buff.extend_from_slice(&chunk);
        }

        Ok(Some(buff.freeze()))
    }

    async fn delete(&self, reference: &str) -> Result<()> {
        debug!("Purging file in bucket @ {}", reference);
        let request = DeleteObjectRequest {
            bucket: self.bucket.clone(),
            key: reference.to_string(),
            ..Default::default()
        };
        self.client.delete_object(request).await?;

        Ok(())
    }
}
