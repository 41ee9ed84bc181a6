use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::{
    download::Range, get::GetObjectRequest, list::ListObjectsRequest, upload::Media,
    upload::UploadObjectRequest, upload::UploadType,
};
use google_cloud_storage::http::Error as GcsError;
use tokio::io::AsyncWriteExt;

use super::{Error, ListPage, ObjectStore};

/// Google Cloud Storage backend.
pub struct GcsObjectStore {
    bucket: String,
    client: Client,
    timeout: Duration,
}

impl std::fmt::Debug for GcsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsObjectStore")
            .field("bucket", &self.bucket)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GcsObjectStore {
    pub async fn new(
        bucket: String,
        creds: Option<CredentialsFile>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let config = ClientConfig::default();
        let config = if let Some(creds) = creds {
            config
                .with_credentials(creds)
                .await
                .map_err(|e| Error::Other(e.to_string()))?
        } else {
            config.anonymous()
        };

        Ok(Self {
            bucket,
            client: Client::new(config),
            timeout,
        })
    }

    async fn with_timeout<T>(&self, operation: impl Future<Output = T>) -> Result<T, Error> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| Error::Timeout)
    }
}

fn request_error(key: &str, e: GcsError) -> Error {
    match e {
        GcsError::Response(ref r) if r.code == 404 => Error::NotFound(key.to_string()),
        GcsError::Response(ref r) if r.code == 403 => Error::PermissionDenied,
        GcsError::Response(ref r) if r.code == 503 => Error::ServiceUnavailable,
        e => Error::Other(e.to_string()),
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn list_page(&self, prefix: &str, page_token: Option<&str>) -> Result<ListPage, Error> {
        let request = ListObjectsRequest {
            bucket: self.bucket.clone(),
            prefix: Some(prefix.to_string()),
            page_token: page_token.map(|token| token.to_string()),
            ..Default::default()
        };

        let response = self
            .with_timeout(self.client.list_objects(&request))
            .await?
            .map_err(|e| request_error(prefix, e))?;

        Ok(ListPage {
            keys: response
                .items
                .unwrap_or_default()
                .into_iter()
                .map(|object| object.name)
                .collect(),
            next_page_token: response.next_page_token,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: key.to_string(),
            ..Default::default()
        };

        self.with_timeout(self.client.download_object(&request, &Range::default()))
            .await?
            .map_err(|e| request_error(key, e))
    }

    async fn fetch_to_path(&self, key: &str, path: &Path) -> Result<(), Error> {
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: key.to_string(),
            ..Default::default()
        };

        let stream = self
            .with_timeout(
                self.client
                    .download_streamed_object(&request, &Range::default()),
            )
            .await?
            .map_err(|e| request_error(key, e))?;
        futures::pin_mut!(stream);

        let mut file = tokio::fs::File::create(path).await?;
        while let Some(chunk) = self.with_timeout(stream.next()).await? {
            let chunk = chunk.map_err(|e| request_error(key, e))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), Error> {
        let request = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };
        let upload_type = UploadType::Simple(Media::new(key.to_string()));

        self.with_timeout(self.client.upload_object(&request, data, &upload_type))
            .await?
            .map_err(|e| request_error(key, e))?;
        Ok(())
    }
}
