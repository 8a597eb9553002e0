//! S3 operations for rendition upload, source download, and management

use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use crate::ports::BlobStore;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// `BlobStore` backed by S3 (or an S3-compatible endpoint).
#[derive(Clone)]
pub struct S3BlobStore {
    client: Arc<Client>,
    config: StorageConfig,
    http: reqwest::Client,
}

impl S3BlobStore {
    pub fn new(client: Arc<Client>, config: StorageConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10 * 60))
            .build()
            .expect("failed to construct http client");

        Self {
            client,
            config,
            http,
        }
    }

    /// Build the S3 client from ambient AWS configuration.
    pub async fn from_env(config: StorageConfig) -> Self {
        let mut loader = aws_config::from_env().region(aws_sdk_s3::config::Region::new(
            config.region.clone(),
        ));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;
        Self::new(Arc::new(Client::new(&sdk_config)), config)
    }

    /// Map a remote URL back to a bucket key when it points at our CDN.
    fn key_for_url(&self, url: &str) -> Option<String> {
        let base = self.config.cdn_base_url.trim_end_matches('/');
        url.strip_prefix(base)
            .map(|rest| rest.trim_start_matches('/').to_string())
    }

    async fn download_via_http(&self, url: &str, local_path: &Path) -> Result<()> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::TransientIo(format!("fetch {url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            if status.as_u16() == 404 {
                return Err(AppError::PermanentIo(format!("{url} returned 404")));
            }
            return Err(AppError::TransientIo(format!("{url} returned {status}")));
        }

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AppError::TransientIo(format!("read {url}: {e}")))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(&self, key: &str, local_path: &Path) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| AppError::PermanentIo(format!("open {}: {e}", local_path.display())))?;

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type_for(key))
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::TransientIo(format!("put {key}: {e}")))?;

        debug!(key = %key, "Uploaded object");
        Ok(())
    }

    async fn download(&self, remote_url: &str, local_path: &Path) -> Result<()> {
        // Our own CDN URLs go straight to the bucket; anything else is
        // fetched over HTTP.
        let Some(key) = self.key_for_url(remote_url) else {
            return self.download_via_http(remote_url, local_path).await;
        };

        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let text = e.to_string();
                if text.contains("NoSuchKey") || text.contains("404") {
                    AppError::PermanentIo(format!("missing object {key}"))
                } else {
                    AppError::TransientIo(format!("get {key}: {e}"))
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| AppError::TransientIo(format!("read {key}: {e}")))?
            .into_bytes();

        tokio::fs::write(local_path, &bytes).await?;
        debug!(key = %key, size = bytes.len(), "Downloaded object");
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        self.config.cdn_url(key)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::TransientIo(format!("delete {key}: {e}")))?;

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let text = e.to_string();
                if text.contains("NotFound") || text.contains("404") {
                    Ok(false)
                } else {
                    Err(AppError::TransientIo(format!("head {key}: {e}")))
                }
            }
        }
    }
}

/// Content type by file extension; streaming players require the manifest
/// and segment types to be exact.
fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next().unwrap_or_default() {
        "m3u8" => "application/vnd.apple.mpegurl",
        "ts" => "video/mp2t",
        "mpd" => "application/dash+xml",
        "m4s" => "video/iso.segment",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "vtt" => "text/vtt",
        "srt" => "application/x-subrip",
        _ => "application/octet-stream",
    }
}
