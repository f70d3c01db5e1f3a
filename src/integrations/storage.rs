//! 对象存储 - 图表产物上传与静态报告读取

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::config::{StorageBackend, StorageConfig};

/// 底层二进制对象存储
#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// 不存在时返回`None`
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        bail!("object key is empty");
    }
    if key.starts_with('/') || key.contains('\\') || key.split('/').any(|seg| seg == "..") {
        bail!("invalid object key: {}", key);
    }
    Ok(())
}

/// S3对象存储
#[derive(Clone)]
pub struct S3Blobs {
    client: Client,
    bucket: String,
}

impl S3Blobs {
    #[instrument(level = "debug")]
    pub async fn new(bucket: &str, region: &str, endpoint: Option<&str>) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        // 自定义endpoint通常是MinIO一类的S3兼容服务，只支持path-style
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(endpoint.is_some())
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl BlobBackend for S3Blobs {
    #[instrument(level = "debug", skip(self, data))]
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        validate_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .context("s3 put_object failed")?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) if e.as_service_error().is_some_and(is_missing_object) => return Ok(None),
            Err(e) => return Err(anyhow::Error::new(e).context("s3 get_object failed")),
        };

        let data = resp
            .body
            .collect()
            .await
            .context("s3 collect body failed")?
            .into_bytes();
        Ok(Some(data))
    }
}

fn is_missing_object(err: &GetObjectError) -> bool {
    err.is_no_such_key()
}

/// 本地目录存储
#[derive(Clone)]
pub struct LocalBlobs {
    root: PathBuf,
}

impl LocalBlobs {
    pub async fn new(root: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&root)
            .await
            .context(format!("Failed to create storage root: {:?}", root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl BlobBackend for LocalBlobs {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<()> {
        validate_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create storage directory")?;
        }
        tokio::fs::write(&path, &data)
            .await
            .context(format!("Failed to write object: {:?}", path))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        let path = self.root.join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read object")),
        }
    }
}

/// 进程内存储，用于测试与无云环境
#[derive(Default)]
pub struct MemoryBlobs {
    objects: RwLock<HashMap<String, Bytes>>,
}

#[async_trait]
impl BlobBackend for MemoryBlobs {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<()> {
        validate_key(key)?;
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        Ok(self.objects.read().await.get(key).cloned())
    }
}

/// 对象存储网关
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    /// 能否为上传的对象生成可公开访问的地址
    fn can_resolve_urls(&self) -> bool;

    /// 上传二进制产物到`{category}/{uuid}.png`，返回公开地址；失败返回`None`
    async fn upload_binary(&self, category: &str, bytes: Vec<u8>) -> Option<String>;

    /// 读取文本对象；失败时返回描述错误的文本而不是错误
    async fn read_text(&self, key: &str) -> String;

    /// 写入文本对象
    async fn write_text(&self, key: &str, text: &str) -> Result<()>;
}

/// 基于[`BlobBackend`]的产物存储
pub struct ArtifactStore {
    backend: Arc<dyn BlobBackend>,
    url_base: Option<String>,
}

impl ArtifactStore {
    pub fn with_backend(backend: Arc<dyn BlobBackend>, url_base: Option<String>) -> Self {
        Self {
            backend,
            url_base: url_base.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn in_memory(url_base: Option<String>) -> Self {
        Self::with_backend(Arc::new(MemoryBlobs::default()), url_base)
    }

    /// 按配置选择后端
    ///
    /// S3缺少bucket或region时退化为内存存储，此时无法生成公开地址，图表分支会被跳过。
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let public_base = config.public_base_url.clone();
        match config.backend {
            StorageBackend::S3 => match (&config.bucket, &config.region) {
                (Some(bucket), Some(region)) => {
                    let backend =
                        S3Blobs::new(bucket, region, config.endpoint.as_deref()).await;
                    let url_base = public_base.or_else(|| {
                        Some(format!("https://{}.s3.{}.amazonaws.com", bucket, region))
                    });
                    Ok(Self::with_backend(Arc::new(backend), url_base))
                }
                _ => {
                    warn!("⚠️ 未配置BUCKET_NAME或AWS_REGION，对象存储不可用");
                    Ok(Self::in_memory(None))
                }
            },
            StorageBackend::Local => {
                let backend = LocalBlobs::new(config.local_root.clone()).await?;
                let url_base = match public_base {
                    Some(base) => Some(base),
                    None => {
                        let root = std::path::absolute(backend.root())
                            .context("Failed to resolve storage root")?;
                        Some(format!("file://{}", root.display()))
                    }
                };
                Ok(Self::with_backend(Arc::new(backend), url_base))
            }
            StorageBackend::Memory => Ok(Self::in_memory(public_base)),
        }
    }

    pub fn object_url(&self, key: &str) -> Option<String> {
        self.url_base.as_ref().map(|base| format!("{}/{}", base, key))
    }
}

#[async_trait]
impl ObjectStoreGateway for ArtifactStore {
    fn can_resolve_urls(&self) -> bool {
        self.url_base.is_some()
    }

    async fn upload_binary(&self, category: &str, bytes: Vec<u8>) -> Option<String> {
        let Some(base) = &self.url_base else {
            warn!(category, "对象存储无法生成公开地址，跳过上传");
            return None;
        };
        let key = format!("{}/{}.png", category, uuid::Uuid::new_v4());
        match self.backend.put(&key, Bytes::from(bytes), "image/png").await {
            Ok(()) => {
                let url = format!("{}/{}", base, key);
                info!(url = %url, "🖼️ 图表已上传");
                Some(url)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "上传图表失败");
                None
            }
        }
    }

    async fn read_text(&self, key: &str) -> String {
        match self.backend.get(key).await {
            Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(None) => format!("Error reading report: object '{}' not found", key),
            Err(e) => format!("Error reading report: {:#}", e),
        }
    }

    async fn write_text(&self, key: &str, text: &str) -> Result<()> {
        self.backend
            .put(
                key,
                Bytes::copy_from_slice(text.as_bytes()),
                "text/markdown; charset=utf-8",
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_resolves_public_url() {
        let store = ArtifactStore::in_memory(Some("https://cdn.example.com/".to_string()));
        assert!(store.can_resolve_urls());

        let url = store.upload_binary("charts", vec![1, 2, 3]).await.unwrap();
        assert!(url.starts_with("https://cdn.example.com/charts/"));
        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_upload_without_url_base_is_skipped() {
        let store = ArtifactStore::in_memory(None);
        assert!(!store.can_resolve_urls());
        assert_eq!(store.upload_binary("charts", vec![1]).await, None);
    }

    #[tokio::test]
    async fn test_read_text_missing_key_returns_error_text() {
        let store = ArtifactStore::in_memory(None);
        let text = store.read_text("reports/market_report.md").await;
        assert!(text.starts_with("Error reading report"));
    }

    #[tokio::test]
    async fn test_write_then_read_text() {
        let store = ArtifactStore::in_memory(None);
        store
            .write_text("reports/market_report.md", "# Market Report")
            .await
            .unwrap();
        assert_eq!(
            store.read_text("reports/market_report.md").await,
            "# Market Report"
        );
    }

    #[tokio::test]
    async fn test_local_backend_uses_file_urls() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Local,
            local_root: temp_dir.path().join("storage"),
            public_base_url: None,
            ..Default::default()
        };
        let store = ArtifactStore::new(&config).await.unwrap();
        let url = store.upload_binary("charts", b"png".to_vec()).await.unwrap();
        assert!(url.starts_with("file://"));

        let key = url.rsplit("/storage/").next().unwrap();
        let written = std::fs::read(temp_dir.path().join("storage").join(key)).unwrap();
        assert_eq!(written, b"png");
    }

    #[tokio::test]
    async fn test_s3_without_bucket_cannot_resolve_urls() {
        let config = StorageConfig {
            backend: StorageBackend::S3,
            bucket: None,
            region: Some("us-east-1".to_string()),
            public_base_url: None,
            ..Default::default()
        };
        let store = ArtifactStore::new(&config).await.unwrap();
        assert!(!store.can_resolve_urls());
    }

    #[tokio::test]
    async fn test_keys_are_validated() {
        let blobs = MemoryBlobs::default();
        assert!(blobs.put("../escape", Bytes::new(), "text/plain").await.is_err());
        assert!(blobs.get("/absolute").await.is_err());
    }

    #[test]
    fn test_only_no_such_key_counts_as_missing() {
        use aws_sdk_s3::types::error::{InvalidObjectState, NoSuchKey};

        let missing = GetObjectError::NoSuchKey(NoSuchKey::builder().message("gone").build());
        assert!(is_missing_object(&missing));

        let archived = GetObjectError::InvalidObjectState(
            InvalidObjectState::builder().message("NoSuchKey in GLACIER").build(),
        );
        assert!(!is_missing_object(&archived));
    }
}
