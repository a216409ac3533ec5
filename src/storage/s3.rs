use super::{ArtifactRecord, ObjectMeta, RemoteStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::RemoteConfig;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// 基于 opendal 的对象存储（生产环境为 S3，测试与演练使用内存后端）
pub struct S3Store {
    operator: Operator,
    name: String,
}

impl S3Store {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(&config.bucket)
            .region(&config.region);

        if let Some(ref key) = config.access_key {
            builder = builder.access_key_id(key);
        }
        if let Some(ref secret) = config.secret_key {
            builder = builder.secret_access_key(secret);
        }
        if let Some(ref ep) = config.endpoint {
            builder = builder.endpoint(ep);
        }
        if let Some(ref root) = config.root {
            builder = builder.root(root);
        }

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "s3://{}{}",
            config.bucket,
            config
                .root
                .as_deref()
                .map(|p| format!("/{}", p.trim_matches('/')))
                .unwrap_or_default()
        );

        tracing::info!("初始化S3存储: {} (region={})", name, config.region);
        Ok(Self { operator, name })
    }

    /// 内存后端，用于演练和测试
    pub fn in_memory() -> Result<Self> {
        let operator = Operator::new(opendal::services::Memory::default())?.finish();
        Ok(Self {
            operator,
            name: "memory://".to_string(),
        })
    }

    fn to_utc(time: Option<DateTime<Utc>>) -> DateTime<Utc> {
        time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn list_all(&self) -> Result<Vec<ArtifactRecord>> {
        let mut records = Vec::new();

        // lister 内部处理分页
        let mut lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path = entry.path().trim_start_matches('/');
            let meta = entry.metadata();

            // 跳过根目录和目录占位对象
            if path.is_empty() || path.ends_with('/') || meta.is_dir() {
                continue;
            }

            records.push(ArtifactRecord::remote(
                path,
                meta.content_length(),
                Self::to_utc(meta.last_modified()),
            ));
        }

        Ok(records)
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Some(ObjectMeta {
                size: meta.content_length(),
                last_modified: Self::to_utc(meta.last_modified()),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<u64> {
        let data = fs::read(local_path).await?;
        let size = data.len() as u64;
        self.operator.write(key, data).await?;
        Ok(size)
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<u64> {
        let data = self.operator.read(key).await?.to_vec();
        let size = data.len() as u64;

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 先写临时文件再重命名，避免留下半个文件
        let mut temp_path = local_path.as_os_str().to_owned();
        temp_path.push(".part");
        let temp_path = PathBuf::from(temp_path);
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, local_path).await?;

        Ok(size)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 删除不存在的文件不会报错
        self.operator.delete(key).await?;
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        if self.operator.info().full_capability().copy {
            self.operator.copy(from, to).await?;
        } else {
            let data = self.operator.read(from).await?.to_vec();
            self.operator.write(to, data).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
