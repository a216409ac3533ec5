pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use s3::S3Store;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 记录来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

/// 单个产物文件的快照（本地扫描和远程列表共用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// 相对路径 / 对象键，始终使用 `/` 分隔，包含分类目录前缀
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub origin: Origin,
}

impl ArtifactRecord {
    pub fn local(name: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            last_modified,
            origin: Origin::Local,
        }
    }

    pub fn remote(name: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            last_modified,
            origin: Origin::Remote,
        }
    }

    /// 分类目录（键中最后一个 `/` 之前的部分）
    pub fn category(&self) -> &str {
        self.name.rsplit_once('/').map_or("", |(dir, _)| dir)
    }

    /// 文件名部分
    pub fn file_name(&self) -> &str {
        self.name.rsplit_once('/').map_or(self.name.as_str(), |(_, f)| f)
    }
}

/// 对象元数据（用于存在性检查）
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// 远程对象存储抽象接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 递归列出所有对象（分页由实现内部处理）
    async fn list_all(&self) -> Result<Vec<ArtifactRecord>>;

    /// 获取对象元数据，不存在时返回 None
    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// 检查对象是否存在
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.stat(key).await?.is_some())
    }

    /// 上传本地文件，返回字节数
    async fn upload(&self, local_path: &Path, key: &str) -> Result<u64>;

    /// 下载对象到本地路径，返回字节数
    async fn download(&self, key: &str, local_path: &Path) -> Result<u64>;

    /// 删除对象（不存在时不报错）
    async fn delete(&self, key: &str) -> Result<()>;

    /// 存储内复制
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}
