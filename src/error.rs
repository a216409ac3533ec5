//! 同步与评分相关的结构化错误

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 假定存在的本地文件或远程对象不存在
    #[error("对象不存在: {0}")]
    NotFound(String),

    /// 评分值或会话游标越界
    #[error("超出范围: {0}")]
    OutOfRange(String),

    /// 文件名不符合时间戳命名约定
    #[error("文件名不合法: {0}")]
    InvalidName(String),

    /// 评分会话未开始
    #[error("评分会话未开始")]
    SessionInactive,

    /// 远程列表失败（区别于桶为空）
    #[error("远程列表失败: {0}")]
    Listing(String),

    /// 单个传输失败（可重试，下一轮同步会再次尝试）
    #[error("传输失败 {key}: {message}")]
    Transfer { key: String, message: String },

    #[error("操作已取消")]
    Cancelled,

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO 错误 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn transfer(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::Transfer {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// 是否属于可重试的瞬时故障（网络、认证等）
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transfer { .. } | SyncError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
