//! 生成图片产物的本地/远程同步与评分

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AppConfig, ConfigCache, RemoteConfig};
pub use crate::core::{RatingManager, SyncEngine, SyncReport};
pub use error::{Result, SyncError};
pub use storage::{ArtifactRecord, Origin, RemoteStore, S3Store};
