//! 评分管理
//!
//! 评分写进文件名（` r[D.D]`），同一时间戳前缀的伴随文件（图片和提示词）
//! 一起改名，再把改名同步到远程。本地是准绳，远程失败只告警，下一轮同步
//! 会自愈。

use crate::core::identity::{
    has_rating, is_image_file, parse_rating, remote_key, timestamp_prefix, with_rating,
    MAX_RATING, MIN_RATING, TIMESTAMP_LEN,
};
use crate::core::transfer::TransferExecutor;
use crate::error::{Result, SyncError};
use crate::storage::RemoteStore;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// 已评分文件的排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    Descending,
    Random,
    #[default]
    Unsorted,
}

/// 评分会话：Idle -> Active -> Idle
#[derive(Debug, Clone, Default)]
pub enum RatingSession {
    #[default]
    Idle,
    Active { files: Vec<PathBuf>, cursor: usize },
}

impl RatingSession {
    /// 进入 Active（已经在 Active 时重新开始）
    pub fn start(&mut self, files: Vec<PathBuf>) -> &[PathBuf] {
        *self = RatingSession::Active { files, cursor: 0 };
        self.files()
    }

    pub fn exit(&mut self) {
        *self = RatingSession::Idle;
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RatingSession::Active { .. })
    }

    pub fn files(&self) -> &[PathBuf] {
        match self {
            RatingSession::Active { files, .. } => files,
            RatingSession::Idle => &[],
        }
    }

    pub fn current(&self) -> Option<&Path> {
        match self {
            RatingSession::Active { files, cursor } => files.get(*cursor).map(PathBuf::as_path),
            RatingSession::Idle => None,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<&Path> {
        match self {
            RatingSession::Active { files, cursor } => {
                if *cursor + 1 >= files.len() {
                    return Err(SyncError::OutOfRange("没有更多待评分的文件".to_string()));
                }
                *cursor += 1;
                Ok(&files[*cursor])
            }
            RatingSession::Idle => Err(SyncError::SessionInactive),
        }
    }

    pub fn previous(&mut self) -> Result<&Path> {
        match self {
            RatingSession::Active { files, cursor } => {
                if *cursor == 0 {
                    return Err(SyncError::OutOfRange("已经是第一个文件".to_string()));
                }
                *cursor -= 1;
                Ok(&files[*cursor])
            }
            RatingSession::Idle => Err(SyncError::SessionInactive),
        }
    }

    /// 从当前位置起剩余的文件数（包括当前文件）
    pub fn remaining_count(&self) -> usize {
        match self {
            RatingSession::Active { files, cursor } => files.len().saturating_sub(*cursor),
            RatingSession::Idle => 0,
        }
    }

    fn replace_path(&mut self, old: &Path, new: &Path) {
        if let RatingSession::Active { files, .. } = self {
            if let Some(entry) = files.iter_mut().find(|p| p.as_path() == old) {
                *entry = new.to_path_buf();
            }
        }
    }
}

fn list_files(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let entries = std::fs::read_dir(dir).map_err(|e| SyncError::io(dir, e))?;
    let mut files: Vec<(PathBuf, String)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            Some((e.path(), name))
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// 目录中未评分的图片，按文件名排序（不递归）
pub fn find_unrated_files(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_files(dir)?
        .into_iter()
        .filter(|(_, name)| is_image_file(name) && !has_rating(name))
        .map(|(path, _)| path)
        .collect())
}

/// 目录中评分在 `range` 闭区间内的文件
pub fn find_rated_files(dir: &Path, range: (f64, f64), order: SortOrder) -> Result<Vec<PathBuf>> {
    let (low, high) = range;
    let mut rated: Vec<(PathBuf, f64)> = list_files(dir)?
        .into_iter()
        .filter_map(|(path, name)| parse_rating(&name).map(|r| (path, r)))
        .filter(|(_, r)| (low..=high).contains(r))
        .collect();

    match order {
        SortOrder::Ascending => rated.sort_by(|a, b| a.1.total_cmp(&b.1)),
        SortOrder::Descending => rated.sort_by(|a, b| b.1.total_cmp(&a.1)),
        SortOrder::Random => rated.shuffle(&mut rand::thread_rng()),
        SortOrder::Unsorted => {}
    }

    Ok(rated.into_iter().map(|(path, _)| path).collect())
}

/// 评分管理器
pub struct RatingManager {
    executor: TransferExecutor,
    session: RatingSession,
}

impl RatingManager {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self::with_executor(TransferExecutor::new(store))
    }

    pub fn with_executor(executor: TransferExecutor) -> Self {
        Self {
            executor,
            session: RatingSession::Idle,
        }
    }

    pub fn session(&self) -> &RatingSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut RatingSession {
        &mut self.session
    }

    /// 开始评分会话，返回待评分的文件列表
    pub fn start(&mut self, dir: &Path) -> Result<&[PathBuf]> {
        let files = find_unrated_files(dir)?;
        info!("开始评分会话: {} 个未评分文件 ({:?})", files.len(), dir);
        Ok(self.session.start(files))
    }

    pub fn exit(&mut self) {
        self.session.exit();
    }

    /// 给文件及其伴随文件打分，返回改名后的本地路径
    pub async fn rate(&mut self, path: &Path, rating: f64) -> Result<Vec<PathBuf>> {
        if !path.exists() {
            return Err(SyncError::NotFound(path.display().to_string()));
        }
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(SyncError::OutOfRange(format!(
                "评分必须在 {:.1} 到 {:.1} 之间: {}",
                MIN_RATING, MAX_RATING, rating
            )));
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::InvalidName(path.display().to_string()))?;
        if file_name.chars().count() < TIMESTAMP_LEN {
            return Err(SyncError::InvalidName(format!(
                "文件名缺少时间戳前缀: {}",
                file_name
            )));
        }

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        // 远程分类即所在目录名，例如 image_out/creative -> creative
        let category = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let prefix = timestamp_prefix(file_name);
        info!("评分 {:?} -> {:.1}", path, rating);

        let mut renamed = Vec::new();
        let mut first_error = None;
        for (old_path, old_name) in list_files(dir)? {
            if !old_name.starts_with(prefix) {
                continue;
            }
            let new_name = with_rating(&old_name, rating);
            if new_name == old_name {
                debug!("评分未变化，跳过: {}", old_name);
                continue;
            }

            let new_path = dir.join(&new_name);
            // 单个伴随文件失败不影响其余文件，已改名的仍要同步到远程
            if let Err(e) = fs::rename(&old_path, &new_path).await {
                warn!("本地重命名失败 {} -> {}: {}", old_name, new_name, e);
                first_error.get_or_insert(SyncError::io(&old_path, e));
                continue;
            }
            info!("本地重命名: {} -> {}", old_name, new_name);

            if let Err(e) = self
                .propagate(&category, &old_name, &new_name, &new_path)
                .await
            {
                warn!("远程更新失败 {} -> {}: {}", old_name, new_name, e);
            }

            self.session.replace_path(&old_path, &new_path);
            renamed.push(new_path);
        }

        match first_error {
            Some(e) if renamed.is_empty() => Err(e),
            _ => Ok(renamed),
        }
    }

    /// 远程有旧对象则重命名，否则直接上传新文件
    async fn propagate(
        &self,
        category: &str,
        old_name: &str,
        new_name: &str,
        new_path: &Path,
    ) -> Result<()> {
        let old_key = remote_key(category, old_name);
        let new_key = remote_key(category, new_name);
        let store = self.executor.store();

        if store.exists(&old_key).await? {
            self.executor.rename_remote(&old_key, &new_key).await
        } else {
            info!("远程不存在 {}，直接上传 {}", old_key, new_key);
            store.upload(new_path, &new_key).await?;
            Ok(())
        }
    }
}
