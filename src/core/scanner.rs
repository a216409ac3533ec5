use crate::core::identity::is_image_file;
use crate::error::{Result, SyncError};
use crate::storage::ArtifactRecord;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 过滤规则：由调用方在扫描/列表之后使用，扫描本身不做过滤
#[derive(Debug, Clone)]
pub struct ScanFilter {
    /// 排除规则（glob patterns）
    pub exclude_patterns: Vec<String>,
    /// 仅包含的扩展名（空表示不限制）
    pub include_extensions: Vec<String>,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            exclude_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "*.tmp".to_string(),
                "*.part".to_string(),
                "~*".to_string(),
            ],
            include_extensions: vec![],
        }
    }
}

impl ScanFilter {
    /// 检查路径是否应该被排除
    pub fn should_exclude(&self, path: &str) -> bool {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        if self
            .exclude_patterns
            .iter()
            .any(|p| Self::matches_pattern(file_name, p))
        {
            return true;
        }

        if !self.include_extensions.is_empty() {
            let ext = Path::new(file_name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();

            if !self
                .include_extensions
                .iter()
                .any(|e| e.trim_start_matches('.').to_lowercase() == ext)
            {
                return true;
            }
        }

        false
    }

    /// 简单的 glob 匹配，只支持 `*`
    fn matches_pattern(file_name: &str, pattern: &str) -> bool {
        let name = file_name.to_lowercase();
        let pattern = pattern.to_lowercase();

        if pattern.contains('*') {
            let regex_pattern = regex::escape(&pattern).replace("\\*", ".*");
            if let Ok(re) = regex::Regex::new(&format!("^{}$", regex_pattern)) {
                return re.is_match(&name);
            }
        }

        name == pattern
    }

    pub fn apply(&self, records: Vec<ArtifactRecord>) -> Vec<ArtifactRecord> {
        let before = records.len();
        let kept: Vec<_> = records
            .into_iter()
            .filter(|r| {
                let excluded = self.should_exclude(&r.name);
                if excluded {
                    debug!("排除文件: {}", r.name);
                }
                !excluded
            })
            .collect();
        if kept.len() != before {
            info!("过滤掉 {} 个文件", before - kept.len());
        }
        kept
    }
}

fn modified_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// 递归扫描本地目录，每个普通文件一条记录，名称相对根目录并使用 `/`
pub async fn scan(root: &Path) -> Result<Vec<ArtifactRecord>> {
    if !root.exists() {
        info!("本地目录不存在，视为空: {:?}", root);
        return Ok(Vec::new());
    }

    let base = root.to_path_buf();

    // 使用 spawn_blocking 避免阻塞 async runtime
    let records = tokio::task::spawn_blocking(move || scan_blocking(&base))
        .await
        .map_err(|e| SyncError::Storage(e.into()))?;

    info!("本地扫描完成: {} 个文件 ({:?})", records.len(), root);
    Ok(records)
}

fn scan_blocking(base: &Path) -> Vec<ArtifactRecord> {
    WalkDir::new(base)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("扫描条目失败: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let relative = entry.path().strip_prefix(base).ok()?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            Some(ArtifactRecord::local(
                name,
                metadata.len(),
                modified_time(&metadata),
            ))
        })
        .collect()
}

/// 按修改时间删除最旧的文件，只保留 `keep` 个（仅当前目录，不递归）
pub fn prune_oldest(dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(SyncError::NotFound(dir.display().to_string()));
    }

    let mut files: Vec<(PathBuf, DateTime<Utc>)> = std::fs::read_dir(dir)
        .map_err(|e| SyncError::io(dir, e))?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let metadata = e.metadata().ok()?;
            metadata
                .is_file()
                .then(|| (e.path(), modified_time(&metadata)))
        })
        .collect();

    if files.len() <= keep {
        return Ok(Vec::new());
    }

    files.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    let excess = files.len() - keep;

    let mut deleted = Vec::new();
    for (path, _) in files.into_iter().take(excess) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("已删除旧文件: {:?}", path);
                deleted.push(path);
            }
            Err(e) => warn!("删除旧文件失败 {:?}: {}", path, e),
        }
    }

    Ok(deleted)
}

/// 随机挑选目录中的一张图片（离线轮播用）
pub fn pick_random_image(dir: &Path) -> Option<PathBuf> {
    let images: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(is_image_file))
        .collect();

    if images.is_empty() {
        info!("目录中没有图片: {:?}", dir);
    }
    images.choose(&mut rand::thread_rng()).cloned()
}
