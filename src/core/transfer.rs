//! 传输执行 - 上传、下载、重命名
//!
//! 单个条目失败只记录并跳过，不会中断整批；取消标志只在条目之间检查。

use crate::core::identity::{normalize_key, remote_key, TIMESTAMP_LEN};
use crate::core::reconciler::ReconciliationPlan;
use crate::error::{Result, SyncError};
use crate::storage::{ArtifactRecord, RemoteStore};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 分类目录最短长度
pub const MIN_CATEGORY_LEN: usize = 1;
/// 文件名最短长度（至少要有时间戳前缀）
pub const MIN_FILE_NAME_LEN: usize = TIMESTAMP_LEN;
/// 重试次数上限（配置校验使用）
pub const MAX_RETRIES: u32 = 10;
/// 单次重试的最长等待（毫秒）
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// 瞬时失败的最大重试次数（0 表示不重试）
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），指数退避
    pub retry_base_delay_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_base_delay_ms: 1000,
        }
    }
}

/// 下载选项
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// 最多下载数量（0 表示不限制）
    pub max_count: usize,
    /// 是否打乱顺序（配合 max_count 做随机抽样）
    pub randomize: bool,
    /// 只下载该分类（空表示不限制）
    pub category_filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Upload,
    Download,
    RenameRemote,
    RenameLocal,
}

/// 传输进度
#[derive(Debug, Clone, Serialize)]
pub struct TransferProgress {
    pub phase: TransferPhase,
    pub current: String,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// 批量执行结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes: u64,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

impl BatchReport {
    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
        self.cancelled |= other.cancelled;
        self.errors.extend(other.errors);
    }

    fn record_failure(&mut self, key: &str, err: &SyncError) {
        self.failed += 1;
        self.errors.push(format!("{}: {}", key, err));
    }
}

/// 检查对象键是否可以上传：拒绝 `christmas/` 这类目录占位键
pub fn is_valid_key(key: &str) -> bool {
    match key.rsplit_once('/') {
        Some((dir, file_name)) => {
            dir.chars().count() >= MIN_CATEGORY_LEN
                && file_name.chars().count() >= MIN_FILE_NAME_LEN
        }
        None => false,
    }
}

/// 把相对名称落到本地根目录下；含 `..`、绝对路径或盘符前缀的名称返回 None
pub fn contained_path(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let mut components = relative.components().peekable();
    components.peek()?;
    components
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| root.join(relative))
}

/// 第 `attempt` 次重试前的等待时间，指数增长并封顶
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS)
}

/// 传输执行器
pub struct TransferExecutor {
    store: Arc<dyn RemoteStore>,
    config: TransferConfig,
    cancelled: Arc<AtomicBool>,
    progress_tx: Option<mpsc::UnboundedSender<TransferProgress>>,
}

impl TransferExecutor {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            config: TransferConfig::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            progress_tx: None,
        }
    }

    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// 共享取消标志
    pub fn with_cancel(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// 进度通道；不设置时不发送进度
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<TransferProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    /// 取消后续条目（正在执行的条目会完成）
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn send_progress(&self, phase: TransferPhase, current: &str, report: &BatchReport, total: usize) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(TransferProgress {
                phase,
                current: current.to_string(),
                completed: report.succeeded,
                failed: report.failed,
                total,
            });
        }
    }

    /// 带重试的远程操作（指数退避）
    async fn with_retry<T, F, Fut>(&self, key: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_retries => {
                    let delay = backoff_delay_ms(self.config.retry_base_delay_ms, attempt);
                    warn!(
                        "操作失败，{}ms 后重试 ({}/{}) {}: {:#}",
                        delay,
                        attempt + 1,
                        max_retries,
                        key,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(SyncError::transfer(key, format!("{:#}", e))),
            }
        }
    }

    /// 批量上传本地文件，键即记录名
    pub async fn upload_batch(&self, records: &[ArtifactRecord], local_root: &Path) -> BatchReport {
        let mut report = BatchReport::default();
        let total = records.len();

        for record in records {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let key = normalize_key(&record.name);
            if !is_valid_key(&key) {
                warn!("跳过不合法的对象键: {:?}", record.name);
                report.skipped += 1;
                continue;
            }

            let Some(local_path) = contained_path(local_root, &record.name) else {
                warn!("跳过越出本地目录的路径: {:?}", record.name);
                report.skipped += 1;
                continue;
            };
            let result = self
                .with_retry(&key, || self.store.upload(&local_path, &key))
                .await;

            match result {
                Ok(bytes) => {
                    debug!("已上传: {} ({} 字节)", key, bytes);
                    report.succeeded += 1;
                    report.bytes += bytes;
                }
                Err(e) => {
                    warn!("上传失败 {}: {}", key, e);
                    report.record_failure(&key, &e);
                }
            }
            self.send_progress(TransferPhase::Upload, &key, &report, total);
        }

        info!(
            "上传完成: 成功 {}, 失败 {}, 跳过 {}",
            report.succeeded, report.failed, report.skipped
        );
        report
    }

    /// 批量下载远程对象到本地目录
    pub async fn download_batch(
        &self,
        records: &[ArtifactRecord],
        destination_root: &Path,
        options: &DownloadOptions,
    ) -> BatchReport {
        let category = options.category_filter.trim_matches('/');
        let mut selected: Vec<&ArtifactRecord> = records
            .iter()
            .filter(|r| category.is_empty() || r.category() == category)
            .collect();

        if options.randomize {
            selected.shuffle(&mut rand::thread_rng());
        }
        if options.max_count > 0 {
            selected.truncate(options.max_count);
        }

        let mut report = BatchReport {
            skipped: records.len() - selected.len(),
            ..Default::default()
        };
        let total = selected.len();

        for record in selected {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let Some(local_path) = contained_path(destination_root, &record.name) else {
                warn!("跳过会写到目标目录之外的对象键: {:?}", record.name);
                report.skipped += 1;
                continue;
            };
            let result = self
                .with_retry(&record.name, || self.store.download(&record.name, &local_path))
                .await;

            match result {
                Ok(bytes) => {
                    debug!("已下载: {} -> {:?}", record.name, local_path);
                    report.succeeded += 1;
                    report.bytes += bytes;
                }
                Err(e) => {
                    warn!("下载失败 {}: {}", record.name, e);
                    report.record_failure(&record.name, &e);
                }
            }
            self.send_progress(TransferPhase::Download, &record.name, &report, total);
        }

        info!(
            "下载完成: 成功 {}, 失败 {}, 未选中 {}",
            report.succeeded, report.failed, report.skipped
        );
        report
    }

    /// 远程重命名：复制后删除，非原子
    ///
    /// 源对象不存在属于逻辑错误，直接返回 `NotFound`。复制成功但删除失败时
    /// 两个对象并存，下一轮同步的重复清理会收敛。
    pub async fn rename_remote(&self, old_key: &str, new_key: &str) -> Result<()> {
        let old_key = normalize_key(old_key);
        let new_key = normalize_key(new_key);

        if !self.store.exists(&old_key).await? {
            error!("远程重命名的源对象不存在: {}", old_key);
            return Err(SyncError::NotFound(old_key));
        }

        self.with_retry(&old_key, || self.store.copy(&old_key, &new_key))
            .await?;
        self.with_retry(&old_key, || self.store.delete(&old_key))
            .await?;

        info!("远程重命名: {} -> {}", old_key, new_key);
        Ok(())
    }

    /// 本地重命名（同一卷内由操作系统保证原子性）
    pub async fn rename_local(&self, local_root: &Path, old_name: &str, new_name: &str) -> Result<()> {
        let (Some(old_path), Some(new_path)) = (
            contained_path(local_root, old_name),
            contained_path(local_root, new_name),
        ) else {
            return Err(SyncError::InvalidName(format!("{} -> {}", old_name, new_name)));
        };

        if !old_path.exists() {
            return Err(SyncError::NotFound(old_path.display().to_string()));
        }
        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
        fs::rename(&old_path, &new_path)
            .await
            .map_err(|e| SyncError::io(&old_path, e))?;

        info!("本地重命名: {} -> {}", old_name, new_name);
        Ok(())
    }

    /// 上传新生成的产物（图片和提示词），键为 `{分类}/{文件名}`
    pub async fn publish_artifacts(&self, files: &[PathBuf], category: &str) -> BatchReport {
        let mut report = BatchReport::default();
        for path in files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                report.skipped += 1;
                continue;
            };
            let key = remote_key(category, file_name);
            info!("上传新产物到 {}", key);
            match self.with_retry(&key, || self.store.upload(path, &key)).await {
                Ok(bytes) => {
                    report.succeeded += 1;
                    report.bytes += bytes;
                }
                Err(e) => {
                    warn!("上传新产物失败 {}: {}", key, e);
                    report.record_failure(&key, &e);
                }
            }
        }
        report
    }

    /// 按顺序执行调和计划：上传、下载、远程重命名、本地重命名
    pub async fn apply_plan(&self, plan: &ReconciliationPlan, local_root: &Path) -> BatchReport {
        let mut report = self.upload_batch(&plan.copy_up, local_root).await;
        if report.cancelled {
            return report;
        }

        report.merge(
            self.download_batch(&plan.copy_down, local_root, &DownloadOptions::default())
                .await,
        );
        if report.cancelled {
            return report;
        }

        let mut renames = BatchReport::default();
        let total = plan.rename_remote.len();
        for rename in &plan.rename_remote {
            if self.is_cancelled() {
                renames.cancelled = true;
                break;
            }
            match self.rename_remote(&rename.from, &rename.to).await {
                Ok(()) => renames.succeeded += 1,
                Err(e) => {
                    warn!("远程重命名失败 {} -> {}: {}", rename.from, rename.to, e);
                    renames.record_failure(&rename.from, &e);
                }
            }
            self.send_progress(TransferPhase::RenameRemote, &rename.to, &renames, total);
        }

        let total = plan.rename_local.len();
        for rename in &plan.rename_local {
            if renames.cancelled || self.is_cancelled() {
                renames.cancelled = true;
                break;
            }
            match self.rename_local(local_root, &rename.from, &rename.to).await {
                Ok(()) => renames.succeeded += 1,
                Err(e) => {
                    warn!("本地重命名失败 {} -> {}: {}", rename.from, rename.to, e);
                    renames.record_failure(&rename.from, &e);
                }
            }
            self.send_progress(TransferPhase::RenameLocal, &rename.to, &renames, total);
        }

        report.merge(renames);
        report
    }
}
