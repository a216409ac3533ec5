//! 同步引擎：一轮完整的本地/远程调和
//!
//! 顺序严格固定：列出远程 -> 清理重复 -> （有删除时）重新列出 -> 扫描本地
//! -> 比较 -> 上传/下载 -> 重命名。

use crate::config::AppConfig;
use crate::core::cleanser::{cleanse, find_duplicates, CleanseReport};
use crate::core::lister;
use crate::core::reconciler::{reconcile, ReconciliationPlan};
use crate::core::scanner::{scan, ScanFilter};
use crate::core::transfer::{BatchReport, DownloadOptions, TransferConfig, TransferExecutor, TransferProgress};
use crate::error::{Result, SyncError};
use crate::storage::{RemoteStore, S3Store};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    /// 只计算计划，不做任何修改
    DryRun,
    /// 部分条目失败，下一轮会重试
    PartiallyFailed,
    Cancelled,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_ms: u64,
    pub duplicates_deleted: Vec<String>,
    /// 需要人工检查的重复组
    pub unresolved_duplicates: Vec<String>,
    pub plan: ReconciliationPlan,
    pub transfers: BatchReport,
}

/// 同步引擎
pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    local_root: PathBuf,
    filter: ScanFilter,
    executor: TransferExecutor,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, local_root: impl Into<PathBuf>) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let executor = TransferExecutor::new(store.clone()).with_cancel(cancelled.clone());
        Self {
            store,
            local_root: local_root.into(),
            filter: ScanFilter::default(),
            executor,
            cancelled,
        }
    }

    /// 按应用配置创建 S3 存储和引擎
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = S3Store::new(&config.remote)?;
        Ok(Self::new(Arc::new(store), config.save_directory())
            .with_transfer_config(config.transfer.clone()))
    }

    pub fn with_transfer_config(mut self, config: TransferConfig) -> Self {
        self.executor = self.executor.with_config(config);
        self
    }

    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<TransferProgress>) -> Self {
        self.executor = self.executor.with_progress(tx);
        self
    }

    pub fn store(&self) -> Arc<dyn RemoteStore> {
        self.store.clone()
    }

    pub fn executor(&self) -> &TransferExecutor {
        &self.executor
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// 请求取消（在条目之间生效）
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 执行一轮同步；远程列表失败时整轮中止
    pub async fn run_pass(&self, dry_run: bool) -> Result<SyncReport> {
        let started = Instant::now();
        let start_time = chrono::Utc::now().timestamp();
        self.cancelled.store(false, Ordering::SeqCst);

        info!(
            "开始同步: {:?} <-> {}{}",
            self.local_root,
            self.store.name(),
            if dry_run { " (演练)" } else { "" }
        );

        let mut remote = lister::list(self.store.as_ref(), None, None).await?;

        let cleanse_report = if dry_run {
            let groups = find_duplicates(&remote);
            if !groups.is_empty() {
                warn!("远程有 {} 组重复对象（演练模式不清理）", groups.len());
            }
            CleanseReport {
                duplicate_groups: groups.len(),
                ..Default::default()
            }
        } else {
            cleanse(&remote, self.store.as_ref()).await
        };

        if cleanse_report.any_deleted() {
            info!("清理了重复对象，重新列出远程");
            remote = lister::list(self.store.as_ref(), None, None).await?;
        }

        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let local = self.filter.apply(scan(&self.local_root).await?);
        let remote = self.filter.apply(remote);
        let plan = reconcile(&local, &remote);

        let transfers = if dry_run || plan.is_empty() {
            BatchReport::default()
        } else {
            self.executor.apply_plan(&plan, &self.local_root).await
        };

        let status = if dry_run {
            SyncStatus::DryRun
        } else if transfers.cancelled {
            SyncStatus::Cancelled
        } else if transfers.failed > 0 || !cleanse_report.failed.is_empty() {
            SyncStatus::PartiallyFailed
        } else {
            SyncStatus::Completed
        };

        let report = SyncReport {
            status,
            start_time,
            end_time: chrono::Utc::now().timestamp(),
            duration_ms: started.elapsed().as_millis() as u64,
            duplicates_deleted: cleanse_report.deleted,
            unresolved_duplicates: cleanse_report.unresolved,
            plan,
            transfers,
        };

        info!(
            "同步结束: {:?}, 成功 {}, 失败 {}, 耗时 {}ms",
            report.status, report.transfers.succeeded, report.transfers.failed, report.duration_ms
        );
        Ok(report)
    }

    /// 从远程拉取文件到本地（可按分类过滤、随机抽样、限量）
    pub async fn download(&self, options: &DownloadOptions) -> Result<BatchReport> {
        self.cancelled.store(false, Ordering::SeqCst);
        let remote = self.filter.apply(lister::list(self.store.as_ref(), None, None).await?);
        Ok(self
            .executor
            .download_batch(&remote, &self.local_root, options)
            .await)
    }
}
