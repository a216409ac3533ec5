use crate::error::{Result, SyncError};
use crate::storage::{ArtifactRecord, RemoteStore};
use tracing::{error, info};

/// 按修改时间排序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOrder {
    Ascending,
    Descending,
}

/// 列出远程桶中的全部对象
///
/// 列表失败时返回 `SyncError::Listing`，不会退化成空列表：空列表会让
/// 调和器把所有本地文件排进上传队列。
pub async fn list(
    store: &dyn RemoteStore,
    extension_filter: Option<&str>,
    order: Option<TimeOrder>,
) -> Result<Vec<ArtifactRecord>> {
    let mut records = match store.list_all().await {
        Ok(records) => records,
        Err(e) => {
            error!("列出远程存储失败 {}: {:#}", store.name(), e);
            return Err(SyncError::Listing(format!("{}: {:#}", store.name(), e)));
        }
    };
    info!("远程列表返回 {} 个对象 ({})", records.len(), store.name());

    if let Some(suffix) = extension_filter {
        let suffix = suffix.to_lowercase();
        records.retain(|r| r.name.to_lowercase().ends_with(&suffix));
    }

    match order {
        Some(TimeOrder::Ascending) => records.sort_by(|a, b| a.last_modified.cmp(&b.last_modified)),
        Some(TimeOrder::Descending) => records.sort_by(|a, b| b.last_modified.cmp(&a.last_modified)),
        None => {}
    }

    Ok(records)
}
