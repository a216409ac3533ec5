//! 远程重复对象清理
//!
//! 理想情况下每个近似键在远程只有一个对象，但重命名（复制+删除）中途
//! 失败会留下多个，例如：
//!
//! ```text
//! creative/20250202T105414 output_image r[3.0].png
//! creative/20250202T105414 output_image.png
//! ```
//!
//! 保留带评分的那个，删除其余的。都没有评分时不做处理，留给人工检查。

use crate::core::identity::{approximate_key, has_rating, TIMESTAMP_LEN};
use crate::storage::{ArtifactRecord, RemoteStore};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// 清理结果
#[derive(Debug, Clone, Default)]
pub struct CleanseReport {
    /// 发现重复的近似键数量
    pub duplicate_groups: usize,
    /// 已删除的对象键
    pub deleted: Vec<String>,
    /// 删除失败的对象键（下一轮再处理）
    pub failed: Vec<String>,
    /// 无法自动判断保留哪个的近似键
    pub unresolved: Vec<String>,
}

impl CleanseReport {
    pub fn any_deleted(&self) -> bool {
        !self.deleted.is_empty()
    }
}

/// 按近似键分组，只返回有重复的组
pub fn find_duplicates(records: &[ArtifactRecord]) -> BTreeMap<String, Vec<&ArtifactRecord>> {
    let mut groups: BTreeMap<String, Vec<&ArtifactRecord>> = BTreeMap::new();
    for record in records {
        let key = approximate_key(&record.name);
        // 跳过 `christmas/` 这类异常键
        if key.len() < TIMESTAMP_LEN || key.ends_with('/') {
            continue;
        }
        groups.entry(key).or_default().push(record);
    }
    groups.retain(|_, members| members.len() > 1);
    groups
}

/// 选出保留的对象：带评分的成员中最新修改的那个
fn pick_survivor<'a>(members: &[&'a ArtifactRecord]) -> Option<&'a ArtifactRecord> {
    members
        .iter()
        .filter(|r| has_rating(&r.name))
        .max_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| b.name.cmp(&a.name))
        })
        .copied()
}

/// 删除远程重复对象，返回清理结果；删除失败只记录，不中断
pub async fn cleanse(records: &[ArtifactRecord], store: &dyn RemoteStore) -> CleanseReport {
    let mut report = CleanseReport::default();

    for (key, members) in find_duplicates(records) {
        report.duplicate_groups += 1;

        let Some(survivor) = pick_survivor(&members) else {
            warn!(
                "近似键 {} 有 {} 个重复对象但都没有评分，需要人工检查: {:?}",
                key,
                members.len(),
                members.iter().map(|r| r.name.as_str()).collect::<Vec<_>>()
            );
            report.unresolved.push(key);
            continue;
        };

        info!("近似键 {} 有重复，保留 {}", key, survivor.name);
        for dupe in members.iter().filter(|r| r.name != survivor.name) {
            match store.delete(&dupe.name).await {
                Ok(()) => {
                    info!("  已删除重复对象: {}", dupe.name);
                    report.deleted.push(dupe.name.clone());
                }
                Err(e) => {
                    warn!("  删除重复对象失败 {}: {:#}", dupe.name, e);
                    report.failed.push(dupe.name.clone());
                }
            }
        }
    }

    if report.any_deleted() {
        info!("共删除 {} 个远程重复对象", report.deleted.len());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ts, FakeStore};

    #[tokio::test]
    async fn test_cleanse_keeps_rated_duplicate() {
        let store = FakeStore::new();
        store.put("creative/20250202T105414 output_image r[3.0].png", b"a");
        store.put("creative/20250202T105414 output_image.png", b"a");
        store.put("creative/20250202T105414 prompt.txt", b"p");

        let records = store.list_all().await.unwrap();
        let report = cleanse(&records, &store).await;

        assert!(report.any_deleted());
        assert_eq!(report.deleted, vec!["creative/20250202T105414 output_image.png"]);
        assert_eq!(
            store.keys(),
            vec![
                "creative/20250202T105414 output_image r[3.0].png",
                "creative/20250202T105414 prompt.txt"
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanse_is_idempotent() {
        let store = FakeStore::new();
        store.put("creative/20250202T105414 output_image r[3.0].png", b"a");
        store.put("creative/20250202T105414 output_image.png", b"a");

        let first = cleanse(&store.list_all().await.unwrap(), &store).await;
        assert_eq!(first.deleted.len(), 1);

        let second = cleanse(&store.list_all().await.unwrap(), &store).await;
        assert!(!second.any_deleted());
        assert_eq!(second.duplicate_groups, 0);
    }

    #[tokio::test]
    async fn test_cleanse_skips_unrated_groups() {
        let store = FakeStore::new();
        store.put("creative/20250202T105414 output_image.png", b"a");
        store.put("creative/20250202T105414 other.png", b"b");

        let report = cleanse(&store.list_all().await.unwrap(), &store).await;
        assert!(!report.any_deleted());
        assert_eq!(report.unresolved, vec!["creative/20250202T105414.png"]);
        assert_eq!(store.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_cleanse_prefers_newest_rating_and_tolerates_failures() {
        let store = FakeStore::new();
        store.put_at("creative/20250202T105414 img r[1.0].png", b"a", ts(10));
        store.put_at("creative/20250202T105414 img r[4.0].png", b"a", ts(20));
        store.put_at("creative/20250202T105414 img.png", b"a", ts(0));
        store.fail_on("creative/20250202T105414 img.png");

        let report = cleanse(&store.list_all().await.unwrap(), &store).await;
        assert_eq!(report.deleted, vec!["creative/20250202T105414 img r[1.0].png"]);
        assert_eq!(report.failed, vec!["creative/20250202T105414 img.png"]);
        assert!(store.get("creative/20250202T105414 img r[4.0].png").is_some());
    }

    #[test]
    fn test_find_duplicates_ignores_degenerate_keys() {
        let records = vec![
            ArtifactRecord::remote("christmas/", 0, ts(0)),
            ArtifactRecord::remote("christmas/", 0, ts(1)),
        ];
        assert!(find_duplicates(&records).is_empty());
    }
}
