//! 本地与远程清单的三方比较
//!
//! 以近似键为连接键：只在本地的上传，只在远程的下载，两边都有但名字不同的
//! 根据评分标记决定重命名哪一边。

use crate::core::identity::{approximate_key, has_rating};
use crate::storage::ArtifactRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// 近似键集合划分
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySets {
    pub only_local: BTreeSet<String>,
    pub only_remote: BTreeSet<String>,
    pub in_both: BTreeSet<String>,
}

/// 重命名动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

/// 名字不一致但无法判断以哪边为准
#[derive(Debug, Clone, Serialize)]
pub struct Mismatch {
    pub key: String,
    pub local_name: String,
    pub remote_name: String,
}

/// 各集合的大小
#[derive(Debug, Clone, Default, Serialize)]
pub struct SetCounts {
    pub local: usize,
    pub remote: usize,
    pub only_local: usize,
    pub only_remote: usize,
    pub in_both: usize,
}

/// 调和计划，可在执行前用于演练输出
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationPlan {
    pub copy_up: Vec<ArtifactRecord>,
    pub copy_down: Vec<ArtifactRecord>,
    /// 远程重命名为本地名字
    pub rename_remote: Vec<Rename>,
    /// 本地重命名为远程名字
    pub rename_local: Vec<Rename>,
    pub mismatches: Vec<Mismatch>,
    pub counts: SetCounts,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.copy_up.is_empty()
            && self.copy_down.is_empty()
            && self.rename_remote.is_empty()
            && self.rename_local.is_empty()
    }

    pub fn total_actions(&self) -> usize {
        self.copy_up.len() + self.copy_down.len() + self.rename_remote.len() + self.rename_local.len()
    }
}

/// 近似键 -> 记录；同一侧出现冲突时后者覆盖前者
fn index_by_key(records: &[ArtifactRecord]) -> BTreeMap<String, &ArtifactRecord> {
    let mut map = BTreeMap::new();
    for record in records {
        if let Some(previous) = map.insert(approximate_key(&record.name), record) {
            debug!("同一侧近似键冲突，{} 覆盖 {}", record.name, previous.name);
        }
    }
    map
}

fn split_keys(
    local: &BTreeMap<String, &ArtifactRecord>,
    remote: &BTreeMap<String, &ArtifactRecord>,
) -> KeySets {
    let local_keys: BTreeSet<String> = local.keys().cloned().collect();
    let remote_keys: BTreeSet<String> = remote.keys().cloned().collect();

    KeySets {
        only_local: local_keys.difference(&remote_keys).cloned().collect(),
        only_remote: remote_keys.difference(&local_keys).cloned().collect(),
        in_both: local_keys.intersection(&remote_keys).cloned().collect(),
    }
}

/// 计算三个近似键集合
pub fn diff_keys(local: &[ArtifactRecord], remote: &[ArtifactRecord]) -> KeySets {
    split_keys(&index_by_key(local), &index_by_key(remote))
}

/// 比较本地与远程清单，生成调和计划
pub fn reconcile(local: &[ArtifactRecord], remote: &[ArtifactRecord]) -> ReconciliationPlan {
    let local_dict = index_by_key(local);
    let remote_dict = index_by_key(remote);
    let sets = split_keys(&local_dict, &remote_dict);

    let mut plan = ReconciliationPlan {
        counts: SetCounts {
            local: local_dict.len(),
            remote: remote_dict.len(),
            only_local: sets.only_local.len(),
            only_remote: sets.only_remote.len(),
            in_both: sets.in_both.len(),
        },
        ..Default::default()
    };

    plan.copy_up = sets
        .only_local
        .iter()
        .map(|k| local_dict[k].clone())
        .collect();
    plan.copy_down = sets
        .only_remote
        .iter()
        .map(|k| remote_dict[k].clone())
        .collect();

    for key in &sets.in_both {
        let local_item = local_dict[key];
        let remote_item = remote_dict[key];
        if local_item.name == remote_item.name {
            continue;
        }

        if has_rating(&local_item.name) {
            // 本地有评分，远程改成本地的名字
            plan.rename_remote.push(Rename {
                from: remote_item.name.clone(),
                to: local_item.name.clone(),
            });
        } else if has_rating(&remote_item.name) {
            plan.rename_local.push(Rename {
                from: local_item.name.clone(),
                to: remote_item.name.clone(),
            });
        } else {
            warn!(
                "本地与远程文件名不一致且无评分可判断，跳过: 本地={} 远程={}",
                local_item.name, remote_item.name
            );
            plan.mismatches.push(Mismatch {
                key: key.clone(),
                local_name: local_item.name.clone(),
                remote_name: remote_item.name.clone(),
            });
        }
    }

    info!(
        "集合信息: 本地 {} / 远程 {} / 仅本地 {} / 仅远程 {} / 两边都有 {}",
        plan.counts.local,
        plan.counts.remote,
        plan.counts.only_local,
        plan.counts.only_remote,
        plan.counts.in_both
    );
    info!(
        "计划: 上传 {}, 下载 {}, 远程重命名 {}, 本地重命名 {}, 待人工检查 {}",
        plan.copy_up.len(),
        plan.copy_down.len(),
        plan.rename_remote.len(),
        plan.rename_local.len(),
        plan.mismatches.len()
    );

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ts;

    fn local(name: &str) -> ArtifactRecord {
        ArtifactRecord::local(name, 1, ts(0))
    }

    fn remote(name: &str) -> ArtifactRecord {
        ArtifactRecord::remote(name, 1, ts(0))
    }

    #[test]
    fn test_remote_rating_renames_local() {
        let plan = reconcile(
            &[local("creative/20250101T100000_img.png")],
            &[remote("creative/20250101T100000_img r[4.0].png")],
        );

        assert!(plan.copy_up.is_empty());
        assert!(plan.copy_down.is_empty());
        assert!(plan.rename_remote.is_empty());
        assert_eq!(
            plan.rename_local,
            vec![Rename {
                from: "creative/20250101T100000_img.png".to_string(),
                to: "creative/20250101T100000_img r[4.0].png".to_string(),
            }]
        );
        assert_eq!(plan.counts.in_both, 1);
    }

    #[test]
    fn test_local_rating_renames_remote() {
        let plan = reconcile(
            &[local("creative/20250101T100000_img r[2.5].png")],
            &[remote("creative/20250101T100000_img r[4.0].png")],
        );
        assert_eq!(plan.rename_remote.len(), 1);
        assert_eq!(plan.rename_remote[0].from, "creative/20250101T100000_img r[4.0].png");
        assert_eq!(plan.rename_remote[0].to, "creative/20250101T100000_img r[2.5].png");
        assert!(plan.rename_local.is_empty());
    }

    #[test]
    fn test_copy_up_and_down() {
        let plan = reconcile(
            &[
                local("creative/20250101T100000_img.png"),
                local("creative/20250101T100000_prompt.txt"),
            ],
            &[
                remote("creative/20250101T100000_img.png"),
                remote("halloween/20250218T160340_img.png"),
            ],
        );
        assert_eq!(plan.copy_up.len(), 1);
        assert_eq!(plan.copy_up[0].name, "creative/20250101T100000_prompt.txt");
        assert_eq!(plan.copy_down.len(), 1);
        assert_eq!(plan.copy_down[0].name, "halloween/20250218T160340_img.png");
        assert_eq!(plan.total_actions(), 2);
    }

    #[test]
    fn test_unrated_mismatch_is_reported_not_acted_on() {
        let plan = reconcile(
            &[local("creative/20250101T100000_img.png")],
            &[remote("creative/20250101T100000_image.png")],
        );
        assert!(plan.is_empty());
        assert_eq!(plan.mismatches.len(), 1);
        assert_eq!(plan.mismatches[0].key, "creative/20250101T100000.png");
    }

    #[test]
    fn test_every_key_lands_in_exactly_one_set() {
        let local_records: Vec<_> = (0..20)
            .filter(|i| i % 3 != 0)
            .map(|i| local(&format!("c{}/20250101T1000{:02}_img.png", i % 2, i)))
            .collect();
        let remote_records: Vec<_> = (0..20)
            .filter(|i| i % 2 == 0)
            .map(|i| remote(&format!("c{}/20250101T1000{:02}_img r[1.0].png", i % 2, i)))
            .collect();

        let sets = diff_keys(&local_records, &remote_records);
        let all: BTreeSet<String> = local_records
            .iter()
            .chain(remote_records.iter())
            .map(|r| approximate_key(&r.name))
            .collect();

        for key in &all {
            let hits = [&sets.only_local, &sets.only_remote, &sets.in_both]
                .iter()
                .filter(|s| s.contains(key))
                .count();
            assert_eq!(hits, 1, "{}", key);
        }
        assert_eq!(
            sets.only_local.len() + sets.only_remote.len() + sets.in_both.len(),
            all.len()
        );
    }
}
