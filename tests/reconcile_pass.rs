use imim_sync::core::engine::SyncStatus;
use imim_sync::{RatingManager, RemoteStore, S3Store, SyncEngine};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn write(root: &Path, name: &str, data: &[u8]) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

async fn seed(store: &S3Store, scratch: &Path, key: &str, data: &[u8]) {
    let path = scratch.join("seed.bin");
    fs::write(&path, data).unwrap();
    store.upload(&path, key).await.unwrap();
}

async fn remote_keys(store: &dyn RemoteStore) -> Vec<String> {
    let mut keys: Vec<String> = store
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn full_pass_then_rating_then_pass_converges() {
    let local = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let store = Arc::new(S3Store::in_memory().unwrap());

    write(local.path(), "creative/20250101T100000_img.png", b"image");
    write(local.path(), "creative/20250101T100000_prompt.txt", b"prompt");
    write(local.path(), "creative/20250101T110000_img.png", b"other");

    seed(&store, scratch.path(), "creative/20250101T110000_img r[4.0].png", b"other").await;
    seed(&store, scratch.path(), "halloween/20250218T160340_img r[2.0].png", b"pumpkin").await;
    seed(&store, scratch.path(), "halloween/20250218T160340_img.png", b"pumpkin").await;

    let engine = SyncEngine::new(store.clone(), local.path());
    let report = engine.run_pass(false).await.unwrap();

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.duplicates_deleted, vec!["halloween/20250218T160340_img.png"]);
    assert_eq!(report.plan.copy_up.len(), 2);
    assert_eq!(report.plan.copy_down.len(), 1);
    assert_eq!(report.plan.rename_local.len(), 1);
    assert!(local
        .path()
        .join("creative/20250101T110000_img r[4.0].png")
        .exists());
    assert!(local
        .path()
        .join("halloween/20250218T160340_img r[2.0].png")
        .exists());

    // 评分后远程跟随改名，下一轮没有任何动作
    let mut manager = RatingManager::new(store.clone());
    let renamed = manager
        .rate(&local.path().join("creative/20250101T100000_img.png"), 3.4)
        .await
        .unwrap();
    assert_eq!(renamed.len(), 2);

    assert_eq!(
        remote_keys(store.as_ref()).await,
        vec![
            "creative/20250101T100000_img r[3.4].png",
            "creative/20250101T100000_prompt r[3.4].txt",
            "creative/20250101T110000_img r[4.0].png",
            "halloween/20250218T160340_img r[2.0].png",
        ]
    );

    let second = engine.run_pass(false).await.unwrap();
    assert!(second.plan.is_empty(), "{:?}", second.plan);
    assert!(second.plan.mismatches.is_empty());
}
