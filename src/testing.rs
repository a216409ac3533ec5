//! 测试用的内存存储，可注入失败

use crate::storage::{ArtifactRecord, ObjectMeta, RemoteStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_735_725_600 + secs, 0).unwrap()
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, (Vec<u8>, DateTime<Utc>)>,
    failing_keys: HashSet<String>,
    /// 前 N 次调用失败，之后成功
    flaky_keys: HashMap<String, usize>,
    fail_listing: bool,
    deleted: Vec<String>,
    uploaded: Vec<String>,
}

#[derive(Default)]
pub struct FakeStore {
    inner: Mutex<Inner>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, data: &[u8]) {
        self.put_at(key, data, ts(0));
    }

    pub fn put_at(&self, key: &str, data: &[u8], at: DateTime<Utc>) {
        self.inner
            .lock()
            .unwrap()
            .objects
            .insert(key.to_string(), (data.to_vec(), at));
    }

    pub fn fail_listing(&self, fail: bool) {
        self.inner.lock().unwrap().fail_listing = fail;
    }

    pub fn fail_on(&self, key: &str) {
        self.inner.lock().unwrap().failing_keys.insert(key.to_string());
    }

    pub fn fail_times(&self, key: &str, times: usize) {
        self.inner
            .lock()
            .unwrap()
            .flaky_keys
            .insert(key.to_string(), times);
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|(d, _)| d.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.inner.lock().unwrap().uploaded.clone()
    }

    fn check(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_keys.contains(key) {
            return Err(anyhow!("injected failure for {}", key));
        }
        if let Some(remaining) = inner.flaky_keys.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("transient failure for {}", key));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn list_all(&self) -> Result<Vec<ArtifactRecord>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_listing {
            return Err(anyhow!("access denied"));
        }
        Ok(inner
            .objects
            .iter()
            .map(|(k, (d, at))| ArtifactRecord::remote(k.clone(), d.len() as u64, *at))
            .collect())
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.check(key)?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|(d, at)| ObjectMeta {
                size: d.len() as u64,
                last_modified: *at,
            }))
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<u64> {
        self.check(key)?;
        let data = std::fs::read(local_path)?;
        let size = data.len() as u64;
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(key.to_string(), (data, Utc::now()));
        inner.uploaded.push(key.to_string());
        Ok(size)
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<u64> {
        self.check(key)?;
        let data = self
            .get(key)
            .ok_or_else(|| anyhow!("no such key {}", key))?;
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local_path, &data)?;
        Ok(data.len() as u64)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(key)?;
        let mut inner = self.inner.lock().unwrap();
        inner.objects.remove(key);
        inner.deleted.push(key.to_string());
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        let mut inner = self.inner.lock().unwrap();
        let value = inner
            .objects
            .get(from)
            .cloned()
            .ok_or_else(|| anyhow!("no such key {}", from))?;
        inner.objects.insert(to.to_string(), value);
        Ok(())
    }

    fn name(&self) -> &str {
        "fake://"
    }
}
