//! 应用配置模块

use crate::core::transfer::{TransferConfig, MAX_RETRIES};
use crate::core::identity::{MAX_RATING, MIN_RATING};
use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

pub const DEFAULT_CONFIG_FILE: &str = "app_config.json";

/// 远程对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// 自定义端点（MinIO 等 S3 兼容服务）
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 不填时使用环境变量中的 AWS 凭证
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub root: Option<String>,
}

fn default_bucket() -> String {
    "im-im-images".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            root: None,
        }
    }
}

/// 应用配置（`app_config.json`），缺失的字段使用默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 本地产物根目录，子目录为分类
    #[serde(default = "default_save_directory")]
    pub save_directory_path: String,
    /// 当前主题，去掉 `.yaml` 后即远程分类
    #[serde(default = "default_theme")]
    pub active_theme: String,
    /// 轮播时的最低评分（同步本身不使用）
    #[serde(default)]
    pub min_rating: f64,
    /// 本地保留的最多文件数
    #[serde(default = "default_max_saved_files")]
    pub max_num_saved_files: usize,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_save_directory() -> String {
    "image_out".to_string()
}

fn default_theme() -> String {
    "creative".to_string()
}

fn default_max_saved_files() -> usize {
    200
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            save_directory_path: default_save_directory(),
            active_theme: default_theme(),
            min_rating: 0.0,
            max_num_saved_files: default_max_saved_files(),
            remote: RemoteConfig::default(),
            transfer: TransferConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 加载配置文件，不存在时写入默认配置
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("配置文件不存在，创建默认配置: {:?}", path);
            Self::default().save(path)?;
        }

        let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("{:?}: {}", path, e)))?;
        debug!("已加载配置: {:?}", config);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::Config(e.to_string()))?;
        fs::write(path, content).map_err(|e| SyncError::io(path, e))
    }

    /// 校验配置，一次性报告所有问题
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.save_directory_path.trim().is_empty() {
            errors.push("save_directory_path 不能为空".to_string());
        }
        if self.category().is_empty() {
            errors.push("active_theme 不能为空".to_string());
        }
        if !(MIN_RATING..=MAX_RATING).contains(&self.min_rating) {
            errors.push(format!(
                "min_rating 必须在 {:.1} 到 {:.1} 之间: {}",
                MIN_RATING, MAX_RATING, self.min_rating
            ));
        }
        if self.max_num_saved_files == 0 {
            errors.push("max_num_saved_files 必须大于 0".to_string());
        }
        if self.transfer.max_retries > MAX_RETRIES {
            errors.push(format!(
                "transfer.max_retries 不能超过 {}: {}",
                MAX_RETRIES, self.transfer.max_retries
            ));
        }
        if self.remote.bucket.trim().is_empty() {
            errors.push("remote.bucket 不能为空".to_string());
        }
        if self.remote.access_key.is_some() != self.remote.secret_key.is_some() {
            errors.push("remote.access_key 和 remote.secret_key 必须同时设置".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Config(errors.join("; ")))
        }
    }

    /// 远程分类名
    pub fn category(&self) -> &str {
        let theme = self.active_theme.trim();
        theme.strip_suffix(".yaml").unwrap_or(theme)
    }

    pub fn save_directory(&self) -> PathBuf {
        PathBuf::from(&self.save_directory_path)
    }

    /// 当前分类的本地目录
    pub fn category_directory(&self) -> PathBuf {
        self.save_directory().join(self.category())
    }
}

/// 配置缓存：文件修改后或超过最长缓存时间才重新加载
#[derive(Debug)]
pub struct ConfigCache {
    path: PathBuf,
    max_age: Duration,
    data: Option<AppConfig>,
    last_loaded_at: Option<SystemTime>,
}

impl ConfigCache {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
            data: None,
            last_loaded_at: None,
        }
    }

    /// 判断是否需要重新加载（纯函数，时间由调用方传入）
    pub fn is_stale(&self, now: SystemTime, file_mtime: Option<SystemTime>) -> bool {
        let (Some(_), Some(loaded_at)) = (&self.data, self.last_loaded_at) else {
            return true;
        };
        if file_mtime.is_some_and(|mtime| mtime > loaded_at) {
            return true;
        }
        now.duration_since(loaded_at)
            .map(|age| age > self.max_age)
            .unwrap_or(false)
    }

    pub fn get(&mut self) -> Result<&AppConfig> {
        let file_mtime = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        let now = SystemTime::now();

        if self.is_stale(now, file_mtime) {
            debug!("配置缓存失效，重新加载: {:?}", self.path);
            self.data = Some(AppConfig::load(&self.path)?);
            self.last_loaded_at = Some(now);
        }

        self.data
            .as_ref()
            .ok_or_else(|| SyncError::Config("配置未加载".to_string()))
    }

    pub fn invalidate(&mut self) {
        self.data = None;
        self.last_loaded_at = None;
    }
}
