//! 日志模块 - 文件日志（按大小轮转）和控制台输出

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "imim-sync.log";
/// 未设置 `RUST_LOG` 时压低这些依赖的输出
const QUIET_TARGETS: [&str; 3] = ["opendal=warn", "hyper=warn", "reqwest=warn"];

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否写日志文件
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_directory")]
    pub directory: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

fn default_directory() -> String {
    "logs".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
            directory: default_directory(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

type SharedFile = Arc<Mutex<Option<BufWriter<File>>>>;

/// 按大小轮转的日志文件，超过上限时改名为 `.old` 后重新打开
#[derive(Clone)]
pub struct RotatingLogWriter {
    path: PathBuf,
    max_size: u64,
    file: SharedFile,
}

impl RotatingLogWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(LOG_FILE_NAME);
        let max_size = u64::from(max_size_mb) * 1024 * 1024;

        if fs::metadata(&path).map(|m| m.len() > max_size).unwrap_or(false) {
            rotate(&path)?;
        }
        let file = open_append(&path)?;

        Ok(Self {
            path,
            max_size,
            file: Arc::new(Mutex::new(Some(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn rotate(path: &Path) -> io::Result<()> {
    let backup = path.with_extension("log.old");
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    fs::rename(path, &backup)
}

fn lock(file: &SharedFile) -> io::Result<MutexGuard<'_, Option<BufWriter<File>>>> {
    file.lock()
        .map_err(|_| io::Error::other("日志写入器锁已损坏"))
}

/// 单次写入的句柄
pub struct RotatingHandle {
    path: PathBuf,
    max_size: u64,
    file: SharedFile,
}

impl Write for RotatingHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = lock(&self.file)?;
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::other("日志文件不可用"))?;
        let written = writer.write(buf)?;
        writer.flush()?;

        let size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if size > self.max_size {
            guard.take();
            rotate(&self.path)?;
            *guard = Some(open_append(&self.path)?);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match lock(&self.file)?.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RotatingLogWriter {
    type Writer = RotatingHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingHandle {
            path: self.path.clone(),
            max_size: self.max_size,
            file: self.file.clone(),
        }
    }
}

/// 构造过滤器：给出 `rust_log` 时完全按它来，否则用默认级别并压低依赖噪音
fn build_filter(level: tracing::Level, rust_log: Option<&str>) -> io::Result<EnvFilter> {
    let builder = EnvFilter::builder().with_default_directive(level.into());
    match rust_log {
        Some(directives) => Ok(builder.parse_lossy(directives)),
        None => {
            let mut filter = builder.parse_lossy("");
            for target in QUIET_TARGETS {
                filter = filter.add_directive(target.parse::<Directive>().map_err(io::Error::other)?);
            }
            Ok(filter)
        }
    }
}

/// 初始化日志：控制台始终输出，启用时额外写文件
///
/// `RUST_LOG` 优先于配置中的级别，包括依赖库的级别。
pub fn init_logging(config: &LogConfig, verbose: bool) -> io::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = build_filter(level, rust_log.as_deref())?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);

    let file_layer = if config.enabled {
        let writer = RotatingLogWriter::new(Path::new(&config.directory), config.max_size_mb)?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}
