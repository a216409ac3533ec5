use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use imim_sync::config::{AppConfig, DEFAULT_CONFIG_FILE};
use imim_sync::core::rating::{find_rated_files, SortOrder};
use imim_sync::core::scanner::{pick_random_image, prune_oldest};
use imim_sync::core::transfer::{DownloadOptions, TransferProgress};
use imim_sync::logging::init_logging;
use imim_sync::{RatingManager, SyncEngine};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[clap(author, version, about = "Sync generated image artifacts with an S3 bucket", long_about = None)]
struct Cli {
    #[clap(short, long, default_value = DEFAULT_CONFIG_FILE, help = "Path to app_config.json")]
    config: PathBuf,
    #[clap(short, long, help = "Print debug logs")]
    verbose: bool,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[clap(about = "Run one reconciliation pass between the save directory and the bucket")]
    Sync {
        #[clap(long, help = "Only print the plan, change nothing")]
        dry_run: bool,
    },
    #[clap(about = "Download objects from the bucket")]
    Download {
        #[clap(long, default_value_t = 0, help = "Maximum number of files (0 = all)")]
        max: usize,
        #[clap(long, help = "Pick files in random order")]
        random: bool,
        #[clap(long, help = "Only download this category")]
        category: Option<String>,
    },
    #[clap(about = "Rate a file and its companions")]
    Rate { path: PathBuf, rating: f64 },
    #[clap(about = "List rated files of the active category")]
    Rated {
        #[clap(long, default_value_t = 0.0)]
        min: f64,
        #[clap(long, default_value_t = 5.0)]
        max: f64,
        #[clap(long, value_enum, default_value_t = SortArg::Desc)]
        sort: SortArg,
    },
    #[clap(about = "Upload freshly generated files under the active category")]
    Publish {
        #[clap(num_args = 1.., required = true)]
        files: Vec<PathBuf>,
    },
    #[clap(about = "Print a random local image of the active category")]
    Random,
    #[clap(about = "Delete the oldest local files beyond the retention limit")]
    Prune {
        #[clap(long, help = "Files to keep (default: max_num_saved_files)")]
        keep: Option<usize>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SortArg {
    Asc,
    Desc,
    Random,
    Unsorted,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Asc => SortOrder::Ascending,
            SortArg::Desc => SortOrder::Descending,
            SortArg::Random => SortOrder::Random,
            SortArg::Unsorted => SortOrder::Unsorted,
        }
    }
}

/// 进度条：消费传输进度通道直到发送端全部关闭
fn spawn_progress_bar() -> Result<(mpsc::UnboundedSender<TransferProgress>, JoinHandle<()>)> {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .context("无效的进度条模板")?
    .progress_chars("=> ");

    let (tx, mut rx) = mpsc::unbounded_channel::<TransferProgress>();
    let handle = tokio::spawn(async move {
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        while let Some(progress) = rx.recv().await {
            bar.set_length(progress.total as u64);
            bar.set_position((progress.completed + progress.failed) as u64);
            bar.set_message(progress.current);
        }
        bar.finish_and_clear();
    });
    Ok((tx, handle))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("加载配置失败: {:?}", cli.config))?;
    init_logging(&config.log, cli.verbose).context("初始化日志失败")?;
    config.validate()?;

    let save_dir = config.save_directory();
    std::fs::create_dir_all(&save_dir).with_context(|| format!("创建目录失败: {:?}", save_dir))?;

    match cli.command {
        Commands::Sync { dry_run } => {
            let (tx, bar) = spawn_progress_bar()?;
            let engine = SyncEngine::from_config(&config)?.with_progress(tx);
            let report = engine.run_pass(dry_run).await;
            drop(engine);
            let _ = bar.await;

            let report = report?;
            if dry_run {
                println!("{}", serde_json::to_string_pretty(&report.plan)?);
            }
            for mismatch in &report.plan.mismatches {
                println!(
                    "需要人工检查: 本地 {} / 远程 {}",
                    mismatch.local_name, mismatch.remote_name
                );
            }
            for key in &report.unresolved_duplicates {
                println!("远程重复且无评分: {}", key);
            }
            println!(
                "{:?}: 成功 {} 失败 {} 跳过 {} ({} 字节)",
                report.status,
                report.transfers.succeeded,
                report.transfers.failed,
                report.transfers.skipped,
                report.transfers.bytes
            );
        }
        Commands::Download { max, random, category } => {
            let (tx, bar) = spawn_progress_bar()?;
            let engine = SyncEngine::from_config(&config)?.with_progress(tx);
            let options = DownloadOptions {
                max_count: max,
                randomize: random,
                category_filter: category.unwrap_or_default(),
            };
            let report = engine.download(&options).await;
            drop(engine);
            let _ = bar.await;

            let report = report?;
            println!("下载完成: 成功 {} 失败 {}", report.succeeded, report.failed);
        }
        Commands::Rate { path, rating } => {
            let engine = SyncEngine::from_config(&config)?;
            let mut manager = RatingManager::new(engine.store());
            for renamed in manager.rate(&path, rating).await? {
                println!("{}", renamed.display());
            }
        }
        Commands::Rated { min, max, sort } => {
            let files = find_rated_files(&config.category_directory(), (min, max), sort.into())?;
            for file in files {
                println!("{}", file.display());
            }
        }
        Commands::Publish { files } => {
            let engine = SyncEngine::from_config(&config)?;
            let report = engine
                .executor()
                .publish_artifacts(&files, config.category())
                .await;
            println!("上传完成: 成功 {} 失败 {}", report.succeeded, report.failed);
        }
        Commands::Random => match pick_random_image(&config.category_directory()) {
            Some(path) => println!("{}", path.display()),
            None => println!("没有可用的图片"),
        },
        Commands::Prune { keep } => {
            let keep = keep.unwrap_or(config.max_num_saved_files);
            let deleted = prune_oldest(&config.category_directory(), keep)?;
            println!("删除了 {} 个旧文件", deleted.len());
        }
    }

    Ok(())
}
