pub mod cleanser;
pub mod engine;
pub mod identity;
pub mod lister;
pub mod rating;
pub mod reconciler;
pub mod scanner;
pub mod transfer;

pub use cleanser::{cleanse, find_duplicates, CleanseReport};
pub use engine::{SyncEngine, SyncReport, SyncStatus};
pub use identity::{approximate_key, has_rating, is_image_file, parse_rating, with_rating};
pub use lister::{list, TimeOrder};
pub use rating::{find_rated_files, find_unrated_files, RatingManager, RatingSession, SortOrder};
pub use reconciler::{diff_keys, reconcile, KeySets, ReconciliationPlan, Rename};
pub use scanner::{pick_random_image, prune_oldest, scan, ScanFilter};
pub use transfer::{BatchReport, DownloadOptions, TransferConfig, TransferExecutor, TransferProgress};
