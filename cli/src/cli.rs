//! Command-line arguments.
//!
//! Every option can also be set through a `MEDIA_ARCHIVE_*` environment
//! variable; both take precedence over the `--config` file.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use media_archive_archiver::{ArchiveConfig, DedupStrategy, StorageClass};
use media_archive_directory_watcher::WatchConfig;

#[derive(Debug, Parser)]
#[command(
    name = "media-archive",
    version,
    about = "Watch a directory tree and archive every media file to S3",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Show debug level log messages.
    #[arg(short = 'd', long, global = true, env = "MEDIA_ARCHIVE_DEBUG")]
    pub debug: bool,

    /// TOML file with archive settings.
    #[arg(long, global = true, env = "MEDIA_ARCHIVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Endpoint for S3-compatible stores.
    #[arg(long, global = true, env = "MEDIA_ARCHIVE_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch the root directory and archive files (the default).
    Run(RunArgs),

    /// List the buckets visible to the configured AWS credentials.
    ListBuckets,
}

impl Cli {
    /// Arguments of the run command, whether given with or without `run`.
    pub fn run_args(&self) -> Option<&RunArgs> {
        match &self.command {
            None => Some(&self.run),
            Some(Command::Run(args)) => Some(args),
            Some(Command::ListBuckets) => None,
        }
    }
}

#[derive(Debug, Default, Clone, Args)]
pub struct RunArgs {
    /// The root directory that media files are contained under.
    #[arg(short = 'D', long, env = "MEDIA_ARCHIVE_ROOT_DIR")]
    pub root_dir: Option<PathBuf>,

    /// The name of the archive, e.g. my-photos.
    #[arg(short = 'n', long, env = "MEDIA_ARCHIVE_ARCHIVE_NAME")]
    pub archive_name: Option<String>,

    /// The S3 bucket that media files are archived to.
    #[arg(short = 'b', long = "aws-bucket", env = "MEDIA_ARCHIVE_AWS_BUCKET")]
    pub bucket: Option<String>,

    /// Storage class for uploaded objects.
    #[arg(long, env = "MEDIA_ARCHIVE_STORAGE_CLASS")]
    pub storage_class: Option<StorageClass>,

    /// How already-archived files are recognised: content-hash or relative-path.
    #[arg(long, env = "MEDIA_ARCHIVE_DEDUP")]
    pub dedup: Option<DedupStrategy>,

    /// Number of files processed at once.
    #[arg(long, env = "MEDIA_ARCHIVE_UPLOAD_CONCURRENCY")]
    pub upload_concurrency: Option<usize>,

    /// Cache database path.
    #[arg(long, env = "MEDIA_ARCHIVE_CACHE_PATH")]
    pub cache_path: Option<PathBuf>,

    /// Seconds between full rescans of the root directory.
    #[arg(long, value_name = "SECS", env = "MEDIA_ARCHIVE_RESCAN_INTERVAL")]
    pub rescan_interval: Option<u64>,

    /// Scan the whole root directory at startup.
    #[arg(long, env = "MEDIA_ARCHIVE_INITIAL_SCAN")]
    pub initial_scan: bool,

    /// Additional glob pattern to exclude (repeatable).
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Maximum directory depth below the root.
    #[arg(long, env = "MEDIA_ARCHIVE_MAX_DEPTH")]
    pub max_depth: Option<usize>,

    /// Archive symbolic links to files.
    #[arg(long, env = "MEDIA_ARCHIVE_FOLLOW_SYMLINKS")]
    pub follow_symlinks: bool,

    /// Discover and hash files without uploading or touching the cache.
    #[arg(long, env = "MEDIA_ARCHIVE_DRY_RUN")]
    pub dry_run: bool,
}

impl RunArgs {
    /// Override `config` with every option given on the command line or in
    /// the environment.
    pub fn apply(&self, config: &mut ArchiveConfig) {
        if let Some(root_dir) = &self.root_dir {
            config.root_dir = root_dir.clone();
        }
        if let Some(archive_name) = &self.archive_name {
            config.archive_name = archive_name.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(storage_class) = self.storage_class {
            config.storage_class = storage_class;
        }
        if let Some(dedup) = self.dedup {
            config.dedup = dedup;
        }
        if let Some(concurrency) = self.upload_concurrency {
            config.upload_concurrency = concurrency;
        }
        if let Some(cache_path) = &self.cache_path {
            config.cache_path = Some(cache_path.clone());
        }
        if let Some(secs) = self.rescan_interval {
            config.rescan_interval_secs = Some(secs);
        }
        if let Some(depth) = self.max_depth {
            config.max_depth = Some(depth);
        }
        if !self.exclude.is_empty() {
            let patterns = config
                .exclude_patterns
                .get_or_insert_with(|| WatchConfig::default().exclude_patterns);
            patterns.extend(self.exclude.iter().cloned());
        }
        config.initial_scan |= self.initial_scan;
        config.follow_symlinks |= self.follow_symlinks;
    }
}
