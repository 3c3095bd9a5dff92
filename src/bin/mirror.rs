//! bucket-mirror polling driver
//!
//! Run with: bucket-mirror --bucket my-bucket --local-dir ~/mirror

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bucket_mirror::error::Result;
use bucket_mirror::local::LoggingListener;
use bucket_mirror::remote::S3RemoteStore;
use bucket_mirror::{InboundSynchronizer, SyncCheckpoint, SyncConfig, SyncOutcome};

type Synchronizer = InboundSynchronizer<S3RemoteStore>;

#[derive(Parser, Debug)]
#[command(name = "bucket-mirror")]
#[command(about = "Mirror an S3 bucket prefix into a local directory")]
#[command(version)]
struct Args {
    /// Bucket to mirror
    #[arg(long, env = "BUCKET_MIRROR_BUCKET")]
    bucket: String,

    /// Remote folder (key prefix); "/" or empty for the whole bucket
    #[arg(long, env = "BUCKET_MIRROR_REMOTE_FOLDER")]
    remote_folder: Option<String>,

    /// Local directory receiving the files
    #[arg(long, env = "BUCKET_MIRROR_LOCAL_DIR")]
    local_dir: String,

    /// Custom S3 endpoint (R2, MinIO)
    #[arg(long, env = "BUCKET_MIRROR_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Objects per listing page
    #[arg(long, env = "BUCKET_MIRROR_PAGE_SIZE", default_value = "10")]
    page_size: usize,

    /// Listing pages per poll
    #[arg(long, env = "BUCKET_MIRROR_MAX_BATCHES", default_value = "2")]
    max_batches: usize,

    /// Suffix of staging files
    #[arg(long, env = "BUCKET_MIRROR_TEMP_SUFFIX", default_value = ".writing")]
    temp_suffix: String,

    /// Create missing local directories
    #[arg(long, env = "BUCKET_MIRROR_CREATE_DIRS")]
    create_dirs: bool,

    /// Mirror keys nested below the remote folder
    #[arg(long, env = "BUCKET_MIRROR_ACCEPT_SUBFOLDERS")]
    accept_subfolders: bool,

    /// Only mirror file names matching this wildcard
    #[arg(long, env = "BUCKET_MIRROR_WILDCARD", conflicts_with = "regex")]
    wildcard: Option<String>,

    /// Only mirror file names matching this regex
    #[arg(long, env = "BUCKET_MIRROR_REGEX")]
    regex: Option<String>,

    /// Seconds between polls
    #[arg(long, env = "BUCKET_MIRROR_INTERVAL", default_value = "60")]
    interval_secs: u64,

    /// Run a single poll and exit
    #[arg(long)]
    once: bool,

    /// File persisting the listing cursor between restarts
    #[arg(long, env = "BUCKET_MIRROR_CHECKPOINT")]
    checkpoint: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "BUCKET_MIRROR_LOG_JSON")]
    log_json: bool,
}

/// What one poll needs, owned so it can move onto a blocking thread
#[derive(Clone)]
struct PollTarget {
    local_dir: PathBuf,
    bucket: String,
    remote_folder: Option<String>,
    checkpoint: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout stays free for scripting
    let plain = (!args.log_json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
    });
    let json = args.log_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SyncConfig {
        page_size: args.page_size,
        max_batches_per_run: args.max_batches,
        temp_file_suffix: args.temp_suffix.clone(),
        create_directories_if_missing: args.create_dirs,
        accept_subfolders: args.accept_subfolders,
        file_name_wildcard: args.wildcard.clone(),
        file_name_regex: args.regex.clone(),
    };

    let target = PollTarget {
        local_dir: expand(&args.local_dir),
        bucket: args.bucket.clone(),
        remote_folder: args
            .remote_folder
            .clone()
            .filter(|folder| !folder.trim().is_empty()),
        checkpoint: args.checkpoint.as_deref().map(expand),
    };

    if config.creates_directories() && !target.local_dir.exists() {
        std::fs::create_dir_all(&target.local_dir)?;
        tracing::info!(directory = %target.local_dir.display(), "Created local directory");
    }

    let store = S3RemoteStore::from_env(args.endpoint_url.as_deref()).await?;
    let sync = Arc::new(InboundSynchronizer::new(store, config)?.with_listener(LoggingListener));

    if let Some(path) = &target.checkpoint {
        match SyncCheckpoint::load(path)? {
            Some(checkpoint)
                if checkpoint.matches(&target.bucket, target.remote_folder.as_deref()) =>
            {
                checkpoint.apply(&sync)?;
                tracing::info!(cursor = ?checkpoint.cursor, "Resuming from checkpoint");
            }
            Some(_) => {
                tracing::warn!(
                    path = %path.display(),
                    "Checkpoint belongs to another mirror, ignoring"
                );
            }
            None => {}
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    loop {
        if until_shutdown(ticker.tick(), shutdown_signal()).await.is_none() {
            break;
        }
        if until_shutdown(poll(sync.clone(), target.clone()), shutdown_signal())
            .await
            .is_none()
        {
            // Partial downloads only ever live in staging files
            std::process::exit(130);
        }
        if args.once {
            break;
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Drive `work` unless `shutdown` resolves first
async fn until_shutdown<T>(
    work: impl Future<Output = T>,
    shutdown: impl Future<Output = ()>,
) -> Option<T> {
    tokio::select! {
        out = work => Some(out),
        _ = shutdown => None,
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Run one synchronize call on a blocking thread and log the result
async fn poll(sync: Arc<Synchronizer>, target: PollTarget) {
    let task = tokio::task::spawn_blocking(move || {
        let outcome = sync.synchronize(
            &target.local_dir,
            &target.bucket,
            target.remote_folder.as_deref(),
        )?;
        if let (SyncOutcome::Completed(_), Some(path)) = (&outcome, &target.checkpoint) {
            SyncCheckpoint::capture(&sync, &target.bucket, target.remote_folder.as_deref())
                .save(path)?;
        }
        Ok::<_, bucket_mirror::MirrorError>(outcome)
    });

    match task.await {
        Ok(Ok(SyncOutcome::Completed(report))) => {
            tracing::info!(
                pages = report.pages,
                listed = report.listed,
                downloaded = report.downloaded,
                unchanged = report.unchanged,
                failed = report.failed,
                exhausted = report.exhausted,
                "Poll finished"
            );
        }
        Ok(Ok(SyncOutcome::AlreadyRunning)) => {
            tracing::debug!("Previous poll still running");
        }
        Ok(Err(e)) if e.is_retryable() => {
            tracing::warn!("Poll failed, retrying next interval: {}", e);
        }
        Ok(Err(e)) => {
            tracing::error!("Poll failed: {}", e);
        }
        Err(e) => {
            tracing::error!("Poll task panicked: {}", e);
        }
    }
}
