//! Sync Engine - Mirrors lecture videos to local storage with bounded parallelism
//!
//! Every [`WorkItem`] handed to [`SyncEngine::sync_batch`] is attempted exactly
//! once and yields exactly one [`SyncRecord`], whatever happens to its siblings.
//! The remote filename only arrives with the download response, so the
//! existence check runs once headers are in; an existing file aborts the
//! transfer and is never rewritten.
//!
//! With `atomic_writes` off, a transfer that dies midway leaves a truncated file
//! behind that a later run will take for a finished one.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CoursyncError;

/// One video destined for one course directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub directory: PathBuf,
    pub video_url: String,
    /// Human readable identifier used in progress messages
    pub label: String,
}

/// A download whose headers have arrived but whose body is still in flight
pub struct VideoDownload {
    /// The `Content-Disposition` value, if the response carried one
    pub content_disposition: Option<String>,
    pub body: BoxStream<'static, Result<Bytes, CoursyncError>>,
}

impl std::fmt::Debug for VideoDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoDownload")
            .field("content_disposition", &self.content_disposition)
            .finish_non_exhaustive()
    }
}

/// Source of video bytes for the engine
///
/// Implemented by [`crate::Session`]; tests substitute instrumented fetchers.
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    /// Fail with [`CoursyncError::SessionExpired`] if requests would be rejected
    fn ensure_active(&self) -> Result<(), CoursyncError>;

    /// Start downloading `video_url`, returning once response headers are in
    async fn start_download(&self, video_url: &str) -> Result<VideoDownload, CoursyncError>;
}

/// Outcome of one work item
#[derive(Debug)]
pub enum SyncResult {
    /// A file with the remote name already existed and was left untouched
    AlreadyPresent { path: PathBuf },
    /// The video was downloaded in full
    Downloaded { path: PathBuf, bytes: u64 },
    /// The item failed; no retry is attempted
    Failed { error: CoursyncError },
}

impl SyncResult {
    pub fn path(&self) -> Option<&Path> {
        match self {
            SyncResult::AlreadyPresent { path } | SyncResult::Downloaded { path, .. } => {
                Some(path)
            }
            SyncResult::Failed { .. } => None,
        }
    }
}

/// A work item paired with its outcome
#[derive(Debug)]
pub struct SyncRecord {
    pub item: WorkItem,
    pub result: SyncResult,
}

/// Results from a complete batch
#[derive(Debug)]
pub struct SyncSummary {
    pub total_items: usize,
    pub downloaded: usize,
    pub already_present: usize,
    pub failed: usize,
    pub bytes_downloaded: u64,
    pub duration: Duration,
    pub records: Vec<SyncRecord>,
}

impl SyncSummary {
    fn compile(records: Vec<SyncRecord>, duration: Duration) -> Self {
        let mut downloaded = 0;
        let mut already_present = 0;
        let mut failed = 0;
        let mut bytes_downloaded = 0;

        for record in &records {
            match &record.result {
                SyncResult::Downloaded { bytes, .. } => {
                    downloaded += 1;
                    bytes_downloaded += bytes;
                }
                SyncResult::AlreadyPresent { .. } => already_present += 1,
                SyncResult::Failed { .. } => failed += 1,
            }
        }

        Self {
            total_items: records.len(),
            downloaded,
            already_present,
            failed,
            bytes_downloaded,
            duration,
            records,
        }
    }

    /// Records whose item failed
    pub fn failures(&self) -> impl Iterator<Item = &SyncRecord> {
        self.records
            .iter()
            .filter(|record| matches!(record.result, SyncResult::Failed { .. }))
    }
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_parallel: usize,
    pub atomic_writes: bool,
    pub partial_suffix: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_parallel: 2,
            atomic_writes: false,
            partial_suffix: ".part".to_string(),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_parallel: config.max_parallel(),
            atomic_writes: config.sync.atomic_writes,
            partial_suffix: config.sync.partial_suffix.clone(),
        }
    }
}

/// Downloads work items through a [`VideoFetcher`]
#[derive(Clone)]
pub struct SyncEngine {
    options: Arc<SyncOptions>,
    fetcher: Arc<dyn VideoFetcher>,
}

impl SyncEngine {
    pub fn new(options: SyncOptions, fetcher: Arc<dyn VideoFetcher>) -> Self {
        Self {
            options: Arc::new(options),
            fetcher,
        }
    }

    /// Concurrency cap actually enforced by [`Self::sync_batch`]
    pub fn max_parallel(&self) -> usize {
        self.options.max_parallel.max(1)
    }

    /// Attempt a single item
    pub async fn sync_one(&self, item: &WorkItem) -> SyncResult {
        match self.try_sync_one(item).await {
            Ok(result) => result,
            Err(error) => SyncResult::Failed { error },
        }
    }

    async fn try_sync_one(&self, item: &WorkItem) -> Result<SyncResult, CoursyncError> {
        self.fetcher.ensure_active()?;

        tokio::fs::create_dir_all(&item.directory)
            .await
            .map_err(|e| CoursyncError::io(&item.directory, e))?;

        let download = self.fetcher.start_download(&item.video_url).await?;

        let header = download.content_disposition.as_deref().ok_or_else(|| {
            CoursyncError::FilenameParse("missing Content-Disposition header".to_string())
        })?;
        let filename = parse_filename(header)?;
        let target = item.directory.join(filename);

        // Dropping `download` here closes the connection without reading the body
        match tokio::fs::metadata(&target).await {
            Ok(_) => {
                debug!("{} already exists, aborting download", target.display());
                return Ok(SyncResult::AlreadyPresent { path: target });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CoursyncError::io(&target, e)),
        }

        let written = if self.options.atomic_writes {
            self.write_via_partial(&target, download.body).await?
        } else {
            write_in_place(&target, download.body).await?
        };

        Ok(match written {
            Some(bytes) => SyncResult::Downloaded { path: target, bytes },
            None => SyncResult::AlreadyPresent { path: target },
        })
    }

    /// Stream into `<target><suffix>` and rename on completion.
    /// Returns `None` if the target appeared in the meantime.
    async fn write_via_partial(
        &self,
        target: &Path,
        body: BoxStream<'static, Result<Bytes, CoursyncError>>,
    ) -> Result<Option<u64>, CoursyncError> {
        let mut partial = target.as_os_str().to_os_string();
        partial.push(&self.options.partial_suffix);
        let partial = PathBuf::from(partial);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&partial)
            .await
            .map_err(|e| CoursyncError::io(&partial, e))?;

        let written = match stream_to_file(file, &partial, body).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    warn!("Failed to remove partial file {}: {}", partial.display(), cleanup);
                }
                return Err(e);
            }
        };

        if tokio::fs::metadata(target).await.is_ok() {
            debug!("{} appeared during download, discarding ours", target.display());
            tokio::fs::remove_file(&partial)
                .await
                .map_err(|e| CoursyncError::io(&partial, e))?;
            return Ok(None);
        }

        tokio::fs::rename(&partial, target)
            .await
            .map_err(|e| CoursyncError::io(target, e))?;

        Ok(Some(written))
    }

    /// Run every item under the concurrency cap and collect one record per item.
    ///
    /// Once `cancel` fires, items still waiting for a slot are reported as
    /// [`CoursyncError::Cancelled`]; items already downloading run to completion.
    pub async fn sync_batch(&self, items: Vec<WorkItem>, cancel: &CancellationToken) -> SyncSummary {
        let start_time = Instant::now();
        let limit = self.max_parallel();

        info!("Syncing {} videos, at most {} at a time", items.len(), limit);

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut futures = FuturesUnordered::new();

        for item in items {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            futures.push(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let result = match permit {
                    Some(_permit) => {
                        info!("Syncing {}", item.label);
                        self.sync_one(&item).await
                    }
                    None => SyncResult::Failed {
                        error: CoursyncError::Cancelled,
                    },
                };

                SyncRecord { item, result }
            });
        }

        let mut records = Vec::with_capacity(futures.len());

        while let Some(record) = futures.next().await {
            match &record.result {
                SyncResult::Downloaded { path, bytes } => {
                    info!("Downloaded {} ({} bytes)", path.display(), bytes)
                }
                SyncResult::AlreadyPresent { path } => {
                    debug!("Already present: {}", path.display())
                }
                SyncResult::Failed { error } => warn!("{} failed: {}", record.item.label, error),
            }
            records.push(record);
        }

        let summary = SyncSummary::compile(records, start_time.elapsed());

        info!(
            "Sync completed in {:.2}s: {} downloaded, {} already present, {} failed",
            summary.duration.as_secs_f64(),
            summary.downloaded,
            summary.already_present,
            summary.failed
        );

        summary
    }
}

/// Open `target` exclusively and stream into it. `None` if it already exists.
async fn write_in_place(
    target: &Path,
    body: BoxStream<'static, Result<Bytes, CoursyncError>>,
) -> Result<Option<u64>, CoursyncError> {
    let file = match OpenOptions::new().write(true).create_new(true).open(target).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(CoursyncError::io(target, e)),
    };

    stream_to_file(file, target, body).await.map(Some)
}

async fn stream_to_file(
    mut file: tokio::fs::File,
    path: &Path,
    mut body: BoxStream<'static, Result<Bytes, CoursyncError>>,
) -> Result<u64, CoursyncError> {
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| CoursyncError::io(path, e))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|e| CoursyncError::io(path, e))?;

    Ok(written)
}

/// Extract the quoted filename from a `Content-Disposition` value.
///
/// Takes everything between the first and last double quote. The result must
/// be a single plain path component.
pub fn parse_filename(content_disposition: &str) -> Result<&str, CoursyncError> {
    let malformed = || CoursyncError::FilenameParse(format!("malformed header {:?}", content_disposition));

    let start = content_disposition.find('"').ok_or_else(malformed)?;
    let end = content_disposition.rfind('"').ok_or_else(malformed)?;
    if end <= start {
        return Err(malformed());
    }

    let filename = &content_disposition[start + 1..end];
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !filename.contains(['/', '\\']) => Ok(filename),
        _ => Err(CoursyncError::FilenameParse(format!(
            "unusable filename {:?}",
            filename
        ))),
    }
}
