//! Fixed-size worker pool for archive downloads
//!
//! References are queued on a bounded channel and pulled by `N` worker tasks.
//! Each worker reports the outcome of every reference it takes over a second
//! channel, so the pool knows when all references have been attempted.

use crate::archive::{ArchiveReference, ArchiveSource};
use crate::shutdown::SharedShutdown;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::config::{DEFAULT_WORKERS, QUEUE_DEPTH_PER_WORKER};

/// Result of one attempted reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Archive was downloaded in this run
    Downloaded {
        /// Bytes written to disk
        bytes: u64,
    },
    /// Archive was already present locally and not fetched again
    Skipped,
    /// Fetch failed; the reference can be retried by re-running
    Failed {
        /// Error description
        reason: String,
    },
    /// Shutdown was requested before the reference was attempted
    Cancelled,
}

/// Outcome of one reference together with its local path
#[derive(Debug, Clone)]
pub struct FetchRecord {
    /// Reference that was attempted
    pub reference: ArchiveReference,
    /// Local archive path
    pub path: PathBuf,
    /// Remote location (URL)
    pub location: String,
    /// What happened
    pub outcome: FetchOutcome,
}

impl FetchRecord {
    /// Whether a local archive is available for conversion
    pub fn is_available(&self) -> bool {
        matches!(
            self.outcome,
            FetchOutcome::Downloaded { .. } | FetchOutcome::Skipped
        )
    }
}

/// Outcomes of a pool run, in reference order
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// One record per input reference
    pub records: Vec<FetchRecord>,
}

impl FetchReport {
    /// Number of archives downloaded in this run
    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Downloaded { .. }))
    }

    /// Number of archives already present locally
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Skipped))
    }

    /// Number of failed fetches
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Failed { .. }))
    }

    /// Number of references never attempted because of shutdown
    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, FetchOutcome::Cancelled))
    }

    /// Total bytes downloaded in this run
    pub fn bytes_downloaded(&self) -> u64 {
        self.records
            .iter()
            .map(|r| match r.outcome {
                FetchOutcome::Downloaded { bytes } => bytes,
                _ => 0,
            })
            .sum()
    }

    /// Records with a local archive, in reference order
    pub fn available(&self) -> impl Iterator<Item = &FetchRecord> {
        self.records.iter().filter(|r| r.is_available())
    }

    fn count(&self, predicate: impl Fn(&FetchOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

/// Bounded pool of download workers
pub struct FetcherPool {
    source: Arc<dyn ArchiveSource>,
    download_dir: PathBuf,
    workers: usize,
    skip_existing: bool,
    shutdown: Option<SharedShutdown>,
    progress: Option<ProgressBar>,
}

impl FetcherPool {
    /// Create a pool that stores archives in `download_dir`
    pub fn new(source: Arc<dyn ArchiveSource>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            download_dir: download_dir.into(),
            workers: DEFAULT_WORKERS,
            skip_existing: true,
            shutdown: None,
            progress: None,
        }
    }

    /// Set the number of concurrent workers (at least 1)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Reuse archives already present in the download directory
    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    /// Stop taking new references once shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Advance `progress` by one for every attempted reference
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attempt every reference exactly once
    ///
    /// Returns after all workers have finished. Records are ordered like the
    /// input regardless of completion order.
    pub async fn run(&self, references: Vec<ArchiveReference>) -> FetchReport {
        if references.is_empty() {
            return FetchReport::default();
        }

        let workers = self.workers.min(references.len());
        info!(
            "Fetching {} archives with {} workers",
            references.len(),
            workers
        );

        let (work_tx, work_rx) =
            mpsc::channel::<(usize, ArchiveReference)>(workers * QUEUE_DEPTH_PER_WORKER);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, FetchRecord)>();

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let work_rx = Arc::clone(&work_rx);
            let done_tx = done_tx.clone();
            let worker = Worker {
                source: Arc::clone(&self.source),
                download_dir: self.download_dir.clone(),
                skip_existing: self.skip_existing,
                shutdown: self.shutdown.clone(),
            };
            let progress = self.progress.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = work_rx.lock().await.recv().await;
                    let Some((index, reference)) = next else {
                        break;
                    };

                    let record = worker.process(reference).await;
                    if let Some(pb) = &progress {
                        pb.inc(1);
                    }
                    if done_tx.send((index, record)).is_err() {
                        break;
                    }
                }
                debug!("Worker {} finished", worker_id);
            }));
        }
        drop(done_tx);

        let expected = references.clone();
        let total = references.len();
        for (index, reference) in references.into_iter().enumerate() {
            let sent = match &self.shutdown {
                Some(shutdown) => tokio::select! {
                    biased;
                    _ = shutdown.wait_for_shutdown() => {
                        info!("Shutdown requested, {} archives not queued", total - index);
                        break;
                    }
                    sent = work_tx.send((index, reference)) => sent,
                },
                None => work_tx.send((index, reference)).await,
            };
            if sent.is_err() {
                error!("All download workers exited early");
                break;
            }
        }
        drop(work_tx);

        let mut slots: Vec<Option<FetchRecord>> = vec![None; expected.len()];
        while let Some((index, record)) = done_rx.recv().await {
            slots[index] = Some(record);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Download worker panicked: {}", e);
            }
        }

        let stopped = self
            .shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested());
        let records = slots
            .into_iter()
            .zip(expected)
            .map(|(slot, reference)| {
                slot.unwrap_or_else(|| FetchRecord {
                    path: self.download_dir.join(reference.file_name()),
                    location: self.source.locate(&reference),
                    reference,
                    outcome: if stopped {
                        FetchOutcome::Cancelled
                    } else {
                        FetchOutcome::Failed {
                            reason: "download worker exited before reporting".to_string(),
                        }
                    },
                })
            })
            .collect();

        FetchReport { records }
    }
}

/// State shared by a worker task
struct Worker {
    source: Arc<dyn ArchiveSource>,
    download_dir: PathBuf,
    skip_existing: bool,
    shutdown: Option<SharedShutdown>,
}

impl Worker {
    async fn process(&self, reference: ArchiveReference) -> FetchRecord {
        let path = self.download_dir.join(reference.file_name());
        let location = self.source.locate(&reference);

        let outcome = if self
            .shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
        {
            FetchOutcome::Cancelled
        } else if self.skip_existing && is_usable_archive(&path).await {
            info!("Skipped (exists): {}", reference.file_name());
            FetchOutcome::Skipped
        } else {
            match self.source.fetch(&reference, &path).await {
                Ok(bytes) => {
                    info!("Downloaded {} ({} bytes)", reference.file_name(), bytes);
                    FetchOutcome::Downloaded { bytes }
                }
                Err(e) => {
                    warn!("Failed to download {}: {}", location, e);
                    FetchOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        FetchRecord {
            reference,
            path,
            location,
            outcome,
        }
    }
}

/// An archive on disk is reused only if its ZIP directory can be read and
/// lists at least one entry; truncated or corrupt files are fetched again.
async fn is_usable_archive(path: &Path) -> bool {
    let is_file = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);
    if !is_file {
        return false;
    }

    let path = path.to_path_buf();
    let check = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path).map_err(|e| e.to_string())?;
        let archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
        Ok::<usize, String>(archive.len())
    })
    .await;

    match check {
        Ok(Ok(entries)) => entries > 0,
        Ok(Err(reason)) => {
            warn!("Existing archive is unreadable, downloading again: {}", reason);
            false
        }
        Err(e) => {
            warn!("Archive check failed: {}", e);
            false
        }
    }
}
