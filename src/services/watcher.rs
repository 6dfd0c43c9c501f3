//! Knowledge-base directory watcher and full-tree sync.
//!
//! File events are debounced per path, then ingested under a fixed owner with
//! at most `max_concurrent` ingestions in flight.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use walkdir::WalkDir;

use super::ingest::IngestService;
use crate::error::{IngestError, WatchError};
use crate::models::{IngestOutcome, WatcherConfig};
use crate::utils::{has_allowed_extension, matches_any_pattern};

/// Outcome counts of a full sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub ingested: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl SyncReport {
    fn record(&mut self, result: &Result<IngestOutcome, IngestError>) {
        match result {
            Ok(IngestOutcome::Created(_)) => self.ingested += 1,
            Ok(IngestOutcome::Duplicate(_)) => self.duplicates += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct Watcher {
    root: PathBuf,
    owner: String,
    debounce: Duration,
    exclude_patterns: Vec<String>,
    ingest: IngestService,
    limiter: Arc<Semaphore>,
}

impl Watcher {
    /// Create a watcher for `config.path`, creating the directory if needed.
    pub fn new(config: &WatcherConfig, ingest: IngestService) -> Result<Self, WatchError> {
        std::fs::create_dir_all(&config.path)?;
        // Events carry absolute paths; match them against an absolute root
        let root = std::fs::canonicalize(&config.path)?;

        Ok(Self {
            root,
            owner: config.owner.clone(),
            debounce: Duration::from_millis(config.debounce_ms),
            exclude_patterns: config.exclude_patterns.clone(),
            ingest,
            limiter: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whether a file under the root should be ingested.
    fn is_candidate(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        !matches_any_pattern(relative, &self.exclude_patterns)
            && has_allowed_extension(path, &self.ingest.config().allowed_extensions)
    }

    /// Candidate files below `dir`, in walk order.
    fn candidates(&self, dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.is_candidate(path))
            .collect()
    }

    /// Spawn one ingestion that waits for a pool permit first.
    fn spawn_ingest(
        &self,
        tasks: &mut JoinSet<(PathBuf, Result<IngestOutcome, IngestError>)>,
        path: PathBuf,
    ) {
        let ingest = self.ingest.clone();
        let owner = self.owner.clone();
        let limiter = Arc::clone(&self.limiter);

        tasks.spawn(async move {
            // The semaphore is never closed
            let _permit = limiter.acquire_owned().await;
            let result = ingest.ingest_path(&owner, &path).await;
            (path, result)
        });
    }

    /// Ingest every candidate file in the tree through the bounded pool.
    pub async fn sync(&self) -> Result<SyncReport, WatchError> {
        tracing::info!(path = %self.root.display(), owner = %self.owner, "starting sync");
        let files = self.candidates(&self.root);
        let mut report = SyncReport {
            scanned: files.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for path in files {
            self.spawn_ingest(&mut tasks, path);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, result)) => {
                    log_outcome(&path, &result);
                    report.record(&result);
                }
                Err(e) => {
                    tracing::error!(error = %e, "sync task panicked");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            ingested = report.ingested,
            duplicates = report.duplicates,
            failed = report.failed,
            "sync finished"
        );
        Ok(report)
    }

    /// Watch the tree until `shutdown` resolves, then wait for in-flight ingestions.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), WatchError>
    where
        F: Future<Output = ()>,
    {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut fs_watcher: RecommendedWatcher = notify::recommended_watcher(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
        )?;
        // Recursive mode also picks up directories created later
        fs_watcher.watch(&self.root, RecursiveMode::Recursive)?;
        tracing::info!(path = %self.root.display(), owner = %self.owner, "watcher started");

        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            let next_due = pending.values().min().copied();

            tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(Ok(event)) => self.schedule(event, &mut pending),
                    Some(Err(e)) => tracing::warn!(error = %e, "watcher error"),
                    None => break,
                },
                _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    let now = Instant::now();
                    let due: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in due {
                        pending.remove(&path);
                        // Removed or renamed away during the debounce window
                        if path.is_file() {
                            self.spawn_ingest(&mut tasks, path);
                        }
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok((path, result)) => log_outcome(&path, &result),
                    Err(e) => tracing::error!(error = %e, "ingestion task panicked"),
                },
            }
        }

        drop(fs_watcher);
        if !tasks.is_empty() {
            tracing::info!(in_flight = tasks.len(), "waiting for in-flight ingestions");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Ok((path, result)) = joined {
                log_outcome(&path, &result);
            }
        }
        tracing::info!("watcher stopped");
        Ok(())
    }

    /// (Re)start the debounce timer for every candidate file an event touches.
    fn schedule(&self, event: Event, pending: &mut HashMap<PathBuf, Instant>) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        let deadline = Instant::now() + self.debounce;

        for path in event.paths {
            if path.is_dir() {
                // A directory moved in may already contain files
                for file in self.candidates(&path) {
                    pending.insert(file, deadline);
                }
            } else if self.is_candidate(&path) {
                tracing::debug!(path = %path.display(), "file changed");
                pending.insert(path, deadline);
            }
        }
    }
}

fn log_outcome(path: &Path, result: &Result<IngestOutcome, IngestError>) {
    match result {
        Ok(IngestOutcome::Created(doc)) => tracing::info!(
            file = %path.display(),
            document_id = %doc.id,
            chunks = doc.chunk_count,
            "indexed file"
        ),
        Ok(IngestOutcome::Duplicate(doc)) => tracing::debug!(
            file = %path.display(),
            document_id = %doc.id,
            "file already indexed"
        ),
        Err(e) => tracing::warn!(file = %path.display(), error = %e, "failed to index file"),
    }
}
