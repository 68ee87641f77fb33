//! Content Cache
//!
//! Hash-addressed file store with a byte budget.
//!
//! **Layout:**
//! - `<root>/<hash>`: committed files
//! - `<root>/tmp/<hash>`: in-progress writes
//!
//! **Commit:** bytes go to the temp file; on finish the size is checked, the
//! file is renamed into place and an index row is written. Zero-byte writes
//! are discarded without touching the index.
//!
//! **Eviction:** least recently accessed first, through a single-concurrency
//! background queue (see [`eviction`]).
//!
//! Hashes are used directly as file names and are validated before any
//! filesystem access.

mod eviction;
pub mod index;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use echo_common::keys::is_valid_hash;
use sqlx::SqlitePool;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use eviction::EvictionQueue;
pub use index::{CacheEntry, CacheIndex};

const TMP_DIR: &str = "tmp";

/// State shared with the eviction worker
pub(crate) struct CacheStore {
    root: PathBuf,
    limit_bytes: u64,
    index: CacheIndex,
}

impl CacheStore {
    fn final_path(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    /// Delete file then index row; a missing file is not an error
    async fn remove_entry(&self, hash: &str) -> Result<()> {
        match fs::remove_file(self.final_path(hash)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.index.delete(hash).await
    }
}

/// Counts from a startup reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files under the root with no index row
    pub orphan_files_removed: usize,
    /// Index rows whose file was missing
    pub stale_entries_removed: usize,
    /// Leftover in-progress files under `tmp/`
    pub temp_files_removed: usize,
    /// Indexed bytes after eviction settled
    pub bytes_in_use: u64,
}

/// Process-wide content cache shared by all players
pub struct FileCache {
    store: Arc<CacheStore>,
    tmp_dir: PathBuf,
    eviction: EvictionQueue,
    in_flight: Mutex<HashSet<String>>,
}

impl FileCache {
    /// Open the cache rooted at `root`, creating the directory layout
    pub async fn open(
        root: impl Into<PathBuf>,
        limit_bytes: u64,
        pool: SqlitePool,
    ) -> Result<Arc<Self>> {
        let root = root.into();
        let tmp_dir = root.join(TMP_DIR);
        fs::create_dir_all(&tmp_dir).await?;

        let store = Arc::new(CacheStore {
            root,
            limit_bytes,
            index: CacheIndex::new(pool),
        });
        let eviction = EvictionQueue::spawn(Arc::clone(&store));

        info!(
            "Content cache at {} (limit {} bytes)",
            store.root.display(),
            limit_bytes
        );

        Ok(Arc::new(Self {
            store,
            tmp_dir,
            eviction,
            in_flight: Mutex::new(HashSet::new()),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.store.root
    }

    pub fn limit_bytes(&self) -> u64 {
        self.store.limit_bytes
    }

    pub fn index(&self) -> &CacheIndex {
        &self.store.index
    }

    fn validate(hash: &str) -> Result<()> {
        if is_valid_hash(hash) {
            Ok(())
        } else {
            Err(Error::InvalidCacheKey(hash.to_string()))
        }
    }

    /// Resolve `hash` to a committed file
    ///
    /// An index row whose file is gone is deleted and reported as a miss.
    /// Hits refresh `accessed_at`.
    pub async fn lookup(&self, hash: &str) -> Result<Option<PathBuf>> {
        Self::validate(hash)?;

        if self.store.index.get(hash).await?.is_none() {
            debug!("Cache miss: {}", hash);
            return Ok(None);
        }

        let path = self.store.final_path(hash);
        if fs::metadata(&path).await.is_err() {
            warn!("Cache entry {} has no backing file, removing index row", hash);
            self.store.index.delete(hash).await?;
            return Ok(None);
        }

        self.store.index.touch(hash).await?;
        debug!("Cache hit: {}", hash);
        Ok(Some(path))
    }

    /// Open a write sink for `hash`
    ///
    /// Returns the writer and a handle that resolves once the writer finishes.
    /// Only one write per hash may be in flight.
    pub async fn begin_write(self: &Arc<Self>, hash: &str) -> Result<(CacheWriter, PendingCommit)> {
        Self::validate(hash)?;

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !in_flight.insert(hash.to_string()) {
                return Err(Error::CacheWriteFailed("write already in progress".to_string()));
            }
        }

        let tmp_path = self.tmp_dir.join(hash);
        let file = match fs::File::create(&tmp_path).await {
            Ok(file) => file,
            Err(e) => {
                self.release(hash);
                return Err(Error::CacheWriteFailed(format!(
                    "failed to create {}: {}",
                    tmp_path.display(),
                    e
                )));
            }
        };

        let (tx, rx) = oneshot::channel();
        let writer = CacheWriter {
            cache: Arc::clone(self),
            hash: hash.to_string(),
            tmp_path,
            file: Some(file),
            written: 0,
            committed: Some(tx),
        };

        Ok((writer, PendingCommit { rx }))
    }

    /// Whether a write for `hash` is currently open
    pub fn is_writing(&self, hash: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(hash)
    }

    fn release(&self, hash: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(hash);
    }

    /// Queue an eviction pass
    pub fn submit_eviction(&self) {
        self.eviction.submit();
    }

    /// Wait for queued eviction passes to finish
    pub async fn wait_for_eviction(&self) {
        self.eviction.wait_idle().await;
    }

    pub async fn usage_bytes(&self) -> Result<u64> {
        self.store.index.total_bytes().await
    }

    pub async fn entry_count(&self) -> Result<u64> {
        self.store.index.count().await
    }

    /// Reconcile the index with the filesystem, then evict
    ///
    /// Every step is best-effort: failures are logged and the pass continues.
    pub async fn cleanup_on_startup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.remove_orphan_files().await {
            Ok(n) => report.orphan_files_removed = n,
            Err(e) => warn!("Orphan file scan failed: {}", e),
        }

        match self.purge_temp_files().await {
            Ok(n) => report.temp_files_removed = n,
            Err(e) => warn!("Temp directory purge failed: {}", e),
        }

        match self.remove_stale_entries().await {
            Ok(n) => report.stale_entries_removed = n,
            Err(e) => warn!("Index reconciliation failed: {}", e),
        }

        self.submit_eviction();
        self.wait_for_eviction().await;

        report.bytes_in_use = self.usage_bytes().await.unwrap_or_else(|e| {
            warn!("Failed to read cache usage: {}", e);
            0
        });

        info!(
            "Cache cleanup: {} orphan files, {} stale entries, {} temp files removed; {} bytes in use",
            report.orphan_files_removed,
            report.stale_entries_removed,
            report.temp_files_removed,
            report.bytes_in_use
        );

        report
    }

    async fn remove_orphan_files(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.store.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();

            let indexed = is_valid_hash(&name) && self.store.index.get(&name).await?.is_some();
            if indexed {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!("Removed orphan cache file {}", name);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove orphan cache file {}: {}", name, e),
            }
        }

        Ok(removed)
    }

    async fn purge_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.tmp_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if self.is_writing(&name) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove temp file {}: {}", name, e),
            }
        }

        Ok(removed)
    }

    async fn remove_stale_entries(&self) -> Result<usize> {
        let mut removed = 0;
        let mut cursor = index::ScanCursor::default();

        loop {
            let page = self.store.index.scan_page(&mut cursor).await?;
            if page.is_empty() {
                break;
            }
            for entry in page {
                if fs::metadata(self.store.final_path(&entry.hash)).await.is_err() {
                    debug!("Removing index row for missing file {}", entry.hash);
                    self.store.index.delete(&entry.hash).await?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

/// Write sink for one cache entry
///
/// Dropping the writer without calling [`CacheWriter::finish`] discards the
/// temp file and resolves the pending commit to absent.
pub struct CacheWriter {
    cache: Arc<FileCache>,
    hash: String,
    tmp_path: PathBuf,
    file: Option<fs::File>,
    written: u64,
    committed: Option<oneshot::Sender<std::result::Result<Option<PathBuf>, String>>>,
}

impl CacheWriter {
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::CacheWriteFailed("writer already closed".to_string()))?;
        file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Close the sink and commit
    ///
    /// Returns the committed path, or `None` for a zero-byte write.
    pub async fn finish(mut self) -> Result<Option<PathBuf>> {
        let result = self.commit().await;

        if let Some(tx) = self.committed.take() {
            let _ = tx.send(match &result {
                Ok(path) => Ok(path.clone()),
                Err(e) => Err(e.to_string()),
            });
        }

        result
    }

    /// Discard everything written so far
    pub fn abort(self) {
        debug!("Cache write for {} aborted", self.hash);
    }

    async fn commit(&mut self) -> Result<Option<PathBuf>> {
        if let Some(mut file) = self.file.take() {
            let synced = match file.flush().await {
                Ok(()) => file.sync_all().await,
                Err(e) => Err(e),
            };
            if let Err(e) = synced {
                let _ = fs::remove_file(&self.tmp_path).await;
                return Err(e.into());
            }
        }

        if self.written == 0 {
            let _ = fs::remove_file(&self.tmp_path).await;
            debug!("Discarding zero-byte cache write for {}", self.hash);
            return Ok(None);
        }

        let final_path = self.cache.store.final_path(&self.hash);
        if let Err(e) = fs::rename(&self.tmp_path, &final_path).await {
            let _ = fs::remove_file(&self.tmp_path).await;
            return Err(Error::CacheWriteFailed(format!(
                "rename into {} failed: {}",
                final_path.display(),
                e
            )));
        }

        if let Err(e) = self.cache.store.index.upsert(&self.hash, self.written).await {
            let _ = fs::remove_file(&final_path).await;
            return Err(Error::CacheWriteFailed(format!("indexing failed: {}", e)));
        }

        info!("Cached {} ({} bytes)", self.hash, self.written);
        self.cache.submit_eviction();

        Ok(Some(final_path))
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if self.committed.is_some() {
            // Never finished: discard the partial file
            self.file.take();
            let _ = std::fs::remove_file(&self.tmp_path);
        }
        self.cache.release(&self.hash);
    }
}

/// Resolves once the matching [`CacheWriter`] finishes or is dropped
pub struct PendingCommit {
    rx: oneshot::Receiver<std::result::Result<Option<PathBuf>, String>>,
}

impl PendingCommit {
    /// Committed path, `None` if the write was empty or abandoned
    pub async fn wait(self) -> Result<Option<PathBuf>> {
        match self.rx.await {
            Ok(Ok(path)) => Ok(path),
            Ok(Err(message)) => Err(Error::CacheWriteFailed(message)),
            Err(_) => Ok(None),
        }
    }
}
