//! Directory-backed blob store.
//!
//! Each entry lives at `<root>/<key>.<extension>`. Writes go to a temporary
//! file in the same directory which is synced and then renamed into place, so a
//! concurrent reader sees either the complete blob or nothing.

use std::{
    collections::HashMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime},
};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use tracing::{debug, info, warn};

use super::eviction::{EvictionPolicy, EvictionReport, StoredEntry};
use super::keys::CacheKey;
use super::store::{BlobStore, StoreError};

pub const METRIC_CACHE_EVICTED_TOTAL: &str = "meshx_cache_evicted_total";

const TEMP_PREFIX: &str = ".tmp-";

/// Temporary files older than this are leftovers of an interrupted write.
const STALE_TEMP_AGE: Duration = Duration::from_secs(3_600);

/// Resolve the blob path for `key` without touching the filesystem.
pub fn blob_path(root: &Path, key: &CacheKey, extension: &str) -> PathBuf {
    root.join(format!("{key}.{extension}"))
}

#[derive(Debug, Clone)]
pub struct DiskBlobStore {
    root: PathBuf,
    extension: String,
}

impl DiskBlobStore {
    /// Open the store, creating the root directory if it does not exist yet.
    pub fn new(root: PathBuf, extension: impl Into<String>) -> Result<Self, std::io::Error> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            extension: extension.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        blob_path(&self.root, key, &self.extension)
    }

    /// List every blob currently stored. Temporary files and foreign files are
    /// skipped.
    pub async fn entries(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let root = self.root.clone();
        let suffix = format!(".{}", self.extension);
        tokio::task::spawn_blocking(move || scan_entries(&root, &suffix))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }

    /// Delete one entry. A missing file counts as success.
    pub async fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Remove { path, source }),
        }
    }

    /// Apply `policy` once and report what was removed.
    pub async fn sweep(&self, policy: &EvictionPolicy) -> Result<EvictionReport, StoreError> {
        let started_at = Instant::now();
        let entries = self.entries().await?;
        let size_before: u64 = entries.iter().map(|entry| entry.size_bytes).sum();
        let sizes: HashMap<&CacheKey, u64> = entries
            .iter()
            .map(|entry| (&entry.key, entry.size_bytes))
            .collect();

        let victims = policy.plan(&entries, SystemTime::now());
        let mut report = EvictionReport {
            size_before,
            size_after: size_before,
            ..Default::default()
        };

        for key in &victims {
            match self.remove(key).await {
                Ok(()) => {
                    report.files_deleted += 1;
                    report.bytes_freed += sizes.get(key).copied().unwrap_or(0);
                }
                Err(err) => {
                    warn!(
                        target = "meshx::cache::disk",
                        op = "disk::sweep",
                        key = %key,
                        error = %err,
                        "Failed to evict cache entry"
                    );
                }
            }
        }

        report.size_after = size_before.saturating_sub(report.bytes_freed);

        let root = self.root.clone();
        let now = SystemTime::now();
        let stale_temp_files =
            tokio::task::spawn_blocking(move || remove_stale_temp_files(&root, now))
                .await
                .map_err(|err| StoreError::Task(err.to_string()))??;

        counter!(METRIC_CACHE_EVICTED_TOTAL).increment(report.files_deleted as u64);

        info!(
            target = "meshx::cache::disk",
            op = "disk::sweep",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            entries = entries.len(),
            files_deleted = report.files_deleted,
            bytes_freed = report.bytes_freed,
            size_before = report.size_before,
            size_after = report.size_after,
            stale_temp_files,
            "Cache sweep completed"
        );

        Ok(report)
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    async fn put(&self, key: &CacheKey, bytes: Bytes) -> Result<(), StoreError> {
        let root = self.root.clone();
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || write_atomically(&root, path, &bytes))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

fn write_atomically(root: &Path, path: PathBuf, bytes: &[u8]) -> Result<(), StoreError> {
    let write_error = |source| StoreError::Write {
        path: path.clone(),
        source,
    };

    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(root)
        .map_err(write_error)?;
    file.write_all(bytes).map_err(write_error)?;
    file.flush().map_err(write_error)?;
    file.as_file().sync_all().map_err(write_error)?;

    // Renaming over an existing entry is fine: every writer for a key carries
    // identical bytes.
    file.persist(&path).map_err(|err| write_error(err.error))?;
    Ok(())
}

fn remove_stale_temp_files(root: &Path, now: SystemTime) -> Result<usize, StoreError> {
    let scan_error = |source| StoreError::Scan {
        path: root.to_path_buf(),
        source,
    };

    let mut removed = 0;
    for dir_entry in fs::read_dir(root).map_err(scan_error)? {
        let dir_entry = dir_entry.map_err(scan_error)?;
        if !dir_entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }

        let stale = dir_entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > STALE_TEMP_AGE);
        if !stale {
            continue;
        }

        let path = dir_entry.path();
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                target = "meshx::cache::disk",
                op = "disk::sweep",
                file = %path.display(),
                error = %err,
                "Failed to remove stale temporary file"
            ),
        }
    }

    Ok(removed)
}

fn scan_entries(root: &Path, suffix: &str) -> Result<Vec<StoredEntry>, StoreError> {
    let scan_error = |source| StoreError::Scan {
        path: root.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(root).map_err(scan_error)? {
        let dir_entry = dir_entry.map_err(scan_error)?;
        let file_name = dir_entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(key) = name.strip_suffix(suffix).and_then(CacheKey::parse) else {
            continue;
        };

        let metadata = match dir_entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            // Removed between listing and stat.
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(scan_error(err)),
        };
        let Ok(modified) = metadata.modified() else {
            debug!(
                target = "meshx::cache::disk",
                op = "disk::entries",
                file = name,
                "Skipping cache entry without modification time"
            );
            continue;
        };

        entries.push(StoredEntry {
            key,
            size_bytes: metadata.len(),
            modified,
        });
    }

    Ok(entries)
}
