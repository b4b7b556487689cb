//! The shared audience catalog store.
//!
//! The catalog of record is a JSON file on local disk, mirrored into the
//! distributed cache for readers. Mutations come from execution bots and
//! are serialized by a cache-backed lock (set-if-absent with a 10s TTL);
//! the file itself is replaced atomically (temp file, fsync, rename), so a
//! reader re-deriving from disk never observes a torn write.
//!
//! Readers never take the lock: they serve from the cache and fall back to
//! the file on a miss or decode failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::constants::{
    AUDIENCE_CACHE_KEY, AUDIENCE_LOCK_KEY, AUDIENCE_LOCK_TTL,
};
use tracing::{debug, instrument, warn};

use crate::cache::Cache;
use crate::error::Error;
use crate::models::audience::{AudienceLeaf, AudienceSpec};

pub struct AudienceStore<C> {
    cache: C,
    file_path: PathBuf,
    cache_key: String,
    lock_key: String,
    lock_ttl: Duration,
}

impl<C: Cache> AudienceStore<C> {
    pub fn new(
        cache: C,
        file_path: impl Into<PathBuf>,
        cache_prefix: &str,
    ) -> Self {
        Self {
            cache,
            file_path: file_path.into(),
            cache_key: format!("{cache_prefix}:{AUDIENCE_CACHE_KEY}"),
            lock_key: format!("{cache_prefix}:{AUDIENCE_LOCK_KEY}"),
            lock_ttl: AUDIENCE_LOCK_TTL,
        }
    }

    // --- Writer protocol --- //

    /// Insert or replace one leaf.
    #[instrument(skip_all, name = "(audience-update)")]
    pub async fn update(
        &self,
        level1: &str,
        level2: &str,
        level3: &str,
        leaf: AudienceLeaf,
    ) -> Result<(), Error> {
        self.mutate(|spec| spec.upsert(level1, level2, level3, leaf))
            .await
    }

    /// Delete one leaf, pruning emptied nodes.
    #[instrument(skip_all, name = "(audience-reset)")]
    pub async fn reset(
        &self,
        level1: &str,
        level2: &str,
        level3: &str,
    ) -> Result<(), Error> {
        self.mutate(|spec| spec.remove(level1, level2, level3)).await
    }

    /// Run one mutation under the writer lock: read file, mutate, write
    /// file atomically, replace cache, release lock.
    async fn mutate(
        &self,
        apply: impl FnOnce(&mut AudienceSpec),
    ) -> Result<(), Error> {
        let acquired = self
            .cache
            .set_nx(&self.lock_key, b"1".to_vec(), self.lock_ttl)
            .await?;
        if !acquired {
            return Err(Error::AudienceSpecLockBusy);
        }

        let result = async {
            let mut spec = read_file(&self.file_path).await?;
            apply(&mut spec);

            let bytes = serde_json::to_vec_pretty(&spec)
                .map_err(|e| Error::Storage(e.to_string()))?;
            write_file_atomic(&self.file_path, bytes.clone()).await?;

            // No TTL: the cache copy is authoritative until replaced.
            self.cache.set(&self.cache_key, bytes, None).await?;
            Ok(())
        }
        .await;

        // Best-effort release; the TTL reclaims an unreleased lock.
        if let Err(e) = self.cache.del(&self.lock_key).await {
            warn!("Failed to release audience spec lock: {e}");
        }

        result
    }

    // --- Reader protocol --- //

    /// The filtered catalog view: leaves with available audience, level2
    /// nodes with items or metadata.
    #[instrument(skip_all, name = "(audience-list)")]
    pub async fn list(&self) -> Result<AudienceSpec, Error> {
        match self.cache.get(&self.cache_key).await {
            Ok(Some(bytes)) => match AudienceSpec::from_json_bytes(&bytes) {
                Ok(spec) => return Ok(spec.filtered_available()),
                Err(e) => {
                    // Torn or stale cache entry: fall through to the file.
                    warn!("Audience cache decode failed, re-deriving: {e}");
                }
            },
            Ok(None) => debug!("Audience cache miss"),
            Err(e) => warn!("Audience cache read failed: {e}"),
        }

        let spec = read_file(&self.file_path).await?;
        let filtered = spec.filtered_available();

        // Repopulate the cache with the filtered view. Failure only costs
        // the next reader a file read.
        match serde_json::to_vec_pretty(&filtered) {
            Ok(bytes) =>
                if let Err(e) = self.cache.set(&self.cache_key, bytes, None).await
                {
                    warn!("Failed to repopulate audience cache: {e}");
                },
            Err(e) => warn!("Failed to encode audience cache value: {e}"),
        }

        Ok(filtered)
    }

    /// The unfiltered catalog, read from the file. Capacity checks go
    /// through this so zeroed leaves still shadow the cache view.
    pub async fn full(&self) -> Result<AudienceSpec, Error> {
        read_file(&self.file_path).await
    }
}

/// Read and parse the catalog file; a missing file is an empty catalog.
async fn read_file(path: &Path) -> Result<AudienceSpec, Error> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound =>
                return Ok(AudienceSpec::default()),
            Err(e) => return Err(Error::Storage(e.to_string())),
        };
        AudienceSpec::from_json_bytes(&bytes)
            .map_err(|e| Error::Storage(e.to_string()))
    })
    .await
    .map_err(|e| Error::Storage(e.to_string()))?
}

/// Write to a temp file in the same directory, fsync, then rename over the
/// target. Rename on the same filesystem is atomic, so concurrent readers
/// see either the old or the new catalog, never a prefix.
async fn write_file_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), Error> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || {
        use std::io::Write;

        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory)
            .map_err(|e| Error::Storage(e.to_string()))?;

        let tmp_path = path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp_path)
            .map_err(|e| Error::Storage(e.to_string()))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::Storage(e.to_string()))?;
        drop(file);

        std::fs::rename(&tmp_path, &path)
            .map_err(|e| Error::Storage(e.to_string()))
    })
    .await
    .map_err(|e| Error::Storage(e.to_string()))?
}
