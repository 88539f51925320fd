//! Content-addressed asset synchronization.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::{AssetError, Result};

use super::manifest::{
    common_prefix, content_type, etag_matches, expand_folder, md5_hex, resolve, tagging,
    FileEntry, ResolvedFile,
};
use super::store::{BucketProbe, ObjectStore, PutObject, RemoteObject};

/// Default number of concurrent uploads.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Counts of a synchronization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Objects uploaded.
    pub uploaded: usize,
    /// Objects skipped because the remote copy matched.
    pub skipped: usize,
}

impl SyncReport {
    /// Adds the counts of another run.
    pub const fn merge(&mut self, other: Self) {
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
    }
}

/// Uploads files into buckets, skipping unchanged ones.
pub struct AssetSynchronizer {
    /// Object store.
    store: Arc<dyn ObjectStore>,
    /// Default tags for created buckets and uploaded objects.
    tags: BTreeMap<String, String>,
    /// Maximum concurrent uploads.
    concurrency: usize,
    /// Buckets already ensured.
    ensured: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for AssetSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetSynchronizer")
            .field("tags", &self.tags)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl AssetSynchronizer {
    /// Creates a synchronizer.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, tags: BTreeMap<String, String>) -> Self {
        Self {
            store,
            tags,
            concurrency: DEFAULT_CONCURRENCY,
            ensured: Mutex::new(HashSet::new()),
        }
    }

    /// Sets the maximum number of concurrent uploads.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Makes sure `bucket` exists, creating and tagging it if needed.
    ///
    /// A bucket owned by another account is accepted with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe, creation or tagging fails.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.is_ensured(bucket) {
            return Ok(());
        }

        match self.store.probe_bucket(bucket).await.map_err(AssetError::Store)? {
            BucketProbe::Exists => debug!("Bucket {bucket} exists"),
            BucketProbe::Forbidden => {
                warn!("Bucket {bucket} exists but is not accessible, it may belong to another account");
            }
            BucketProbe::Missing => {
                info!("Bucket {bucket} not found, creating it");
                self.store
                    .create_bucket(bucket)
                    .await
                    .map_err(AssetError::Store)?;
                if !self.tags.is_empty() {
                    self.store
                        .tag_bucket(bucket, &self.tags)
                        .await
                        .map_err(AssetError::Store)?;
                }
            }
        }

        self.ensured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bucket.to_string());
        Ok(())
    }

    fn is_ensured(&self, bucket: &str) -> bool {
        self.ensured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(bucket)
    }

    /// Uploads every file whose remote copy differs in size or content.
    ///
    /// The manifest is validated before any call to the store. One failed
    /// upload aborts the batch.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid manifest, an unreadable file or a
    /// failed store call.
    pub async fn sync_files(&self, bucket: &str, files: Vec<FileEntry>) -> Result<SyncReport> {
        let files = resolve(files).await?;
        if files.is_empty() {
            return Ok(SyncReport::default());
        }

        self.ensure_bucket(bucket).await?;

        let prefix = common_prefix(files.iter().map(|f| f.key.as_str()));
        let remote: HashMap<String, RemoteObject> = self
            .store
            .list_objects(bucket, &prefix)
            .await
            .map_err(AssetError::Store)?
            .into_iter()
            .map(|object| (object.key.clone(), object))
            .collect();
        debug!("Found {} remote object(s) under {bucket}/{prefix}", remote.len());

        let tags = tagging(&self.tags);
        let tags = tags.as_deref();
        let remote = &remote;

        let uploads: Vec<bool> = stream::iter(files)
            .map(|file| async move {
                let existing = remote.get(&file.key);
                self.sync_one(bucket, file, existing, tags).await
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let uploaded = uploads.iter().filter(|u| **u).count();
        let report = SyncReport {
            uploaded,
            skipped: uploads.len() - uploaded,
        };
        info!(
            "Synchronized {bucket}/{prefix}: {} uploaded, {} unchanged",
            report.uploaded, report.skipped
        );

        Ok(report)
    }

    /// Uploads one file unless the remote copy matches. Returns true if uploaded.
    async fn sync_one(
        &self,
        bucket: &str,
        file: ResolvedFile,
        existing: Option<&RemoteObject>,
        tags: Option<&str>,
    ) -> Result<bool> {
        let body = file.read().await?;

        let unchanged = existing.is_some_and(|remote| {
            remote.size == file.size
                && remote
                    .etag
                    .as_deref()
                    .is_some_and(|etag| etag_matches(etag, &md5_hex(&body)))
        });

        if unchanged {
            debug!("Skipping unchanged {}", file.key);
            return Ok(false);
        }

        info!("Uploading {bucket}/{} ({} bytes)", file.key, file.size);
        self.store
            .put_object(PutObject {
                bucket: bucket.to_string(),
                content_type: content_type(&file.key),
                key: file.key,
                body,
                tagging: tags.map(str::to_string),
            })
            .await
            .map_err(AssetError::Store)?;

        Ok(true)
    }

    /// Uploads a folder tree under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be walked or the sync fails.
    pub async fn sync_folder(&self, bucket: &str, folder: &Path, prefix: &str) -> Result<SyncReport> {
        let files = expand_folder(folder, prefix)?;
        info!(
            "Synchronizing {} file(s) from {} to {bucket}",
            files.len(),
            folder.display()
        );
        self.sync_files(bucket, files).await
    }
}
