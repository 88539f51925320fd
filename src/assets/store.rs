//! Object store trait definition.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::stack::ProviderResult;

/// Result of probing a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketProbe {
    /// The bucket exists and is accessible.
    Exists,
    /// The bucket exists but belongs to another account.
    Forbidden,
    /// The bucket does not exist.
    Missing,
}

/// An object listed in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Entity tag, possibly quoted.
    pub etag: Option<String>,
}

/// A single upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    /// Target bucket.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Content.
    pub body: Vec<u8>,
    /// Content type.
    pub content_type: String,
    /// URL-encoded `k=v&k2=v2` tag set.
    pub tagging: Option<String>,
}

/// Trait for object store backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Checks whether a bucket exists and is ours.
    async fn probe_bucket(&self, bucket: &str) -> ProviderResult<BucketProbe>;

    /// Creates a bucket.
    async fn create_bucket(&self, bucket: &str) -> ProviderResult<()>;

    /// Replaces the tag set of a bucket.
    async fn tag_bucket(&self, bucket: &str, tags: &BTreeMap<String, String>)
    -> ProviderResult<()>;

    /// Lists every object under `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> ProviderResult<Vec<RemoteObject>>;

    /// Uploads an object.
    async fn put_object(&self, object: PutObject) -> ProviderResult<()>;
}
