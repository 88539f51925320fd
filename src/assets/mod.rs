//! Asset synchronization.
//!
//! This module provides:
//! - The [`ObjectStore`] trait and its S3 backend
//! - Upload manifests and folder expansion
//! - [`AssetSynchronizer`], which skips files whose remote copy already
//!   matches in size and content hash

mod manifest;
mod s3;
mod store;
mod sync;

pub use manifest::{
    common_prefix, content_type, etag_matches, expand_folder, md5_hex, normalize_prefix, resolve,
    tagging, AssetSource, FileEntry, ResolvedFile,
};
pub use s3::S3ObjectStore;
pub use store::{BucketProbe, ObjectStore, PutObject, RemoteObject};
pub use sync::{AssetSynchronizer, SyncReport, DEFAULT_CONCURRENCY};

#[cfg(test)]
pub use store::MockObjectStore;
