//! S3-based object store backend.
//!
//! This module implements [`ObjectStore`] on top of AWS S3 (or compatible
//! services).

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration, Tag, Tagging};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::stack::ProviderResult;

use super::store::{BucketProbe, ObjectStore, PutObject, RemoteObject};

/// Region in which buckets are created without a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

/// S3-based object store.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    /// S3 client.
    client: Client,
    /// Region new buckets are created in.
    region: Option<String>,
}

impl S3ObjectStore {
    /// Creates a store from a loaded AWS configuration.
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
            region: config.region().map(ToString::to_string),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn probe_bucket(&self, bucket: &str) -> ProviderResult<BucketProbe> {
        let result = self.client.head_bucket().bucket(bucket).send().await;

        match result {
            Ok(_) => Ok(BucketProbe::Exists),
            Err(sdk_err) => {
                let status = sdk_err.raw_response().map(|r| r.status().as_u16());
                match status {
                    Some(403) => Ok(BucketProbe::Forbidden),
                    Some(404) => Ok(BucketProbe::Missing),
                    _ => Err(ProviderError::from_sdk("HeadBucket", &sdk_err)),
                }
            }
        }
    }

    async fn create_bucket(&self, bucket: &str) -> ProviderResult<()> {
        info!("Creating bucket {bucket}");

        let mut request = self.client.create_bucket().bucket(bucket);
        if let Some(region) = self.region.as_deref().filter(|r| *r != DEFAULT_REGION) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("CreateBucket", &e))?;

        Ok(())
    }

    async fn tag_bucket(
        &self,
        bucket: &str,
        tags: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        let tag_set = tags
            .iter()
            .map(|(key, value)| {
                Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .map_err(|e| ProviderError::new("PutBucketTagging", e.to_string()))
            })
            .collect::<ProviderResult<Vec<_>>>()?;

        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| ProviderError::new("PutBucketTagging", e.to_string()))?;

        self.client
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("PutBucketTagging", &e))?;

        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> ProviderResult<Vec<RemoteObject>> {
        debug!("Listing s3://{bucket}/{prefix}");

        let mut objects = Vec::new();
        let mut continuation = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation)
                .send()
                .await
                .map_err(|e| ProviderError::from_sdk("ListObjectsV2", &e))?;

            objects.extend(output.contents().iter().filter_map(|object| {
                Some(RemoteObject {
                    key: object.key()?.to_string(),
                    size: u64::try_from(object.size().unwrap_or_default()).unwrap_or_default(),
                    etag: object.e_tag().map(str::to_string),
                })
            }));

            continuation = output.next_continuation_token().map(str::to_string);
            if continuation.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    async fn put_object(&self, object: PutObject) -> ProviderResult<()> {
        debug!("Uploading s3://{}/{}", object.bucket, object.key);

        self.client
            .put_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .body(ByteStream::from(object.body))
            .content_type(&object.content_type)
            .set_tagging(object.tagging)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("PutObject", &e))?;

        Ok(())
    }
}
