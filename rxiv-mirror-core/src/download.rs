//! Listing and fetching bundles from object storage.
//!
//! [`ObjectStoreBundles`] implements [`BundleStore`] on top of the
//! `object_store` crate, one client per registered bucket. For S3 the clients
//! are built with requester-pays enabled, retries off and no request timeout,
//! so a failing page or download surfaces immediately to the caller.

use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectMeta, ObjectStore, RetryConfig};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::config::{SourceCollection, StoreSettings};
use crate::contract::BundleStore;
use crate::error::StoreError;

/// Access key pair for the object store, read from the environment by the CLI.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Bucket name -> object store client.
#[derive(Default)]
pub struct ObjectStoreBundles {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectStoreBundles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already-built store for `bucket` (an S3 client, or
    /// `object_store::memory::InMemory` in tests).
    pub fn with_bucket(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }

    /// Build one S3 client per bucket.
    pub fn s3<'a>(
        settings: &StoreSettings,
        credentials: &S3Credentials,
        buckets: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, StoreError> {
        let mut bundles = Self::new();
        for bucket in buckets {
            if bundles.stores.contains_key(bucket) {
                continue;
            }
            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(bucket)
                .with_region(&settings.region)
                .with_access_key_id(&credentials.access_key_id)
                .with_secret_access_key(&credentials.secret_access_key)
                .with_request_payer(settings.requester_pays)
                .with_client_options(ClientOptions::new().with_timeout_disabled())
                .with_retry(RetryConfig {
                    max_retries: 0,
                    ..Default::default()
                });
            if let Some(endpoint) = &settings.endpoint {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_virtual_hosted_style_request(false)
                    .with_allow_http(true);
            }
            let store = builder.build().map_err(|source| StoreError::Client {
                bucket: bucket.to_string(),
                source,
            })?;
            info!(
                bucket,
                region = %settings.region,
                requester_pays = settings.requester_pays,
                "Initialised S3 client"
            );
            bundles = bundles.with_bucket(bucket, Arc::new(store));
        }
        Ok(bundles)
    }

    fn store_for(&self, collection: &SourceCollection) -> Result<&Arc<dyn ObjectStore>, StoreError> {
        self.stores.get(&collection.bucket).ok_or_else(|| {
            StoreError::Other(format!(
                "no object store client registered for bucket {}",
                collection.bucket
            ))
        })
    }
}

#[async_trait::async_trait]
impl BundleStore for ObjectStoreBundles {
    async fn list_keys(&self, collection: &SourceCollection) -> Result<Vec<String>, StoreError> {
        let store = self.store_for(collection)?;
        let prefix = collection.prefix_str();
        let root = listing_root(prefix);

        let objects: Vec<ObjectMeta> = store
            .list(root.as_ref())
            .try_collect()
            .await
            .map_err(|source| {
                error!(bucket = %collection.bucket, prefix = collection.prefix_str(), error = %source, "Listing failed");
                StoreError::List {
                    bucket: collection.bucket.clone(),
                    prefix: collection.prefix_str().to_string(),
                    source,
                }
            })?;

        info!(
            bucket = %collection.bucket,
            prefix = collection.prefix_str(),
            count = objects.len(),
            "Listed collection"
        );
        Ok(objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn fetch_to(
        &self,
        collection: &SourceCollection,
        key: &str,
        dest: &Path,
    ) -> Result<u64, StoreError> {
        let store = self.store_for(collection)?;
        let fetch_err = |source: object_store::Error| StoreError::Fetch {
            key: key.to_string(),
            source,
        };
        let write_err = |source: std::io::Error| StoreError::Write {
            key: key.to_string(),
            path: dest.to_path_buf(),
            source,
        };

        let location = ObjectPath::parse(key).map_err(|e| fetch_err(e.into()))?;
        let mut stream = store.get(&location).await.map_err(fetch_err)?.into_stream();

        let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
        let mut written = 0u64;
        while let Some(chunk) = stream.try_next().await.map_err(fetch_err)? {
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;

        debug!(key, bytes = written, path = %dest.display(), "Fetched bundle");
        Ok(written)
    }
}

/// Segment-aligned directory to list for a raw key prefix.
///
/// `object_store` only lists whole path segments, so `Current_Content/Sept`
/// lists `Current_Content/` and the caller keeps keys starting with the full
/// prefix.
fn listing_root(prefix: &str) -> Option<ObjectPath> {
    prefix
        .rfind('/')
        .map(|end| &prefix[..end])
        .filter(|dir| !dir.is_empty())
        .map(ObjectPath::from)
}

/// True only for keys carrying the bundle suffix.
pub fn is_bundle_key(key: &str, suffix: &str) -> bool {
    key.ends_with(suffix)
}

/// Keep the bundle keys, preserving listing order.
pub fn select_bundles(keys: Vec<String>, suffix: &str) -> Vec<String> {
    keys.into_iter()
        .filter(|key| is_bundle_key(key, suffix))
        .collect()
}

/// A filtered listing: how many keys the collection held and which are bundles.
#[derive(Debug, Clone)]
pub struct BundleListing {
    pub total_keys: usize,
    pub bundles: Vec<String>,
}

/// Lister followed by Filter.
pub async fn list_bundles(
    store: &dyn BundleStore,
    collection: &SourceCollection,
    suffix: &str,
) -> Result<BundleListing, StoreError> {
    let keys = store.list_keys(collection).await?;
    let total_keys = keys.len();
    let bundles = select_bundles(keys, suffix);
    debug!(
        bucket = %collection.bucket,
        total_keys,
        bundles = bundles.len(),
        "Filtered listing to bundles"
    );
    Ok(BundleListing {
        total_keys,
        bundles,
    })
}
