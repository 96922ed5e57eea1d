//! The object store, consumed as a capability (§1, §6): `put`, `get`, `list`,
//! `presign`. The in-process dispatch path never calls this (the Shard Store
//! substitutes); the distributed path's job payloads reference a
//! `(bucket, key)` pair the trait expects. `MemoryObjectStore` backs tests
//! and local runs; a real deployment swaps in a MinIO/S3-backed client
//! behind the same trait.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub size: usize,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>>;

    async fn presigned_get_object(&self, bucket: &str, key: &str, expiry_s: u64) -> Result<String>;

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn make_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()>;

    /// Attaches a bucket policy (raw JSON, opaque to this trait). A no-op on
    /// backends, like `MemoryObjectStore`, with no access-control model.
    async fn set_bucket_policy(&self, bucket: &str, policy_json: &str) -> Result<()>;
}

struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
    metadata: HashMap<String, String>,
}

#[derive(Default)]
struct Bucket {
    objects: HashMap<String, StoredObject>,
    region: Option<String>,
    policy_json: Option<String>,
}

/// In-memory stand-in for MinIO/S3, keyed the way §6 describes:
/// `bigdata-images` holds `partition-{i}/{hash8}-{epoch_ms}.{ext}`,
/// `bigdata-results` holds `results/{id}.json`.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let mut buckets = self.buckets.write();
        let b = buckets.entry(bucket.to_string()).or_default();
        b.objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let buckets = self.buckets.read();
        buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| CoreError::NotFound(format!("{bucket}/{key}")))
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let buckets = self.buckets.read();
        let Some(b) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        Ok(b.objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectMeta {
                key: key.clone(),
                size: obj.bytes.len(),
                content_type: obj.content_type.clone(),
                metadata: obj.metadata.clone(),
            })
            .collect())
    }

    async fn presigned_get_object(&self, bucket: &str, key: &str, expiry_s: u64) -> Result<String> {
        Ok(format!("memory://{bucket}/{key}?expires_in={expiry_s}"))
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.write();
        if let Some(b) = buckets.get_mut(bucket) {
            b.objects.remove(key);
        }
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()> {
        let mut buckets = self.buckets.write();
        let b = buckets.entry(bucket.to_string()).or_default();
        if let Some(region) = region {
            b.region = Some(region.to_string());
        }
        Ok(())
    }

    async fn set_bucket_policy(&self, bucket: &str, policy_json: &str) -> Result<()> {
        let mut buckets = self.buckets.write();
        let b = buckets.entry(bucket.to_string()).or_default();
        b.policy_json = Some(policy_json.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryObjectStore::new();
        store.make_bucket("bigdata-images", Some("us-east-1")).await.unwrap();
        store
            .put_object("bigdata-images", "partition-0/a.jpg", b"data", "image/jpeg", &HashMap::new())
            .await
            .unwrap();
        let bytes = store.get_object("bigdata-images", "partition-0/a.jpg").await.unwrap();
        assert_eq!(bytes, b"data");
    }

    #[tokio::test]
    async fn list_objects_filters_by_prefix() {
        let store = MemoryObjectStore::new();
        store.put_object("b", "partition-0/x", b"1", "t", &HashMap::new()).await.unwrap();
        store.put_object("b", "partition-1/y", b"22", "t", &HashMap::new()).await.unwrap();
        let listed = store.list_objects("b", "partition-0/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 1);
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let store = MemoryObjectStore::new();
        assert!(matches!(
            store.get_object("b", "missing").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn put_object_preserves_metadata() {
        let store = MemoryObjectStore::new();
        let mut metadata = HashMap::new();
        metadata.insert("origin".to_string(), "upload".to_string());
        store.put_object("b", "k", b"x", "image/jpeg", &metadata).await.unwrap();
        let listed = store.list_objects("b", "k").await.unwrap();
        assert_eq!(listed[0].metadata, metadata);
        assert_eq!(listed[0].content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn set_bucket_policy_is_recorded() {
        let store = MemoryObjectStore::new();
        store.make_bucket("b", None).await.unwrap();
        store.set_bucket_policy("b", "{\"Version\":\"2012-10-17\"}").await.unwrap();
        assert!(store.buckets.read().get("b").unwrap().policy_json.is_some());
    }
}
