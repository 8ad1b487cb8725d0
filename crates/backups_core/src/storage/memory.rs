//! In-memory object store. Clones share the same buckets, so a store can be
//! handed to a [`BucketMirror`](crate::BucketMirror) and inspected afterwards.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use bytes::Bytes;

use crate::{
    error::{BackupsResult, StorageErrorKind},
    storage::{ObjectStore, StoreConnector},
};

type Buckets = BTreeMap<String, BTreeMap<String, Bytes>>;

#[derive(Clone, Debug, Default)]
pub(crate) struct MemoryStore {
    buckets: Arc<Mutex<Buckets>>,
    failing_keys: Arc<Mutex<BTreeSet<String>>>,
    connections: Arc<AtomicUsize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn buckets(&self) -> BackupsResult<MutexGuard<'_, Buckets>> {
        self.buckets
            .lock()
            .map_err(|_| StorageErrorKind::Poisoned.into())
    }

    /// Store `data` under `key`, creating the bucket if needed.
    ///
    /// # Errors
    ///
    /// * [`StorageErrorKind::Poisoned`] - If another user of the store panicked.
    pub fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> BackupsResult<()> {
        _ = self
            .buckets()?
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data.into());
        Ok(())
    }

    /// Read the object stored under `key`.
    ///
    /// # Errors
    ///
    /// * [`StorageErrorKind::NoSuchBucket`] - If the bucket does not exist.
    /// * [`StorageErrorKind::NoSuchKey`] - If the key does not exist.
    pub fn get_object(&self, bucket: &str, key: &str) -> BackupsResult<Bytes> {
        let buckets = self.buckets()?;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageErrorKind::NoSuchBucket(bucket.to_string()))?;
        objects.get(key).cloned().ok_or_else(|| {
            StorageErrorKind::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Whether a bucket named `bucket` exists.
    #[must_use]
    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets
            .lock()
            .map(|buckets| buckets.contains_key(bucket))
            .unwrap_or_default()
    }

    /// Names of all buckets.
    #[must_use]
    pub fn bucket_names(&self) -> Vec<String> {
        self.buckets
            .lock()
            .map(|buckets| buckets.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make every copy of `key` fail.
    pub fn fail_on(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.lock() {
            _ = keys.insert(key.to_string());
        }
    }

    /// Number of clients opened through [`StoreConnector::connect`].
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn is_failing(&self, key: &str) -> bool {
        self.failing_keys
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryStore {
    fn create_bucket(&self, bucket: &str) -> BackupsResult<()> {
        let mut buckets = self.buckets()?;
        if buckets.contains_key(bucket) {
            return Err(StorageErrorKind::BucketExists(bucket.to_string()).into());
        }
        _ = buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    fn delete_bucket_if_exists(&self, bucket: &str) -> BackupsResult<bool> {
        Ok(self.buckets()?.remove(bucket).is_some())
    }

    fn list_keys(&self, bucket: &str) -> BackupsResult<BTreeSet<String>> {
        self.buckets()?
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .ok_or_else(|| StorageErrorKind::NoSuchBucket(bucket.to_string()).into())
    }

    fn copy_object(
        &self,
        source_bucket: &str,
        key: &str,
        destination_bucket: &str,
    ) -> BackupsResult<u64> {
        if self.is_failing(key) {
            return Err(StorageErrorKind::InjectedFailure(key.to_string()).into());
        }
        let data = self.get_object(source_bucket, key)?;
        let mut buckets = self.buckets()?;
        let destination = buckets
            .get_mut(destination_bucket)
            .ok_or_else(|| StorageErrorKind::NoSuchBucket(destination_bucket.to_string()))?;
        let len = data.len() as u64;
        _ = destination.insert(key.to_string(), data);
        Ok(len)
    }
}

impl StoreConnector for MemoryStore {
    type Store = Self;

    fn connect(&self) -> BackupsResult<Self> {
        _ = self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::error::BackupsErrorKind;

    #[test]
    fn buckets_are_shared_between_clones() {
        let store = MemoryStore::new();
        let client = store.connect().unwrap();
        client.create_bucket("a").unwrap();
        client.put_object("a", "x", "data").unwrap();

        assert!(store.has_bucket("a"));
        assert_eq!(store.get_object("a", "x").unwrap(), Bytes::from("data"));
        assert_eq!(store.connections(), 1);
    }

    #[test]
    fn creating_an_existing_bucket_fails() {
        let store = MemoryStore::new();
        store.create_bucket("a").unwrap();
        let err = store.create_bucket("a").unwrap_err();
        assert!(matches!(
            err.kind(),
            BackupsErrorKind::Storage(StorageErrorKind::BucketExists(_))
        ));
    }

    #[test]
    fn deleting_removes_bucket_with_contents() {
        let store = MemoryStore::new();
        store.put_object("a", "x", "data").unwrap();
        assert!(store.delete_bucket_if_exists("a").unwrap());
        assert!(!store.delete_bucket_if_exists("a").unwrap());
        assert!(store.list_keys("a").is_err());
    }

    #[test]
    fn copy_overwrites_and_reports_size() {
        let store = MemoryStore::new();
        store.put_object("a", "x", "new data").unwrap();
        store.put_object("b", "x", "old").unwrap();
        assert_eq!(store.copy_object("a", "x", "b").unwrap(), 8);
        assert_eq!(store.get_object("b", "x").unwrap(), Bytes::from("new data"));
    }

    #[test]
    fn injected_failures_are_reported() {
        let store = MemoryStore::new();
        store.put_object("a", "x", "data").unwrap();
        store.create_bucket("b").unwrap();
        store.fail_on("x");
        let err = store.copy_object("a", "x", "b").unwrap_err();
        assert!(matches!(
            err.kind(),
            BackupsErrorKind::Storage(StorageErrorKind::InjectedFailure(key)) if key == "x"
        ));
    }
}
