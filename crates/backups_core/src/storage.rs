//! Object store abstraction used by the bucket mirror and the synthetic workflow.

#[cfg(test)]
pub(crate) mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::collections::BTreeSet;

use crate::error::BackupsResult;

/// Minimal bucket operations needed to mirror and replace backups.
pub trait ObjectStore: Send {
    /// Create an empty bucket.
    ///
    /// # Errors
    ///
    /// If the bucket exists or cannot be created.
    fn create_bucket(&self, bucket: &str) -> BackupsResult<()>;

    /// Delete all objects of `bucket` and the bucket itself.
    ///
    /// Returns `false` if there was no such bucket.
    ///
    /// # Errors
    ///
    /// If the bucket exists but cannot be emptied or deleted.
    fn delete_bucket_if_exists(&self, bucket: &str) -> BackupsResult<bool>;

    /// List all keys of `bucket`.
    ///
    /// # Errors
    ///
    /// If the bucket does not exist or cannot be listed.
    fn list_keys(&self, bucket: &str) -> BackupsResult<BTreeSet<String>>;

    /// Copy `key` from `source_bucket` to the same key in `destination_bucket`,
    /// overwriting an existing object. Returns the number of bytes copied.
    ///
    /// # Errors
    ///
    /// If the object cannot be read or written.
    fn copy_object(
        &self,
        source_bucket: &str,
        key: &str,
        destination_bucket: &str,
    ) -> BackupsResult<u64>;
}

/// Creates object store clients; each mirror worker connects once on start-up.
pub trait StoreConnector: Sync {
    type Store: ObjectStore;

    /// Open a new client.
    ///
    /// # Errors
    ///
    /// If the client cannot be created, e.g. because of missing credentials.
    fn connect(&self) -> BackupsResult<Self::Store>;
}
