//! Copying all objects of one bucket into another using a pool of workers.

use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    thread,
};

use bytesize::ByteSize;
use crossbeam_channel::{bounded, Receiver};
use log::{debug, info, warn};

use crate::{
    error::{BackupsError, BackupsResult, MirrorErrorKind},
    storage::{ObjectStore, StoreConnector},
};

/// Default number of copy workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Statistics of a finished mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub objects: u64,
    pub bytes: u64,
}

impl fmt::Display for MirrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} objects, {}", self.objects, ByteSize(self.bytes))
    }
}

/// Copies every key of a bucket into another bucket under the same key.
///
/// Each worker opens its own client through the [`StoreConnector`] when it starts.
/// The first failing copy aborts the mirror: workers stop taking keys and the
/// error names the key that failed.
#[derive(Debug, Clone, Copy)]
pub struct BucketMirror<'a, C> {
    connector: &'a C,
    workers: usize,
}

struct Shared<'a> {
    source: &'a str,
    destination: &'a str,
    abort: AtomicBool,
    objects: AtomicU64,
    bytes: AtomicU64,
}

impl<'a, C: StoreConnector> BucketMirror<'a, C> {
    pub fn new(connector: &'a C, workers: usize) -> Self {
        Self {
            connector,
            workers: workers.max(1),
        }
    }

    /// Copy all objects from `source` to `destination`.
    ///
    /// # Errors
    ///
    /// * [`MirrorErrorKind::CopyFailed`] - If an object could not be copied.
    /// * [`MirrorErrorKind::ConnectFailed`] - If a worker could not open a client.
    /// * Any error listing the source bucket.
    pub fn mirror(&self, source: &str, destination: &str) -> BackupsResult<MirrorSummary> {
        let keys = self.connector.connect()?.list_keys(source)?;
        info!(
            "copying {} objects from {source} to {destination} using {} workers",
            keys.len(),
            self.workers
        );
        let summary = self.copy_keys(keys, source, destination)?;
        info!("copied {summary} from {source} to {destination}");
        Ok(summary)
    }

    /// Copy the given `keys` from `source` to `destination`.
    ///
    /// # Errors
    ///
    /// See [`BucketMirror::mirror`].
    pub fn copy_keys(
        &self,
        keys: impl IntoIterator<Item = String>,
        source: &str,
        destination: &str,
    ) -> BackupsResult<MirrorSummary> {
        let shared = Shared {
            source,
            destination,
            abort: AtomicBool::new(false),
            objects: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        };
        let (tx, rx) = bounded::<String>(self.workers);

        let results: Vec<BackupsResult<()>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|_| {
                    let rx = rx.clone();
                    let shared = &shared;
                    scope.spawn(move || self.worker(&rx, shared))
                })
                .collect();
            drop(rx);

            for key in keys {
                if shared.abort.load(Ordering::SeqCst) || tx.send(key).is_err() {
                    debug!("stop queueing keys");
                    break;
                }
            }
            drop(tx);

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(MirrorErrorKind::WorkerPanicked.into()))
                })
                .collect()
        });

        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }

        Ok(MirrorSummary {
            objects: shared.objects.into_inner(),
            bytes: shared.bytes.into_inner(),
        })
    }

    fn worker(&self, rx: &Receiver<String>, shared: &Shared<'_>) -> BackupsResult<()> {
        let store = self.connector.connect().map_err(|err| {
            shared.abort.store(true, Ordering::SeqCst);
            MirrorErrorKind::ConnectFailed(Box::new(err))
        })?;

        for key in rx {
            if shared.abort.load(Ordering::SeqCst) {
                break;
            }
            match store.copy_object(shared.source, &key, shared.destination) {
                Ok(bytes) => {
                    _ = shared.objects.fetch_add(1, Ordering::SeqCst);
                    _ = shared.bytes.fetch_add(bytes, Ordering::SeqCst);
                }
                Err(err) => {
                    shared.abort.store(true, Ordering::SeqCst);
                    warn!("copying {key} failed: {err}");
                    return Err(copy_failed(key, shared, err));
                }
            }
        }
        Ok(())
    }
}

fn copy_failed(key: String, shared: &Shared<'_>, cause: BackupsError) -> BackupsError {
    MirrorErrorKind::CopyFailed {
        key,
        source_bucket: shared.source.to_string(),
        destination: shared.destination.to_string(),
        cause: Box::new(cause),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::{error::BackupsErrorKind, storage::memory::MemoryStore};

    fn store_with(bucket: &str, keys: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        store.create_bucket(bucket).unwrap();
        for key in keys {
            store.put_object(bucket, key, format!("content of {key}")).unwrap();
        }
        store
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(DEFAULT_WORKERS)]
    fn all_keys_are_copied(#[case] workers: usize) {
        let keys: Vec<String> = (0..50).map(|i| format!("duplicity-full.{i:03}.vol.difftar.gpg")).collect();
        let store = store_with("src", &keys.iter().map(String::as_str).collect::<Vec<_>>());
        store.create_bucket("dst").unwrap();
        store.put_object("dst", "stale", "old").unwrap();

        let summary = BucketMirror::new(&store, workers).mirror("src", "dst").unwrap();

        assert_eq!(summary.objects, 50);
        let copied = store.list_keys("dst").unwrap();
        let mut expected: BTreeSet<String> = keys.iter().cloned().collect();
        _ = expected.insert("stale".to_string());
        assert_eq!(copied, expected);
        for key in &keys {
            assert_eq!(store.get_object("dst", key).unwrap(), store.get_object("src", key).unwrap());
        }
    }

    #[test]
    fn each_worker_connects_once() {
        let store = store_with("src", &["a", "b", "c", "d", "e"]);
        store.create_bucket("dst").unwrap();
        _ = BucketMirror::new(&store, 4).mirror("src", "dst").unwrap();
        // one connection for listing plus one per worker
        assert_eq!(store.connections(), 5);
    }

    #[test]
    fn summary_counts_bytes() {
        let store = store_with("src", &["a", "bb"]);
        store.create_bucket("dst").unwrap();
        let summary = BucketMirror::new(&store, 2).mirror("src", "dst").unwrap();
        assert_eq!(
            summary,
            MirrorSummary {
                objects: 2,
                bytes: ("content of a".len() + "content of bb".len()) as u64
            }
        );
    }

    #[test]
    fn empty_bucket_copies_nothing() {
        let store = store_with("src", &[]);
        store.create_bucket("dst").unwrap();
        let summary = BucketMirror::new(&store, 3).mirror("src", "dst").unwrap();
        assert_eq!(summary, MirrorSummary::default());
    }

    #[test]
    fn failing_key_is_named() {
        let store = store_with("src", &["a", "b", "c"]);
        store.create_bucket("dst").unwrap();
        store.fail_on("b");

        let err = BucketMirror::new(&store, 2).mirror("src", "dst").unwrap_err();
        assert!(matches!(
            err.kind(),
            BackupsErrorKind::Mirror(MirrorErrorKind::CopyFailed { key, source_bucket, .. })
                if key == "b" && source_bucket == "src"
        ));
        assert!(!store.list_keys("dst").unwrap().contains("b"));
    }

    #[test]
    fn missing_destination_fails() {
        let store = store_with("src", &["a"]);
        let err = BucketMirror::new(&store, 1).mirror("src", "dst").unwrap_err();
        assert!(matches!(
            err.kind(),
            BackupsErrorKind::Mirror(MirrorErrorKind::CopyFailed { key, .. }) if key == "a"
        ));
    }

    #[test]
    fn missing_source_fails() {
        let store = MemoryStore::new();
        assert!(BucketMirror::new(&store, 1).mirror("src", "dst").is_err());
    }
}
