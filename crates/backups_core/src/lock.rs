//! Directory based locks preventing concurrent duplicity runs for the same backup.
//!
//! Creating a directory is atomic on all supported filesystems, so whoever creates
//! `<name>.lock` holds the lock. A lock older than [`STALE_LOCK_AGE`] is considered
//! left over from a crashed run and is taken over.
//!
//! Taking over a stale lock is racy: a process that saw the stale lock may remove
//! the fresh lock another process has just created in its place. Runs of the same
//! backup three hours apart are rare enough to accept this.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use log::{debug, info, warn};

use crate::error::{BackupsError, BackupsErrorKind, BackupsResult, LockErrorKind};

/// Age after which an existing lock is considered stale (three hours).
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(3 * 60 * 60);

/// Result of trying to take a [`DirLock`].
#[derive(Debug)]
pub enum LockOutcome {
    /// The lock is held until the guard is released or dropped.
    Acquired(LockGuard),
    /// Someone else holds a lock of the given age.
    Busy { age: Duration },
}

/// A lock represented by a directory.
#[derive(Debug, Clone)]
pub struct DirLock {
    path: PathBuf,
    stale_after: Duration,
}

impl DirLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: STALE_LOCK_AGE,
        }
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock, taking over a stale lock at most once.
    ///
    /// # Errors
    ///
    /// * [`LockErrorKind::CreatingLockFailed`] - If the directory cannot be created for another reason than existing.
    /// * [`LockErrorKind::ReadingLockAgeFailed`] - If the age of an existing lock cannot be determined.
    /// * [`LockErrorKind::RemovingLockFailed`] - If a stale lock cannot be removed.
    pub fn acquire(&self) -> BackupsResult<LockOutcome> {
        if let Some(outcome) = self.try_create()? {
            return Ok(outcome);
        }

        let age = match self.age() {
            Ok(age) => age,
            // released between our attempt and the metadata lookup
            Err(err) if is_not_found(&err) => return self.retry(),
            Err(err) => return Err(err),
        };

        if age <= self.stale_after {
            debug!("lock {} is held, age {age:?}", self.path.display());
            return Ok(LockOutcome::Busy { age });
        }

        info!(
            "removing stale lock {}, age {}",
            self.path.display(),
            humantime::format_duration(Duration::from_secs(age.as_secs()))
        );
        match fs::remove_dir(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(LockErrorKind::RemovingLockFailed {
                    path: self.path.clone(),
                    source,
                }
                .into())
            }
        }
        self.retry()
    }

    fn retry(&self) -> BackupsResult<LockOutcome> {
        match self.try_create()? {
            Some(outcome) => Ok(outcome),
            None => {
                let age = self.age().unwrap_or_default();
                Ok(LockOutcome::Busy { age })
            }
        }
    }

    /// Create the lock directory; `None` if it already exists.
    fn try_create(&self) -> BackupsResult<Option<LockOutcome>> {
        match fs::create_dir(&self.path) {
            Ok(()) => {
                debug!("acquired lock {}", self.path.display());
                Ok(Some(LockOutcome::Acquired(LockGuard {
                    path: Some(self.path.clone()),
                })))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(source) => Err(LockErrorKind::CreatingLockFailed {
                path: self.path.clone(),
                source,
            }
            .into()),
        }
    }

    fn age(&self) -> BackupsResult<Duration> {
        let modified = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map_err(|source| LockErrorKind::ReadingLockAgeFailed {
                path: self.path.clone(),
                source,
            })?;
        // an mtime in the future counts as a fresh lock
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default())
    }
}

fn is_not_found(err: &BackupsError) -> bool {
    matches!(
        err.kind(),
        BackupsErrorKind::Lock(LockErrorKind::ReadingLockAgeFailed { source, .. })
            if source.kind() == io::ErrorKind::NotFound
    )
}

/// Holds a [`DirLock`]; the lock directory is removed on [`LockGuard::release`] or drop.
#[derive(Debug)]
pub struct LockGuard {
    path: Option<PathBuf>,
}

impl LockGuard {
    /// Release the lock.
    ///
    /// # Errors
    ///
    /// * [`LockErrorKind::RemovingLockFailed`] - If the lock directory cannot be removed.
    pub fn release(mut self) -> BackupsResult<()> {
        match self.path.take() {
            Some(path) => remove_lock(&path),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = remove_lock(&path) {
                warn!("{err}");
            }
        }
    }
}

fn remove_lock(path: &Path) -> BackupsResult<()> {
    fs::remove_dir(path).map_err(|source| LockErrorKind::RemovingLockFailed {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("released lock {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{sync::Barrier, thread};

    use filetime::{set_file_mtime, FileTime};
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn lock_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn age_lock(path: &Path, age: Duration) {
        let mtime = SystemTime::now() - age;
        set_file_mtime(path, FileTime::from_system_time(mtime)).unwrap();
    }

    #[rstest]
    fn lock_is_created_and_released(lock_dir: TempDir) {
        let path = lock_dir.path().join("my_backup.lock");
        let LockOutcome::Acquired(guard) = DirLock::new(&path).acquire().unwrap() else {
            panic!("lock should be free");
        };
        assert!(path.is_dir());
        guard.release().unwrap();
        assert!(!path.exists());
    }

    #[rstest]
    fn lock_is_released_on_drop(lock_dir: TempDir) {
        let path = lock_dir.path().join("my_backup.lock");
        {
            let _outcome = DirLock::new(&path).acquire().unwrap();
            assert!(path.is_dir());
        }
        assert!(!path.exists());
    }

    #[rstest]
    fn held_lock_is_busy(lock_dir: TempDir) {
        let path = lock_dir.path().join("my_backup.lock");
        let lock = DirLock::new(&path);
        let LockOutcome::Acquired(_guard) = lock.acquire().unwrap() else {
            panic!("lock should be free");
        };
        let LockOutcome::Busy { age } = lock.acquire().unwrap() else {
            panic!("lock should be held");
        };
        assert!(age < Duration::from_secs(60));
        assert!(path.is_dir());
    }

    #[rstest]
    #[case(Duration::from_secs(3 * 60 * 60 - 60), false)]
    #[case(Duration::from_secs(3 * 60 * 60 + 60), true)]
    #[case(Duration::from_secs(24 * 60 * 60), true)]
    fn stale_locks_are_taken_over(
        lock_dir: TempDir,
        #[case] age: Duration,
        #[case] taken_over: bool,
    ) {
        let path = lock_dir.path().join("my_backup.lock");
        fs::create_dir(&path).unwrap();
        age_lock(&path, age);

        match DirLock::new(&path).acquire().unwrap() {
            LockOutcome::Acquired(guard) => {
                assert!(taken_over, "fresh lock must not be taken over");
                assert!(path.is_dir());
                guard.release().unwrap();
            }
            LockOutcome::Busy { age: found } => {
                assert!(!taken_over, "stale lock must be taken over");
                assert_eq!(found.as_secs() / 60, age.as_secs() / 60);
            }
        }
    }

    #[rstest]
    fn stale_after_is_configurable(lock_dir: TempDir) {
        let path = lock_dir.path().join("short.lock");
        fs::create_dir(&path).unwrap();
        age_lock(&path, Duration::from_secs(120));
        let lock = DirLock::new(&path).with_stale_after(Duration::from_secs(60));
        assert!(matches!(lock.acquire().unwrap(), LockOutcome::Acquired(_)));
    }

    #[rstest]
    fn missing_parent_is_an_error(lock_dir: TempDir) {
        let path = lock_dir.path().join("missing").join("my_backup.lock");
        assert!(DirLock::new(path).acquire().is_err());
    }

    #[rstest]
    fn concurrent_acquisitions_have_one_winner(lock_dir: TempDir) {
        let path = lock_dir.path().join("my_backup.lock");
        let lock = DirLock::new(&path);
        let start = Barrier::new(8);

        let outcomes: Vec<LockOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        _ = start.wait();
                        lock.acquire().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let acquired = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, LockOutcome::Acquired(_)))
            .count();
        assert_eq!(acquired, 1);
        assert!(path.is_dir());
        drop(outcomes);
        assert!(!path.exists());
    }

    #[rstest]
    fn lock_recreated_after_stale_removal_is_busy(lock_dir: TempDir) {
        let path = lock_dir.path().join("my_backup.lock");
        // another process took the lock between removing the stale one and our retry
        fs::create_dir(&path).unwrap();

        let LockOutcome::Busy { age } = DirLock::new(&path).retry().unwrap() else {
            panic!("retry must not take over a fresh lock");
        };
        assert!(age < Duration::from_secs(60));
        assert!(path.is_dir());
    }
}
