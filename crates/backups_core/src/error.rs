//! Error types and Result module.

use std::path::PathBuf;

use displaydoc::Display;
use thiserror::Error;

/// Result type that is being returned from methods that can fail and thus have [`BackupsError`]s.
pub type BackupsResult<T> = Result<T, BackupsError>;

// [`Error`] is public, but opaque and easy to keep compatible.
#[derive(Error, Debug)]
#[error(transparent)]
/// Errors that can result from backups.
pub struct BackupsError(#[from] BackupsErrorKind);

// Accessors for anything we do want to expose publicly.
impl BackupsError {
    /// Expose the inner error kind.
    ///
    /// This is useful for matching on the error kind.
    pub fn into_inner(self) -> BackupsErrorKind {
        self.0
    }

    /// Borrow the inner error kind.
    pub fn kind(&self) -> &BackupsErrorKind {
        &self.0
    }
}

/// [`BackupsErrorKind`] describes the errors that can happen while running a backups operation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BackupsErrorKind {
    /// [`ConfigErrorKind`] describes the errors that can happen while reading the configuration
    #[error(transparent)]
    Config(#[from] ConfigErrorKind),

    /// [`LockErrorKind`] describes the errors that can happen while taking or releasing a lock
    #[error(transparent)]
    Lock(#[from] LockErrorKind),

    /// [`RunnerErrorKind`] describes the errors that can happen while running duplicity
    #[error(transparent)]
    Runner(#[from] RunnerErrorKind),

    /// [`StorageErrorKind`] describes the errors returned by the object store
    #[error(transparent)]
    Storage(#[from] StorageErrorKind),

    /// [`MirrorErrorKind`] describes the errors that can happen while mirroring a bucket
    #[error(transparent)]
    Mirror(#[from] MirrorErrorKind),

    /// [`SyntheticErrorKind`] describes the errors of the synthetic backup workflow
    #[error(transparent)]
    Synthetic(#[from] SyntheticErrorKind),
}

/// [`ConfigErrorKind`] describes the errors that can happen while reading the configuration
#[derive(Error, Debug, Display)]
pub enum ConfigErrorKind {
    /// No config file: `{0:?}`. Please run the 'init' command to create.
    NoConfigFile(PathBuf),
    /// reading config file `{path:?}` failed: {source}
    ReadingConfigFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Config file {0:?} already exists
    ConfigFileExists(PathBuf),
    /// writing config file `{path:?}` failed: {source}
    WritingConfigFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// line {line}: no section header before `{text}`
    MissingSectionHeader { line: usize, text: String },
    /// line {line}: expected `key = value`, found `{text}`
    InvalidLine { line: usize, text: String },
    /// line {line}: section [{section}] is defined twice
    DuplicateSection { line: usize, section: String },
    /// line {line}: option `{key}` is defined twice in section [{section}]
    DuplicateOption {
        line: usize,
        section: String,
        key: String,
    },
    /// no such config: {0}
    NoSuchConfig(String),
    /// config [{section}] has no option `{key}`
    MissingOption { section: String, key: String },
    /// bad interpolation in `{0}`: '%' must be followed by '%' or '(name)s'
    BadInterpolation(String),
    /// option `{0}` referenced by an interpolation does not exist
    UnknownReference(String),
    /// interpolation of option `{0}` exceeds the maximum depth
    InterpolationDepthExceeded(String),
    /// environment variable `{0}` referenced by the config is not set
    UnsetVariable(String),
    /// newline detected in non-slashed line "{0}"; please double check your config file
    NewlineInSource(String),
    /// source line `{0}` has no pattern
    IncompleteSource(String),
    /// option `{key}` has an invalid value `{value}`
    InvalidValue { key: String, value: String },
}

/// [`LockErrorKind`] describes the errors that can happen while taking or releasing a lock
#[derive(Error, Debug, Display)]
pub enum LockErrorKind {
    /// creating lock directory `{path:?}` failed: {source}
    CreatingLockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// reading age of lock `{path:?}` failed: {source}
    ReadingLockAgeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// removing lock directory `{path:?}` failed: {source}
    RemovingLockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// [`RunnerErrorKind`] describes the errors that can happen while running duplicity
#[derive(Error, Debug, Display)]
pub enum RunnerErrorKind {
    /// command line is empty
    EmptyCommand,
    /// starting `{program}` failed: {source}
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// waiting for `{program}` failed: {source}
    WaitFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// [`StorageErrorKind`] describes the errors returned by the object store
#[derive(Error, Debug, Display)]
pub enum StorageErrorKind {
    /// bucket `{0}` does not exist
    NoSuchBucket(String),
    /// bucket `{0}` already exists
    BucketExists(String),
    /// key `{key}` does not exist in bucket `{bucket}`
    NoSuchKey { bucket: String, key: String },
    /// creating bucket `{bucket}` failed with status {status}: {response}
    CreateBucketFailed {
        bucket: String,
        status: u16,
        response: String,
    },
    /// deleting bucket `{bucket}` failed with status {status}
    DeleteBucketFailed { bucket: String, status: u16 },
    /// injected failure for key `{0}`
    InjectedFailure(String),
    /// the in-memory store lock is poisoned
    Poisoned,
    /// {0}
    #[cfg(feature = "s3")]
    S3(#[from] s3::error::S3Error),
    /// reading S3 credentials failed: {0}
    #[cfg(feature = "s3")]
    Credentials(#[from] s3::creds::error::CredentialsError),
}

/// [`MirrorErrorKind`] describes the errors that can happen while mirroring a bucket
#[derive(Error, Debug, Display)]
pub enum MirrorErrorKind {
    /// copying key `{key}` from `{source_bucket}` to `{destination}` failed: {cause}
    CopyFailed {
        key: String,
        source_bucket: String,
        destination: String,
        #[source]
        cause: Box<BackupsError>,
    },
    /// a mirror worker could not connect to the object store: {0}
    ConnectFailed(#[source] Box<BackupsError>),
    /// a mirror worker panicked
    WorkerPanicked,
}

/// [`SyntheticErrorKind`] describes the errors of the synthetic backup workflow
#[derive(Error, Debug, Display)]
pub enum SyntheticErrorKind {
    /// target_url `{0}` is not of the form s3+http://<bucket>
    InvalidTargetUrl(String),
    /// New files have been added to {bucket} since synthetic compression started: {added:?}
    ConsistencyViolation { bucket: String, added: Vec<String> },
    /// `{command}` failed with {status}
    ToolFailed { command: String, status: String },
    /// `{0}` was not executed
    ToolNotExecuted(String),
    /// creating scratch directory failed: {0}
    ScratchDirFailed(#[source] std::io::Error),
    /// removing scratch directory `{path:?}` failed: {source}
    RemovingScratchDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

trait BackupsErrorMarker: std::error::Error {}

impl BackupsErrorMarker for ConfigErrorKind {}
impl BackupsErrorMarker for LockErrorKind {}
impl BackupsErrorMarker for RunnerErrorKind {}
impl BackupsErrorMarker for StorageErrorKind {}
impl BackupsErrorMarker for MirrorErrorKind {}
impl BackupsErrorMarker for SyntheticErrorKind {}

impl<E> From<E> for BackupsError
where
    E: BackupsErrorMarker,
    BackupsErrorKind: From<E>,
{
    fn from(value: E) -> Self {
        Self(BackupsErrorKind::from(value))
    }
}
