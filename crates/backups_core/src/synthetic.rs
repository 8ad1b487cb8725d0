//! Synthetic full backups.
//!
//! The backup chain stored in an S3 bucket is collapsed into a single full backup
//! without touching the live bucket until the very end:
//!
//! 1. the bucket is mirrored into a temporary source bucket,
//! 2. duplicity restores from the temporary source into a local staging directory,
//! 3. duplicity backs the staging directory up as a new full backup into a
//!    temporary destination bucket,
//! 4. if no new keys appeared in the live bucket meanwhile, the temporary
//!    destination is mirrored back onto the live bucket.
//!
//! Temporary buckets and local directories are removed in any case.

use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
};

use log::{error, info, warn};
use rand::{
    distributions::{Alphanumeric, DistString},
    thread_rng,
};
use tempfile::TempDir;

use crate::{
    config::ConfigSection,
    duplicity::{base_command, render_options, CommandLine},
    error::{BackupsResult, SyntheticErrorKind},
    mirror::{BucketMirror, MirrorSummary, DEFAULT_WORKERS},
    runner::{RunOutcome, ToolRunner},
    storage::{ObjectStore, StoreConnector},
};

mod constants {
    pub(super) const URL_PREFIX: &str = "s3+http://";
    pub(super) const TOKEN_LENGTH: usize = 8;
}

/// Extract the bucket name from a `s3+http://<bucket>` target url.
///
/// # Errors
///
/// * [`SyntheticErrorKind::InvalidTargetUrl`] - If the url has another form.
pub fn source_bucket_name(target_url: &str) -> BackupsResult<&str> {
    target_url
        .strip_prefix(constants::URL_PREFIX)
        .filter(|bucket| !bucket.is_empty())
        .ok_or_else(|| SyntheticErrorKind::InvalidTargetUrl(target_url.to_string()).into())
}

fn bucket_url(bucket: &str) -> String {
    format!("{}{bucket}", constants::URL_PREFIX)
}

/// Names of the temporary bucket pair of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempBuckets {
    pub token: String,
    pub source: String,
    pub dest: String,
}

impl TempBuckets {
    /// Temporary buckets for `bucket` with a fresh random token.
    #[must_use]
    pub fn for_bucket(bucket: &str) -> Self {
        let token = Alphanumeric
            .sample_string(&mut thread_rng(), constants::TOKEN_LENGTH)
            .to_lowercase();
        Self::with_token(token, bucket)
    }

    #[must_use]
    pub fn with_token(token: impl Into<String>, bucket: &str) -> Self {
        let token = token.into();
        Self {
            source: format!("tmp_source_{token}_{bucket}"),
            dest: format!("tmp_dest_{token}_{bucket}"),
            token,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyntheticOptions {
    /// number of copy workers of the bucket mirror
    pub workers: usize,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Everything a run is going to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticPlan {
    pub source_bucket: String,
    pub buckets: TempBuckets,
    pub restore: CommandLine,
    pub compact: CommandLine,
}

impl fmt::Display for SyntheticPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "source bucket:       {}", self.source_bucket)?;
        writeln!(f, "temporary source:    {}", self.buckets.source)?;
        writeln!(f, "temporary dest:      {}", self.buckets.dest)?;
        writeln!(f, "restore:             {}", self.restore)?;
        write!(f, "full:                {}", self.compact)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticReport {
    pub source_bucket: String,
    /// keys in the live bucket before the run
    pub original_keys: usize,
    pub mirrored_in: MirrorSummary,
    pub mirrored_out: MirrorSummary,
}

/// Local directories of one run.
#[derive(Debug)]
struct Scratch {
    staging: TempDir,
    cache: TempDir,
}

impl Scratch {
    fn new() -> BackupsResult<Self> {
        let dir = |prefix: &str| {
            tempfile::Builder::new()
                .prefix(prefix)
                .tempdir()
                .map_err(SyntheticErrorKind::ScratchDirFailed)
        };
        Ok(Self {
            staging: dir("backups-staging-")?,
            cache: dir("backups-cache-")?,
        })
    }

    fn close(self) -> BackupsResult<()> {
        for dir in [self.staging, self.cache] {
            let path = dir.path().to_path_buf();
            dir.close()
                .map_err(|source| SyntheticErrorKind::RemovingScratchDirFailed { path, source })?;
        }
        Ok(())
    }
}

/// Removes the temporary buckets and directories of a run.
///
/// [`Cleanup::finish`] must be called on every regular return path; dropping an
/// unfinished cleanup (when unwinding) still removes everything and logs failures.
#[derive(Debug)]
struct Cleanup<'a, S: ObjectStore> {
    store: &'a S,
    buckets: &'a TempBuckets,
    scratch: Option<Scratch>,
}

impl<S: ObjectStore> Cleanup<'_, S> {
    fn finish(mut self) -> BackupsResult<()> {
        self.cleanup()
    }

    /// Remove everything, returning the first failure.
    fn cleanup(&mut self) -> BackupsResult<()> {
        let mut first_err = None;
        for bucket in [&self.buckets.source, &self.buckets.dest] {
            info!("deleting temporary bucket {bucket}");
            if let Err(err) = self.store.delete_bucket_if_exists(bucket) {
                error!("deleting temporary bucket {bucket} failed: {err}");
                _ = first_err.get_or_insert(err);
            }
        }
        if let Some(scratch) = self.scratch.take() {
            if let Err(err) = scratch.close() {
                error!("{err}");
                _ = first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<S: ObjectStore> Drop for Cleanup<'_, S> {
    fn drop(&mut self) {
        if self.scratch.is_some() {
            warn!("cleaning up after an aborted synthetic run");
            _ = self.cleanup();
        }
    }
}

/// A synthetic full backup of the bucket named by the section's `target_url`.
#[derive(Debug)]
pub struct Synthetic<'a, C, R> {
    section: &'a ConfigSection,
    connector: &'a C,
    tool: &'a R,
    options: SyntheticOptions,
}

impl<'a, C: StoreConnector, R: ToolRunner> Synthetic<'a, C, R> {
    pub fn new(
        section: &'a ConfigSection,
        connector: &'a C,
        tool: &'a R,
        options: SyntheticOptions,
    ) -> Self {
        Self {
            section,
            connector,
            tool,
            options,
        }
    }

    /// The section used for both duplicity runs: `archive-dir` points to the run's own cache.
    fn tool_section(&self, cache: &Path) -> ConfigSection {
        self.section
            .with_option("archive-dir", &cache.to_string_lossy())
    }

    /// Build the plan of a run using the given buckets and directories.
    ///
    /// # Errors
    ///
    /// * [`SyntheticErrorKind::InvalidTargetUrl`] - If `target_url` is not `s3+http://<bucket>`.
    /// * [`crate::ConfigErrorKind::MissingOption`] - If `cmd` or `target_url` is not configured.
    pub fn plan(
        &self,
        buckets: TempBuckets,
        staging: &Path,
        cache: &Path,
    ) -> BackupsResult<SyntheticPlan> {
        let source_bucket = source_bucket_name(self.section.require("target_url")?)?.to_string();
        let section = self.tool_section(cache);
        let staging = staging.to_string_lossy().into_owned();

        let mut restore = base_command(&section)?;
        _ = restore
            .args(render_options(&section))
            .arg("restore")
            .arg("--numeric-owner")
            .arg("--force")
            .arg(bucket_url(&buckets.source))
            .arg(&staging);

        let mut compact = base_command(&section)?;
        _ = compact
            .args(render_options(&section))
            .arg("full")
            .arg(&staging)
            .arg(bucket_url(&buckets.dest));

        Ok(SyntheticPlan {
            source_bucket,
            buckets,
            restore,
            compact,
        })
    }

    /// The plan of a run with placeholder directories; nothing is created.
    ///
    /// # Errors
    ///
    /// See [`Synthetic::plan`].
    pub fn dry_run(&self) -> BackupsResult<SyntheticPlan> {
        let source_bucket = source_bucket_name(self.section.require("target_url")?)?;
        self.plan(
            TempBuckets::for_bucket(source_bucket),
            &PathBuf::from("<staging>"),
            &PathBuf::from("<cache>"),
        )
    }

    /// Run the synthetic backup.
    ///
    /// # Errors
    ///
    /// * [`SyntheticErrorKind::ConsistencyViolation`] - If keys were added to the live bucket during the run.
    /// * [`SyntheticErrorKind::ToolFailed`] - If duplicity did not exit successfully.
    /// * Any storage, mirror or configuration error.
    ///
    /// If the run succeeded but cleaning up failed, the cleanup error is returned.
    pub fn run(&self) -> BackupsResult<SyntheticReport> {
        let source_bucket = source_bucket_name(self.section.require("target_url")?)?;
        let buckets = TempBuckets::for_bucket(source_bucket);
        let scratch = Scratch::new()?;
        let plan = self.plan(buckets, scratch.staging.path(), scratch.cache.path())?;

        let store = self.connector.connect()?;
        let cleanup = Cleanup {
            store: &store,
            buckets: &plan.buckets,
            scratch: Some(scratch),
        };

        let result = self.execute(&store, &plan);
        match (result, cleanup.finish()) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(err)) | (Err(err), _) => Err(err),
        }
    }

    fn execute(&self, store: &C::Store, plan: &SyntheticPlan) -> BackupsResult<SyntheticReport> {
        let source = plan.source_bucket.as_str();
        let buckets = &plan.buckets;
        let mirror = BucketMirror::new(self.connector, self.options.workers);

        for bucket in [&buckets.source, &buckets.dest] {
            if store.delete_bucket_if_exists(bucket)? {
                warn!("removed leftover temporary bucket {bucket}");
            }
            store.create_bucket(bucket)?;
        }

        let before = store.list_keys(source)?;
        let mirrored_in = mirror.mirror(source, &buckets.source)?;

        info!("Restoring from {} to the staging directory", buckets.source);
        self.run_tool(&plan.restore)?;
        info!("Backing up full from the staging directory to {}", buckets.dest);
        self.run_tool(&plan.compact)?;

        let after = store.list_keys(source)?;
        let added = added_keys(&before, &after);
        if !added.is_empty() {
            return Err(SyntheticErrorKind::ConsistencyViolation {
                bucket: source.to_string(),
                added,
            }
            .into());
        }

        let mirrored_out = mirror.mirror(&buckets.dest, source)?;
        Ok(SyntheticReport {
            source_bucket: source.to_string(),
            original_keys: before.len(),
            mirrored_in,
            mirrored_out,
        })
    }

    fn run_tool(&self, command: &CommandLine) -> BackupsResult<()> {
        match self
            .tool
            .run(self.section.name(), command, false, false, self.section)?
        {
            outcome if outcome.success() => Ok(()),
            RunOutcome::Exited { code } => Err(SyntheticErrorKind::ToolFailed {
                command: command.to_string(),
                status: code.map_or_else(|| "a signal".to_string(), |code| format!("exit code {code}")),
            }
            .into()),
            RunOutcome::DryRun | RunOutcome::Skipped { .. } => {
                Err(SyntheticErrorKind::ToolNotExecuted(command.to_string()).into())
            }
        }
    }
}

fn added_keys(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Vec<String> {
    after.difference(before).cloned().collect()
}
