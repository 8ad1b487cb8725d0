/*!
Library behind the `backups` front end for [`duplicity`](https://duplicity.gitlab.io/).

# Overview

The primary types in this crate:

*   [`Config`] / [`ConfigSection`] -
    the INI configuration file and one resolved `[section]` of it.
*   [`CommandLine`] -
    a duplicity invocation assembled from a section, see the functions in
    [`duplicity`].
*   [`ProcessRunner`] -
    runs a [`CommandLine`] with the section's environment, optionally under a
    [`DirLock`].
*   [`BucketMirror`] -
    copies all objects of one bucket into another using a pool of workers.
*   [`Synthetic`] -
    collapses the backup chain stored in an S3 bucket into a single full backup.

# Crate features

*   **s3** -
    Enables the [`S3Connector`] based on the `rust-s3` crate. Enabled by default.
*/

#![deny(unsafe_code)]
#![warn(
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications,
    clippy::nursery,
    bad_style,
    dead_code,
    improper_ctypes,
    missing_debug_implementations,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    trivial_numeric_casts,
    unused_results,
    unused_extern_crates,
    unused_import_braces,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    clippy::cast_lossless,
    clippy::default_trait_access,
    clippy::doc_markdown,
    clippy::manual_string_new,
    clippy::match_same_arms,
    clippy::semicolon_if_nothing_returned,
    clippy::trivially_copy_pass_by_ref
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::redundant_pub_crate,
    clippy::missing_const_for_fn
)]

pub(crate) mod config;
pub mod duplicity;
pub(crate) mod error;
pub(crate) mod interpolate;
pub(crate) mod lock;
pub(crate) mod mirror;
pub(crate) mod runner;
pub mod storage;
pub(crate) mod synthetic;

// backups_core Public API
pub use crate::{
    config::{is_env_key, Config, ConfigSection},
    duplicity::{BackupType, CommandLine},
    error::{
        BackupsError, BackupsErrorKind, BackupsResult, ConfigErrorKind, LockErrorKind,
        MirrorErrorKind, RunnerErrorKind, StorageErrorKind, SyntheticErrorKind,
    },
    interpolate::{interpolate, render_environment},
    lock::{DirLock, LockGuard, LockOutcome, STALE_LOCK_AGE},
    mirror::{BucketMirror, MirrorSummary, DEFAULT_WORKERS},
    runner::{ProcessRunner, RunOutcome, ToolRunner, FORWARDED_VARIABLES, MAX_OPEN_FILES},
    storage::{ObjectStore, StoreConnector},
    synthetic::{
        source_bucket_name, Synthetic, SyntheticOptions, SyntheticPlan, SyntheticReport,
        TempBuckets,
    },
};

#[cfg(feature = "s3")]
pub use crate::storage::s3::{S3Connector, S3Store};
