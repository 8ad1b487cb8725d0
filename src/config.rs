//! backups Config
//!
//! The application's own configuration consists of the global command line
//! options only; the backup configurations live in the INI file they point to.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use backups_core::{Config, ConfigSection};
use clap::{Parser, ValueHint};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

mod constants {
    pub(super) const DUPLICITY_DIR: &str = ".duplicity";
    pub(super) const CONFIG_FILE: &str = "backup.ini";
}

/// backups Configuration
#[derive(Clone, Default, Debug, Parser, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackupsConfig {
    /// Global options
    #[clap(flatten, next_help_heading = "Global options")]
    pub global: GlobalOptions,
}

impl BackupsConfig {
    /// Read the INI file.
    pub fn load(&self) -> Result<Config> {
        Ok(Config::from_path(&self.global.config_file()?)?)
    }

    /// Read the INI file and resolve the section `name`.
    pub fn section(&self, name: &str) -> Result<ConfigSection> {
        Ok(self.load()?.section(name)?)
    }
}

/// Global options
///
/// These options are available for all commands.
#[derive(Default, Debug, Parser, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct GlobalOptions {
    /// INI file holding the backup configurations [default: ~/.duplicity/backup.ini]
    #[clap(long, global = true, env = "BACKUPS_CONFIG_FILE", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub config_file: Option<PathBuf>,

    /// Directory for the lock directories of running backups [default: ~/.duplicity]
    #[clap(long, global = true, env = "BACKUPS_LOCK_DIR", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub lock_dir: Option<PathBuf>,

    /// Use this log level [default: info]
    #[clap(long, global = true, env = "BACKUPS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Write log messages to the given file instead of printing them.
    ///
    /// # Note
    ///
    /// Warnings and errors are still additionally printed unless they are ignored by `--log-level`
    #[clap(long, global = true, env = "BACKUPS_LOG_FILE", value_name = "LOGFILE", value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,
}

impl GlobalOptions {
    /// Path of the INI file.
    pub fn config_file(&self) -> Result<PathBuf> {
        match &self.config_file {
            Some(path) => Ok(path.clone()),
            None => Ok(duplicity_dir()?.join(constants::CONFIG_FILE)),
        }
    }

    /// Directory holding the `<configuration>.lock` directories.
    pub fn lock_dir(&self) -> Result<PathBuf> {
        match &self.lock_dir {
            Some(path) => Ok(path.clone()),
            None => duplicity_dir(),
        }
    }
}

/// `~/.duplicity`
fn duplicity_dir() -> Result<PathBuf> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(constants::DUPLICITY_DIR))
        .ok_or_else(|| anyhow!("cannot determine the home directory"))
}
