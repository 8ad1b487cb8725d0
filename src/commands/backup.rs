//! `full` and `incremental` subcommands

use anyhow::Result;
use backups_core::{duplicity::backup_command, BackupType, RunOutcome};

use crate::commands::{finish, TargetOptions};

/// `full` and `incremental` subcommands
#[derive(clap::Parser, Debug)]
pub(crate) struct BackupCmd {
    #[clap(flatten)]
    target: TargetOptions,

    /// use async mode
    #[clap(long)]
    asynchronous_upload: bool,
}

impl BackupCmd {
    pub(crate) fn run_as(&self, backup_type: BackupType) {
        finish(self.inner_run(backup_type));
    }

    fn inner_run(&self, backup_type: BackupType) -> Result<RunOutcome> {
        let section = self.target.section()?;
        let cmd = backup_command(&section, backup_type, self.asynchronous_upload)?;
        self.target.run_tool(&section, &cmd, true)
    }
}
