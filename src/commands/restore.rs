//! `restore` subcommand

use std::path::Path;

use abscissa_core::{Command, Runnable};
use anyhow::Result;
use backups_core::{duplicity::restore_command, RunOutcome};

use crate::commands::{finish, TargetOptions};

/// `restore` subcommand
#[derive(clap::Parser, Command, Debug)]
pub(crate) struct RestoreCmd {
    #[clap(flatten)]
    target: TargetOptions,

    /// Path or file to restore, passed to --file-to-restore
    #[clap(value_name = "DEST")]
    dest: String,

    /// put files in this base
    #[clap(long, value_name = "PATH")]
    restore_to_path: Option<String>,
}

impl Runnable for RestoreCmd {
    fn run(&self) {
        finish(self.inner_run());
    }
}

impl RestoreCmd {
    fn inner_run(&self) -> Result<RunOutcome> {
        let section = self.target.section()?;
        let cmd = restore_command(
            &section,
            &self.dest,
            self.restore_to_path.as_deref(),
            Path::exists,
        )?;
        self.target.run_tool(&section, &cmd, false)
    }
}
