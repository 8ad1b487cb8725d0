//! duplicity pass-through subcommands

use abscissa_core::{Command, Runnable};
use anyhow::Result;
use backups_core::{duplicity::passthrough_command, RunOutcome};

use crate::commands::{finish, TargetOptions};

/// `verify`, `collection-status` and `list-current-files` subcommands
#[derive(clap::Parser, Debug)]
pub(crate) struct InspectCmd {
    #[clap(flatten)]
    target: TargetOptions,
}

impl InspectCmd {
    pub(crate) fn run_as(&self, command: &str) {
        finish(run_passthrough(&self.target, command, None, false));
    }
}

/// `cleanup` subcommand
#[derive(clap::Parser, Command, Debug)]
pub(crate) struct CleanupCmd {
    #[clap(flatten)]
    target: TargetOptions,

    /// duplicity --force option
    #[clap(long)]
    force: bool,
}

impl Runnable for CleanupCmd {
    fn run(&self) {
        finish(run_passthrough(&self.target, "cleanup", None, self.force));
    }
}

/// `remove-older-than` and `remove-all-but-n-full` subcommands
#[derive(clap::Parser, Debug)]
pub(crate) struct RemoveCmd {
    /// command argument
    #[clap(value_name = "ARG")]
    arg: String,

    #[clap(flatten)]
    target: TargetOptions,

    /// duplicity --force option
    #[clap(long)]
    force: bool,
}

impl RemoveCmd {
    pub(crate) fn run_as(&self, command: &str) {
        finish(run_passthrough(
            &self.target,
            command,
            Some(&self.arg),
            self.force,
        ));
    }
}

/// Commands modifying the backup chain hold the lock of the configuration.
fn requires_lock(command: &str) -> bool {
    backups_core::duplicity::LOCKED_COMMANDS.contains(&command)
}

fn run_passthrough(
    target: &TargetOptions,
    command: &str,
    arg: Option<&str>,
    force: bool,
) -> Result<RunOutcome> {
    let section = target.section()?;
    let cmd = passthrough_command(&section, command, arg, force)?;
    target.run_tool(&section, &cmd, requires_lock(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case("cleanup", true)]
    #[case("remove-older-than", true)]
    #[case("remove-all-but-n-full", true)]
    #[case("verify", false)]
    #[case("collection-status", false)]
    #[case("list-current-files", false)]
    fn chain_modifying_commands_are_locked(#[case] command: &str, #[case] locked: bool) {
        assert_eq!(requires_lock(command), locked);
    }
}
