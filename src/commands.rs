//! backups Subcommands

pub(crate) mod backup;
pub(crate) mod completions;
pub(crate) mod configs;
pub(crate) mod duplicity;
pub(crate) mod init;
pub(crate) mod restore;
pub(crate) mod synthetic;

use std::{fs::File, path::PathBuf, str::FromStr};

use crate::{
    commands::{
        backup::BackupCmd,
        completions::CompletionsCmd,
        configs::ConfigsCmd,
        duplicity::{CleanupCmd, InspectCmd, RemoveCmd},
        init::InitCmd,
        restore::RestoreCmd,
        synthetic::SyntheticCmd,
    },
    config::BackupsConfig,
    status_err, Application, BACKUPS_APP,
};

use abscissa_core::{
    terminal::ColorChoice, Command, Configurable, FrameworkError, FrameworkErrorKind, Runnable,
    Shutdown,
};
use anyhow::Result;
use backups_core::{BackupType, CommandLine, ConfigSection, ProcessRunner, RunOutcome, ToolRunner};
use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};
use simplelog::{CombinedLogger, LevelFilter, TermLogger, TerminalMode, WriteLogger};

/// backups Subcommands
/// Subcommands need to be listed in an enum.
#[derive(clap::Parser, Command, Debug)]
enum BackupsCmd {
    /// Run the duplicity command 'verify'
    Verify(Box<InspectCmd>),

    /// Run the duplicity command 'collection-status'
    CollectionStatus(Box<InspectCmd>),

    /// Run the duplicity command 'list-current-files'
    ListCurrentFiles(Box<InspectCmd>),

    /// Run the duplicity command 'cleanup'
    Cleanup(Box<CleanupCmd>),

    /// Run the duplicity command 'remove-older-than'
    RemoveOlderThan(Box<RemoveCmd>),

    /// Run the duplicity command 'remove-all-but-n-full'
    RemoveAllButNFull(Box<RemoveCmd>),

    /// Run a restore
    Restore(Box<RestoreCmd>),

    /// Run a full backup
    Full(Box<BackupCmd>),

    /// Run an incremental backup
    Incremental(Box<BackupCmd>),

    /// Collapse the backup chain in an S3 bucket into a single full backup
    Synthetic(Box<SyntheticCmd>),

    /// List configs
    Configs(Box<ConfigsCmd>),

    /// Write sample config file
    Init(Box<InitCmd>),

    /// Generate shell completions
    Completions(Box<CompletionsCmd>),
}

impl Runnable for BackupsCmd {
    fn run(&self) {
        match self {
            Self::Verify(cmd) => cmd.run_as("verify"),
            Self::CollectionStatus(cmd) => cmd.run_as("collection-status"),
            Self::ListCurrentFiles(cmd) => cmd.run_as("list-current-files"),
            Self::Cleanup(cmd) => cmd.run(),
            Self::RemoveOlderThan(cmd) => cmd.run_as("remove-older-than"),
            Self::RemoveAllButNFull(cmd) => cmd.run_as("remove-all-but-n-full"),
            Self::Restore(cmd) => cmd.run(),
            Self::Full(cmd) => cmd.run_as(BackupType::Full),
            Self::Incremental(cmd) => cmd.run_as(BackupType::Incremental),
            Self::Synthetic(cmd) => cmd.run(),
            Self::Configs(cmd) => cmd.run(),
            Self::Init(cmd) => cmd.run(),
            Self::Completions(cmd) => cmd.run(),
        }
    }
}

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Red.on_default() | Effects::BOLD)
        .usage(AnsiColor::Red.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
}

/// Entry point for the application. It needs to be a struct to allow using subcommands!
#[derive(clap::Parser, Command, Debug)]
#[command(author, about, name="backups", styles=styles(), version = option_env!("PROJECT_VERSION").unwrap_or(env!("CARGO_PKG_VERSION")))]
pub struct EntryPoint {
    #[command(flatten)]
    pub config: BackupsConfig,

    #[command(subcommand)]
    commands: BackupsCmd,
}

impl Runnable for EntryPoint {
    fn run(&self) {
        self.commands.run();
        BACKUPS_APP.shutdown(Shutdown::Graceful)
    }
}

/// This trait allows you to define how application configuration is loaded.
impl Configurable<BackupsConfig> for EntryPoint {
    /// Location of the configuration file
    fn config_path(&self) -> Option<PathBuf> {
        // The INI file is not an abscissa config; it is read by the commands that need it.
        None
    }

    /// Apply changes to the config after it's been loaded, e.g. overriding
    /// values in a config file using command-line options.
    fn process_config(&self, _config: BackupsConfig) -> Result<BackupsConfig, FrameworkError> {
        let config = self.config.clone();

        // start logger
        let level_filter = match &config.global.log_level {
            Some(level) => LevelFilter::from_str(level)
                .map_err(|e| FrameworkErrorKind::ConfigError.context(e))?,
            None => LevelFilter::Info,
        };
        let term_config = simplelog::ConfigBuilder::new()
            .set_time_level(LevelFilter::Off)
            .build();
        match &config.global.log_file {
            None => TermLogger::init(
                level_filter,
                term_config,
                TerminalMode::Stderr,
                ColorChoice::Auto,
            )
            .map_err(|e| FrameworkErrorKind::ConfigError.context(e))?,

            Some(file) => {
                let file_config = simplelog::ConfigBuilder::new()
                    .set_time_format_rfc3339()
                    .build();
                let file = File::options()
                    .create(true)
                    .append(true)
                    .open(file)
                    .map_err(|e| {
                        FrameworkErrorKind::PathError {
                            name: Some(file.clone()),
                        }
                        .context(e)
                    })?;
                let term_logger = TermLogger::new(
                    level_filter.min(LevelFilter::Warn),
                    term_config,
                    TerminalMode::Stderr,
                    ColorChoice::Auto,
                );
                CombinedLogger::init(vec![
                    term_logger,
                    WriteLogger::new(level_filter, file_config, file),
                ])
                .map_err(|e| FrameworkErrorKind::ConfigError.context(e))?;
            }
        }

        Ok(config)
    }
}

/// Options shared by all commands working on one configuration.
#[derive(clap::Parser, Clone, Debug)]
pub(crate) struct TargetOptions {
    /// Name of configuration to load
    #[clap(value_name = "CONFIGURATION")]
    pub(crate) configuration: String,

    /// Only show the final duplicity command, don't actually run it
    #[clap(long, short = 'd')]
    pub(crate) dry: bool,
}

impl TargetOptions {
    /// The resolved INI section of this configuration.
    pub(crate) fn section(&self) -> Result<ConfigSection> {
        BACKUPS_APP.config().section(&self.configuration)
    }

    /// Run `command` with the environment of `section`, locked by the configuration name if requested.
    pub(crate) fn run_tool(
        &self,
        section: &ConfigSection,
        command: &CommandLine,
        requires_lock: bool,
    ) -> Result<RunOutcome> {
        let runner = ProcessRunner::new(BACKUPS_APP.config().global.lock_dir()?);
        Ok(runner.run(
            &self.configuration,
            command,
            requires_lock,
            self.dry,
            section,
        )?)
    }
}

/// Report the result of a command which ran duplicity and exit accordingly.
///
/// A failed duplicity run exits with duplicity's exit code.
pub(crate) fn finish(result: Result<RunOutcome>) {
    match result {
        Ok(outcome) => {
            let exit_code = outcome.exit_code();
            if exit_code != 0 {
                BACKUPS_APP.shutdown_with_exitcode(Shutdown::Crash, exit_code);
            }
        }
        Err(err) => {
            status_err!("{}", err);
            BACKUPS_APP.shutdown(Shutdown::Crash);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::EntryPoint;
    use clap::{CommandFactory, Parser};

    #[test]
    fn verify_cli() {
        EntryPoint::command().debug_assert();
    }

    #[test]
    fn remove_commands_take_argument_before_configuration() {
        let entry = EntryPoint::try_parse_from([
            "backups",
            "remove-older-than",
            "6M",
            "my_backup",
            "--force",
            "-d",
        ])
        .unwrap();
        let debug = format!("{entry:?}");
        assert!(debug.contains("arg: \"6M\""));
        assert!(debug.contains("configuration: \"my_backup\""));
    }

    #[test]
    fn configuration_is_required() {
        assert!(EntryPoint::try_parse_from(["backups", "verify"]).is_err());
    }
}
