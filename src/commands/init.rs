//! `init` subcommand

use abscissa_core::{Application, Command, Runnable, Shutdown};
use anyhow::Result;
use backups_core::duplicity::write_sample_config;

use crate::{status_err, BACKUPS_APP};

/// `init` subcommand
#[derive(clap::Parser, Command, Debug)]
pub(crate) struct InitCmd {}

impl Runnable for InitCmd {
    fn run(&self) {
        if let Err(err) = self.inner_run() {
            status_err!("{}", err);
            BACKUPS_APP.shutdown(Shutdown::Crash);
        };
    }
}

impl InitCmd {
    fn inner_run(&self) -> Result<()> {
        let path = BACKUPS_APP.config().global.config_file()?;
        let written = write_sample_config(&path)?;
        println!("Wrote config to {}", written.display());
        Ok(())
    }
}
