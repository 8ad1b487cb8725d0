//! `configs` subcommand

use abscissa_core::{Application, Command, Runnable, Shutdown};
use anyhow::Result;

use crate::{status_err, BACKUPS_APP};

/// `configs` subcommand
#[derive(clap::Parser, Command, Debug)]
pub(crate) struct ConfigsCmd {}

impl Runnable for ConfigsCmd {
    fn run(&self) {
        if let Err(err) = self.inner_run() {
            status_err!("{}", err);
            BACKUPS_APP.shutdown(Shutdown::Crash);
        };
    }
}

impl ConfigsCmd {
    fn inner_run(&self) -> Result<()> {
        let config = BACKUPS_APP.config().load()?;
        for name in config.sections() {
            println!("{name}");
        }
        Ok(())
    }
}
