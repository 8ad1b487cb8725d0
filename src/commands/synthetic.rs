//! `synthetic` subcommand

use abscissa_core::{Application, Command, Runnable, Shutdown};
use anyhow::{bail, Result};
use backups_core::{ConfigSection, SyntheticOptions, DEFAULT_WORKERS};

use crate::{commands::TargetOptions, status_err, BACKUPS_APP};

/// `synthetic` subcommand
#[derive(clap::Parser, Command, Debug)]
pub(crate) struct SyntheticCmd {
    #[clap(flatten)]
    target: TargetOptions,

    /// Number of parallel copy workers [default: copy-workers of the configuration or 10]
    #[clap(long, short = 'w', value_name = "N")]
    workers: Option<usize>,
}

impl Runnable for SyntheticCmd {
    fn run(&self) {
        if let Err(err) = self.inner_run() {
            status_err!("{}", err);
            BACKUPS_APP.shutdown(Shutdown::Crash);
        };
    }
}

impl SyntheticCmd {
    fn options(&self, section: &ConfigSection) -> Result<SyntheticOptions> {
        let workers = match self.workers {
            Some(workers) => workers,
            None => section
                .parse::<usize>("copy-workers")?
                .unwrap_or(DEFAULT_WORKERS),
        };
        if workers == 0 {
            bail!("the number of copy workers must be at least 1");
        }
        Ok(SyntheticOptions { workers })
    }

    #[cfg(feature = "s3")]
    fn inner_run(&self) -> Result<()> {
        use backups_core::{ProcessRunner, S3Connector, Synthetic};
        use log::info;

        let section = self.target.section()?;
        let options = self.options(&section)?;
        let connector = S3Connector::from_section(&section, |name| std::env::var(name).ok())?;
        let tool = ProcessRunner::new(BACKUPS_APP.config().global.lock_dir()?);
        let synthetic = Synthetic::new(&section, &connector, &tool, options);

        if self.target.dry {
            println!("{}", synthetic.dry_run()?);
            return Ok(());
        }

        let report = synthetic.run()?;
        info!(
            "synthetic full backup of {} done: {} keys before, copied in {}, copied out {}",
            report.source_bucket, report.original_keys, report.mirrored_in, report.mirrored_out
        );
        println!(
            "Synthetic full backup of bucket {} complete ({} copied back)",
            report.source_bucket, report.mirrored_out
        );
        Ok(())
    }

    #[cfg(not(feature = "s3"))]
    fn inner_run(&self) -> Result<()> {
        let section = self.target.section()?;
        _ = self.options(&section)?;
        bail!("synthetic backups need S3 support; build with the `s3` feature")
    }
}
