//! Running duplicity with the environment of a config section.

use std::{
    env,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    config::ConfigSection,
    duplicity::CommandLine,
    error::{BackupsResult, RunnerErrorKind},
    interpolate::render_environment,
    lock::{DirLock, LockGuard, LockOutcome, STALE_LOCK_AGE},
};

/// Variables copied from the current environment into the child's environment.
pub const FORWARDED_VARIABLES: [&str; 2] = ["SSH_AGENT_PID", "SSH_AUTH_SOCK"];

/// Limit on open files applied to the child (soft and hard).
pub const MAX_OPEN_FILES: u64 = 1024;

/// What happened to a command given to a [`ToolRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing was executed because of a dry run.
    DryRun,
    /// Nothing was executed because another run holds the lock.
    Skipped { age: Duration },
    /// The command ran; `code` is `None` if it was killed by a signal.
    Exited { code: Option<i32> },
}

impl RunOutcome {
    /// Whether the command ran and exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }

    /// Exit code to report for this outcome.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::DryRun | Self::Skipped { .. } => 0,
            Self::Exited { code: Some(code) } => *code,
            Self::Exited { code: None } => 1,
        }
    }
}

/// Executes command lines on behalf of the commands and the synthetic workflow.
pub trait ToolRunner {
    /// Run `command` with the environment of `section`.
    ///
    /// `name` identifies the lock taken when `requires_lock` is set.
    ///
    /// # Errors
    ///
    /// If the lock cannot be handled or the command cannot be started.
    fn run(
        &self,
        name: &str,
        command: &CommandLine,
        requires_lock: bool,
        dry_run: bool,
        section: &ConfigSection,
    ) -> BackupsResult<RunOutcome>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    lock_dir: PathBuf,
    stale_after: Duration,
}

impl ProcessRunner {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            stale_after: STALE_LOCK_AGE,
        }
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    #[must_use]
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    fn lock_for(&self, name: &str) -> DirLock {
        DirLock::new(self.lock_dir.join(format!("{name}.lock"))).with_stale_after(self.stale_after)
    }

    fn execute(command: &CommandLine, section: &ConfigSection) -> BackupsResult<RunOutcome> {
        if command.program().is_empty() {
            return Err(RunnerErrorKind::EmptyCommand.into());
        }

        let mut environment = render_environment(section, |name| env::var(name).ok())?;
        for name in FORWARDED_VARIABLES {
            if let Ok(value) = env::var(name) {
                _ = environment.insert(name.to_string(), value);
            }
        }
        debug!(
            "environment: {:?}",
            environment.keys().collect::<Vec<_>>()
        );

        let mut cmd = Command::new(command.program());
        _ = cmd.args(command.arguments()).env_clear().envs(&environment);
        limit_open_files(&mut cmd);

        let program = command.program().to_string();
        let mut child = cmd
            .spawn()
            .map_err(|source| RunnerErrorKind::SpawnFailed {
                program: program.clone(),
                source,
            })?;
        let status = child
            .wait()
            .map_err(|source| RunnerErrorKind::WaitFailed { program, source })?;
        debug!("{} exited with {status}", command.program());

        Ok(RunOutcome::Exited {
            code: status.code(),
        })
    }
}

#[cfg(not(windows))]
#[allow(unsafe_code)]
fn limit_open_files(cmd: &mut Command) {
    use nix::sys::resource::{setrlimit, Resource};
    use std::os::unix::process::CommandExt;

    // SAFETY: the closure runs between fork and exec and only calls setrlimit,
    // which is async-signal-safe and does not allocate.
    unsafe {
        _ = cmd.pre_exec(|| {
            setrlimit(Resource::RLIMIT_NOFILE, MAX_OPEN_FILES, MAX_OPEN_FILES)
                .map_err(std::io::Error::from)
        });
    }
}

#[cfg(windows)]
fn limit_open_files(_cmd: &mut Command) {}

impl ToolRunner for ProcessRunner {
    fn run(
        &self,
        name: &str,
        command: &CommandLine,
        requires_lock: bool,
        dry_run: bool,
        section: &ConfigSection,
    ) -> BackupsResult<RunOutcome> {
        info!("{command}");
        println!("{command}");

        if dry_run {
            return Ok(RunOutcome::DryRun);
        }
        if !requires_lock {
            return Self::execute(command, section);
        }

        match self.lock_for(name).acquire()? {
            LockOutcome::Acquired(guard) => release_after(Self::execute(command, section), guard),
            LockOutcome::Busy { age } => {
                warn!(
                    "Lock for {name} is held (age {}), skipping",
                    humantime::format_duration(Duration::from_secs(age.as_secs()))
                );
                Ok(RunOutcome::Skipped { age })
            }
        }
    }
}

/// Release `guard` once the locked run is over; an error of the run takes precedence.
fn release_after(
    outcome: BackupsResult<RunOutcome>,
    guard: LockGuard,
) -> BackupsResult<RunOutcome> {
    match (outcome, guard.release()) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release_err)) => {
            warn!("{release_err}");
            Err(err)
        }
    }
}
