//! Assembling duplicity command lines from a config section.

use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Component, Path, PathBuf},
};

use itertools::Itertools;
use log::debug;

use crate::{
    config::{is_env_key, ConfigSection},
    error::{BackupsResult, ConfigErrorKind},
};

/// Directives that are passed on to duplicity as options.
pub const DUPLICITY_OPTIONS: [&str; 12] = [
    "v",
    "archive-dir",
    "name",
    "s3-use-new-style",
    "allow-source-mismatch",
    "tempdir",
    "asynchronous-upload",
    "timeout",
    "volsize",
    "ssh-options",
    "rsync-options",
    "ssh-askpass",
];

/// Pass-through commands which change the backup chain and therefore run under the lock.
pub const LOCKED_COMMANDS: [&str; 3] = ["remove-older-than", "cleanup", "remove-all-but-n-full"];

/// A program and its arguments, passed verbatim to the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::iter::once(&self.program).chain(&self.args).join(" "))
    }
}

/// Kind of backup to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    Full,
    Incremental,
}

impl BackupType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

/// Start a command line with the configured duplicity executable (`cmd`).
///
/// # Errors
///
/// * [`ConfigErrorKind::MissingOption`] - If `cmd` is not configured.
pub fn base_command(section: &ConfigSection) -> BackupsResult<CommandLine> {
    Ok(CommandLine::new(section.require("cmd")?))
}

/// Render the duplicity option directives of `section`, in section order.
///
/// `v` becomes `-v<value>`, a value of `true` becomes a bare `--<key>` and
/// everything else `--<key>=<value>`.
#[must_use]
pub fn render_options(section: &ConfigSection) -> Vec<String> {
    section
        .iter()
        .filter(|(key, _)| !is_env_key(key) && DUPLICITY_OPTIONS.contains(key))
        .map(|(key, value)| match (key, value) {
            ("v", value) => format!("-v{value}"),
            (key, "true") => format!("--{key}"),
            (key, value) => format!("--{key}={value}"),
        })
        .collect()
}

/// `<cmd> <command> [<arg>] [--force] <options> <target_url>`
///
/// # Errors
///
/// * [`ConfigErrorKind::MissingOption`] - If `cmd` or `target_url` is not configured.
pub fn passthrough_command(
    section: &ConfigSection,
    command: &str,
    arg: Option<&str>,
    force: bool,
) -> BackupsResult<CommandLine> {
    let mut cmd = base_command(section)?;
    _ = cmd.arg(command);
    if let Some(arg) = arg {
        _ = cmd.arg(arg);
    }
    if force {
        _ = cmd.arg("--force");
    }
    _ = cmd
        .args(render_options(section))
        .arg(section.require("target_url")?);
    Ok(cmd)
}

/// `<cmd> full|incremental [--asynchronous-upload] <options> <source pairs> / <target_url>`
///
/// # Errors
///
/// * [`ConfigErrorKind::MissingOption`] - If `cmd`, `source` or `target_url` is not configured.
/// * Any error of [`parse_source`].
pub fn backup_command(
    section: &ConfigSection,
    backup_type: BackupType,
    asynchronous_upload: bool,
) -> BackupsResult<CommandLine> {
    let mut cmd = base_command(section)?;
    _ = cmd.arg(backup_type.as_str());
    if asynchronous_upload {
        _ = cmd.arg("--asynchronous-upload");
    }
    _ = cmd.args(render_options(section));
    for (flag, pattern) in parse_source(section.require("source")?)? {
        _ = cmd.arg(flag).arg(pattern);
    }
    _ = cmd.arg("/").arg(section.require("target_url")?);
    Ok(cmd)
}

/// Split the backslash-separated `source` directive into `(flag, pattern)` pairs.
///
/// # Errors
///
/// * [`ConfigErrorKind::NewlineInSource`] - If a line is missing its trailing backslash.
/// * [`ConfigErrorKind::IncompleteSource`] - If a line has a flag but no pattern.
pub fn parse_source(source: &str) -> BackupsResult<Vec<(String, String)>> {
    source
        .split('\\')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| -> BackupsResult<(String, String)> {
            let (flag, pattern) = piece
                .split_once(char::is_whitespace)
                .ok_or_else(|| ConfigErrorKind::IncompleteSource(piece.to_string()))?;
            let pattern = pattern.trim_start();
            if pattern.contains('\n') {
                return Err(ConfigErrorKind::NewlineInSource(pattern.replace('\n', "\\n")).into());
            }
            Ok((flag.to_string(), pattern.to_string()))
        })
        .collect()
}

/// `<cmd> restore <options> [--file-to-restore <dest>] [--numeric-owner --force] <target_url> <restore_to>`
///
/// `exists` decides whether a restore target is already present on disk.
///
/// # Errors
///
/// * [`ConfigErrorKind::MissingOption`] - If `cmd` or `target_url` is not configured.
pub fn restore_command(
    section: &ConfigSection,
    dest: &str,
    restore_to_path: Option<&str>,
    exists: impl Fn(&Path) -> bool,
) -> BackupsResult<CommandLine> {
    let mut cmd = base_command(section)?;
    _ = cmd.arg("restore").args(render_options(section));

    let (dest, restore_to) = restore_target(dest, restore_to_path, exists);
    if !dest.is_empty() {
        _ = cmd.arg("--file-to-restore").arg(dest);
    }
    if restore_to_path.is_some() {
        _ = cmd.arg("--numeric-owner").arg("--force");
    }
    _ = cmd.arg(section.require("target_url")?).arg(restore_to);
    Ok(cmd)
}

/// Compute the path inside the backup and the local path to restore it to.
///
/// The path inside the backup is `dest` normalized and relative to `/`. Without an
/// explicit `restore_to_path` the file is restored to its original location, with
/// `.restored` appended if that location already exists.
pub fn restore_target(
    dest: &str,
    restore_to_path: Option<&str>,
    exists: impl Fn(&Path) -> bool,
) -> (String, String) {
    let normalized = normalize(dest);
    let dest = normalized.trim_start_matches('/').to_string();

    if let Some(restore_to) = restore_to_path {
        return (dest, restore_to.to_string());
    }

    let (mut path, mut fname) = match dest.rsplit_once('/') {
        Some((path, fname)) => (path.to_string(), fname.to_string()),
        None => (String::new(), dest.clone()),
    };
    if exists(&Path::new("/").join(&dest)) {
        if fname.is_empty() {
            path.push_str(".restored");
        } else {
            fname.push_str(".restored");
        }
    }

    let mut restore_to = String::from("/");
    for part in [path, fname] {
        if !restore_to.ends_with('/') {
            restore_to.push('/');
        }
        restore_to.push_str(&part);
    }
    (dest, restore_to)
}

/// Lexically normalize a path: collapse separators and `.`, resolve `..`.
fn normalize(path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let absolute = path.starts_with('/');
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    _ = parts.pop();
                }
                _ if absolute => {}
                _ => parts.push("..".to_string()),
            },
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Sample configuration written by `init`.
pub const SAMPLE_CONFIG: &str = r"
[DEFAULT]
# Arguments in the DEFAULT sections
# are passed to all sub-configs.
# Any argument here including environment
# variables can be per-sub-config.
# Values can have spaces, don't add quotes as these
# become part of the value.

# environment variables - all UPPERCASE
# names are sent to the env.
AWS_ACCESS_KEY_ID=<your access key>
AWS_SECRET_ACCESS_KEY=<your secret key>
PASSPHRASE=this is my passphrase

# env substitutions can also be used
# with UPPERCASE variables.  Use two
# percent signs, %%(varname)s
PATH=/usr/local/bin:%%(PATH)s

# duplicity options
archive-dir=/Users/myusername/.duplicity/cache
v=8

# path of duplicity executable
cmd=/usr/local/bin/duplicity

# number of parallel copies used by the
# synthetic command
copy-workers=10

# each backup config is defined here,
# in its own [section].
[my_backup]

# duplicity 'name' field
name=my_backup

# sources.  we always make the 'destination'
# the root '/'.   Fill in each desired directory
# here, keeping the one include/exclude per line with
# backslash/newline convention in place
source=\
    --exclude /**/*.pyc \
    --exclude /**.DS_Store \
    --exclude /Users/myusername/.duplicity/cache \
    --include /Users/myusername/Documents \
    --include /Users/myusername/Desktop \
    --exclude **

# target url.
target_url=file:///Volumes/WD Passport/duplicity/

# an S3 bucket can be compacted with the
# synthetic command.
[my_s3_backup]
name=my_s3_backup
source=\
    --include /Users/myusername/Documents \
    --exclude **
target_url=s3+http://my-backup-bucket
";

/// Write [`SAMPLE_CONFIG`] to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// * [`ConfigErrorKind::ConfigFileExists`] - If there is already a file at `path`.
/// * [`ConfigErrorKind::WritingConfigFailed`] - If the file cannot be written.
pub fn write_sample_config(path: &Path) -> BackupsResult<PathBuf> {
    let write_err = |source| ConfigErrorKind::WritingConfigFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => ConfigErrorKind::ConfigFileExists(path.to_path_buf()),
            _ => write_err(err),
        })?;
    file.write_all(SAMPLE_CONFIG.as_bytes()).map_err(write_err)?;
    debug!("sample config written to {}", path.display());
    Ok(path.to_path_buf())
}
