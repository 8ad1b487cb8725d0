use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

use tempfile::{tempdir, TempDir};

pub type TestResult<T> = std::result::Result<T, Box<dyn Error>>;

/// A temporary directory holding an INI file and a lock directory.
#[derive(Debug)]
pub struct ConfigFixture {
    dir: TempDir,
}

impl ConfigFixture {
    /// Write `contents` as `backup.ini` into a fresh temporary directory.
    pub fn new(contents: &str) -> TestResult<Self> {
        let dir = tempdir()?;
        fs::write(dir.path().join("backup.ini"), contents)?;
        fs::create_dir(dir.path().join("locks"))?;
        Ok(Self { dir })
    }

    /// A fixture without INI file, e.g. for `init`.
    pub fn empty() -> TestResult<Self> {
        Ok(Self { dir: tempdir()? })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.path().join("backup.ini")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.dir.path().join("locks")
    }

    /// Write an executable shell script named `name` and return its path.
    #[cfg(not(windows))]
    pub fn script(&self, name: &str, body: &str) -> TestResult<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }
}
