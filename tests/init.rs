//! Init test: runs the application as a subprocess and asserts the sample
//! config it writes

use std::fs;

use assert_cmd::Command;
use predicates::prelude::predicate;

use backups_testing::{ConfigFixture, TestResult};

#[test]
fn init_writes_sample_config_once() -> TestResult<()> {
    let fixture = ConfigFixture::empty()?;
    let config_file = fixture.path().join("duplicity").join("backup.ini");

    let mut runner = Command::new(env!("CARGO_BIN_EXE_backups"));
    runner
        .arg("--config-file")
        .arg(&config_file)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote config to"));
    assert!(fs::read_to_string(&config_file)?.contains("[my_backup]"));

    let mut runner = Command::new(env!("CARGO_BIN_EXE_backups"));
    runner
        .arg("--config-file")
        .arg(&config_file)
        .arg("configs")
        .assert()
        .success()
        .stdout("my_backup\nmy_s3_backup\n");

    let mut runner = Command::new(env!("CARGO_BIN_EXE_backups"));
    runner
        .arg("--config-file")
        .arg(&config_file)
        .arg("init")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
    Ok(())
}
