//! Command test: runs the application as a subprocess and asserts the
//! duplicity command lines it prints with `--dry`

use assert_cmd::Command;
use predicates::prelude::{predicate, PredicateBooleanExt};

use backups_testing::{ConfigFixture, TestResult};

const CONFIG: &str = r"
[DEFAULT]
PASSPHRASE=secret
v=8
cmd=duplicity

[my_backup]
name=my_backup
source=\
    --include /home/user/Documents \
    --exclude **
target_url=file:///backups/my_backup

[my_s3_backup]
name=my_s3_backup
AWS_ACCESS_KEY_ID=key
AWS_SECRET_ACCESS_KEY=secret
target_url=s3+http://my-backup-bucket
";

pub fn backups_runner(fixture: &ConfigFixture) -> Command {
    let mut runner = Command::new(env!("CARGO_BIN_EXE_backups"));
    runner
        .arg("--config-file")
        .arg(fixture.config_file())
        .arg("--lock-dir")
        .arg(fixture.lock_dir());
    runner
}

#[test]
fn configs_lists_sections() -> TestResult<()> {
    let fixture = ConfigFixture::new(CONFIG)?;
    backups_runner(&fixture)
        .arg("configs")
        .assert()
        .success()
        .stdout("my_backup\nmy_s3_backup\n");
    Ok(())
}

#[test]
fn passthrough_commands_print_duplicity_command() -> TestResult<()> {
    let fixture = ConfigFixture::new(CONFIG)?;
    for (args, expected) in [
        (
            vec!["verify", "my_backup", "-d"],
            "duplicity verify -v8 --name=my_backup file:///backups/my_backup\n",
        ),
        (
            vec!["collection-status", "my_backup", "--dry"],
            "duplicity collection-status -v8 --name=my_backup file:///backups/my_backup\n",
        ),
        (
            vec!["cleanup", "my_backup", "--force", "-d"],
            "duplicity cleanup --force -v8 --name=my_backup file:///backups/my_backup\n",
        ),
        (
            vec!["remove-older-than", "6M", "my_backup", "-d"],
            "duplicity remove-older-than 6M -v8 --name=my_backup file:///backups/my_backup\n",
        ),
        (
            vec!["remove-all-but-n-full", "2", "my_backup", "--force", "-d"],
            "duplicity remove-all-but-n-full 2 --force -v8 --name=my_backup file:///backups/my_backup\n",
        ),
    ] {
        backups_runner(&fixture)
            .args(args)
            .assert()
            .success()
            .stdout(expected);
    }
    Ok(())
}

#[test]
fn backup_commands_print_duplicity_command() -> TestResult<()> {
    let fixture = ConfigFixture::new(CONFIG)?;
    backups_runner(&fixture)
        .args(["full", "my_backup", "-d"])
        .assert()
        .success()
        .stdout(
            "duplicity full -v8 --name=my_backup --include /home/user/Documents \
             --exclude ** / file:///backups/my_backup\n",
        );
    backups_runner(&fixture)
        .args(["incremental", "my_backup", "--asynchronous-upload", "-d"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "duplicity incremental --asynchronous-upload -v8",
        ));
    Ok(())
}

#[test]
fn restore_prints_duplicity_command() -> TestResult<()> {
    let fixture = ConfigFixture::new(CONFIG)?;
    backups_runner(&fixture)
        .args([
            "restore",
            "my_backup",
            "/home/user/Documents/notes.txt",
            "--restore-to-path",
            "/tmp/out",
            "-d",
        ])
        .assert()
        .success()
        .stdout(
            "duplicity restore -v8 --name=my_backup --file-to-restore \
             home/user/Documents/notes.txt --numeric-owner --force \
             file:///backups/my_backup /tmp/out\n",
        );
    Ok(())
}

#[test]
fn synthetic_dry_run_prints_plan() -> TestResult<()> {
    let fixture = ConfigFixture::new(CONFIG)?;
    backups_runner(&fixture)
        .args(["synthetic", "my_s3_backup", "-d"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("source bucket:       my-backup-bucket")
                .and(predicate::str::contains(
                    "restore --numeric-owner --force s3+http://tmp_source_",
                ))
                .and(predicate::str::contains("full <staging> s3+http://tmp_dest_")),
        );
    Ok(())
}

#[test]
fn synthetic_needs_s3_target() -> TestResult<()> {
    let fixture = ConfigFixture::new(CONFIG)?;
    backups_runner(&fixture)
        .args(["synthetic", "my_backup", "-d"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not of the form s3+http://"));
    Ok(())
}

#[test]
fn unknown_config_fails() -> TestResult<()> {
    let fixture = ConfigFixture::new(CONFIG)?;
    backups_runner(&fixture)
        .args(["verify", "nope", "-d"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no such config: nope"));
    Ok(())
}

#[test]
fn missing_config_file_fails() -> TestResult<()> {
    let fixture = ConfigFixture::empty()?;
    backups_runner(&fixture)
        .arg("configs")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Please run the 'init' command"));
    Ok(())
}
