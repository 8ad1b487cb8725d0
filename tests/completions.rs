//! Completions test: runs the application as a subprocess and asserts its
//! output for the `completions` command

use assert_cmd::Command;
use predicates::prelude::predicate;

use backups_testing::TestResult;

#[test]
fn completions_are_generated() -> TestResult<()> {
    for shell in ["bash", "fish", "zsh", "powershell"] {
        Command::new(env!("CARGO_BIN_EXE_backups"))
            .args(["completions", shell])
            .assert()
            .success()
            .stdout(predicate::str::contains("backups"));
    }
    Ok(())
}
