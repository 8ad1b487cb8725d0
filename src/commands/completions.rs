//! `completions` subcommand

use abscissa_core::{Command, Runnable};

use std::io::Write;

use clap::CommandFactory;

use clap_complete::{generate, shells, Generator};

/// `completions` subcommand
#[derive(clap::Parser, Command, Debug)]
pub(crate) struct CompletionsCmd {
    /// Shell to generate completions for
    #[clap(value_enum)]
    sh: Variant,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub(super) enum Variant {
    Bash,
    Fish,
    Zsh,
    Powershell,
}

impl Runnable for CompletionsCmd {
    fn run(&self) {
        let mut stdout = std::io::stdout();
        match self.sh {
            Variant::Bash => generate_completion(shells::Bash, &mut stdout),
            Variant::Fish => generate_completion(shells::Fish, &mut stdout),
            Variant::Zsh => generate_completion(shells::Zsh, &mut stdout),
            Variant::Powershell => generate_completion(shells::PowerShell, &mut stdout),
        }
    }
}

/// Write the completion script of `backups` for `shell` into `buf`.
pub fn generate_completion<G: Generator>(shell: G, buf: &mut dyn Write) {
    let mut command = crate::commands::EntryPoint::command();
    generate(
        shell,
        &mut command,
        option_env!("CARGO_BIN_NAME").unwrap_or("backups"),
        buf,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_name_the_subcommands() {
        let mut buf = Vec::new();
        generate_completion(shells::Bash, &mut buf);
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("remove-all-but-n-full"));
        assert!(script.contains("synthetic"));

        generate_completion(shells::Fish, &mut std::io::sink());
        generate_completion(shells::Zsh, &mut std::io::sink());
        generate_completion(shells::PowerShell, &mut std::io::sink());
    }
}
