use clap::{CommandFactory, Parser};
use clap_complete::{Shell, generate};
use std::io::{self, Write};

/// Generate shell completion scripts for mariadb-services
#[derive(Parser, Debug)]
pub struct Completion {
    /// The shell to generate completions for
    #[arg(value_enum, long)]
    pub shell: Shell,
}

impl Completion {
    pub fn run(&self) -> anyhow::Result<()> {
        self.write_to(&mut io::stdout())
    }

    fn write_to(&self, out: &mut dyn Write) -> anyhow::Result<()> {
        let mut cmd = crate::cli::Cli::command();
        let bin_name = cmd.get_name().to_string();
        generate(self.shell, &mut cmd, bin_name, out);
        Ok(())
    }
}
