use std::io::Write;

use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};

use crate::Cli;

/// Prints a shell completion script to stdout.
///
/// Bash: `eval "$(purgectl completions bash)"`
#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    pub fn write(&self, out: &mut dyn Write) {
        let mut command = Cli::command();
        let name = command.get_name().to_string();
        generate(self.shell, &mut command, name, out);
    }
}
