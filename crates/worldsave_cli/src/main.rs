use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use worldsave_cli::{run, CommandKind, CommonOptions, CONTENT_ENV_VAR};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and rewrite tile-grid world saves", long_about = None)]
struct Cli {
    /// JSON content manifest; falls back to the WORLDSAVE_CONTENT variable.
    #[arg(long, global = true)]
    content: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print sections, the identity table and what a load would degrade.
    Inspect { world: PathBuf },
    /// Load and save again with the current content set.
    Resave {
        world: PathBuf,
        /// Write here instead of replacing the input.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List identities preserved for content that is not registered.
    ListUnloaded { world: PathBuf },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn run_cli(cli: Cli) -> Result<(), String> {
    let options = CommonOptions {
        content: cli.content.or_else(content_from_env),
    };
    debug!(content = ?options.content, "content_manifest_selected");
    let kind = match cli.command {
        Command::Inspect { world } => CommandKind::Inspect { world },
        Command::Resave { world, output } => CommandKind::Resave { world, output },
        Command::ListUnloaded { world } => CommandKind::ListUnloaded { world },
    };
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    run(kind, &options, &mut lock)
}

fn content_from_env() -> Option<PathBuf> {
    env::var_os(CONTENT_ENV_VAR)
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_parse_with_global_content() {
        let cli = Cli::try_parse_from([
            "worldsave",
            "resave",
            "a.twsv",
            "--output",
            "b.twsv",
            "--content",
            "content.json",
        ])
        .expect("parse");
        assert_eq!(cli.content, Some(PathBuf::from("content.json")));
        assert!(matches!(
            cli.command,
            Command::Resave { output: Some(ref path), .. } if path == &PathBuf::from("b.twsv")
        ));
    }

    #[test]
    fn list_unloaded_uses_kebab_case() {
        let cli = Cli::try_parse_from(["worldsave", "list-unloaded", "a.twsv"]).expect("parse");
        assert!(matches!(cli.command, Command::ListUnloaded { .. }));
    }
}
