use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "opdept-sync",
    version,
    about = "Pushes unmatched operator department changes through the FA data loader"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one full reconciliation pass.
    Run(RunArgs),
    InitConfig(InitConfigArgs),
    /// Test TCP reachability of the data loader server.
    CheckServer(CheckServerArgs),
    Purge(PurgeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the run manifest to stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InitConfigArgs {
    #[arg(long, default_value = "config.toml")]
    pub path: PathBuf,

    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckServerArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    pub timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PurgeArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Overrides `[retention] days`.
    #[arg(long)]
    pub days: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_with_defaults() {
        let cli = Cli::try_parse_from(["opdept-sync", "run", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Run(RunArgs { json: true, config: None })));

        let cli = Cli::try_parse_from(["opdept-sync", "check-server"]).unwrap();
        let Commands::CheckServer(args) = cli.command else {
            panic!("expected check-server");
        };
        assert_eq!(args.timeout_secs, 3);

        let cli = Cli::try_parse_from(["opdept-sync", "purge", "--days", "7"]).unwrap();
        let Commands::Purge(args) = cli.command else {
            panic!("expected purge");
        };
        assert_eq!(args.days, Some(7));
    }
}
