//! upsync: keep a fork in step with its upstream.
//!
//! # Usage
//!
//! ```text
//! upsync sync [--dry-run] [--strategy merge|rebase] [--target <ref>] [--force] [--no-ci]
//!             [--repo <path>] [--config <file>]
//! upsync backups [--repo <path>] [--json]
//! upsync rollback <branch> [--repo <path>] [--yes]
//! ```

mod commands;

use std::fmt;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{backups::BackupsArgs, rollback::RollbackArgs, sync::SyncArgs};
use upsync_core::Strategy;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "upsync",
    version,
    about = "Synchronize a fork with its upstream: report, assess, merge, validate",
    long_about = None,
)]
struct Cli {
    /// Log more to stderr (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch upstream, report and assess changes, then merge or rebase.
    Sync(SyncArgs),

    /// List backup branches created by earlier syncs.
    Backups(BackupsArgs),

    /// Reset the current branch to a backup branch.
    Rollback(RollbackArgs),
}

// ---------------------------------------------------------------------------
// Strategy argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `Strategy` from CLI args.
#[derive(Debug, Clone, Default)]
pub struct StrategyArg(pub Strategy);

impl FromStr for StrategyArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merge" => Ok(Self(Strategy::Merge)),
            "rebase" => Ok(Self(Strategy::Rebase)),
            other => Err(format!(
                "unknown strategy '{other}'; expected: merge, rebase"
            )),
        }
    }
}

impl fmt::Display for StrategyArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<StrategyArg> for Strategy {
    fn from(s: StrategyArg) -> Self {
        s.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Backups(args) => args.run(),
        Commands::Rollback(args) => args.run(),
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
