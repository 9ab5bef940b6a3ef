//! codec-bench CLI - Image codec benchmarking tool

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

mod commands;
mod source;

/// Environment variable overriding the log filter, in `env_logger` syntax.
const LOG_ENV: &str = "CODEC_BENCH_LOG";

/// Image codec benchmarking tool.
#[derive(Parser)]
#[command(name = "codec-bench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print warnings and errors; task failures are not reported individually
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode and decode images over a matrix of codec settings
    Run(commands::run::RunArgs),

    /// List codecs, their versions and quality spaces
    Codecs {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show statistics for a completed-tasks file
    Stats {
        /// Completed-tasks CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Group by codec configuration
        #[arg(long)]
        by_codec: bool,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        LevelFilter::Warn
    } else if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env(LOG_ENV)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.quiet),
        Commands::Codecs { json } => commands::codecs::run(json),
        Commands::Stats { input, by_codec } => commands::stats::run(input, by_codec, cli.verbose),
    }
}
