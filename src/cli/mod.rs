//! CLI module for A.R.E.S Research
//!
//! Provides command-line interface parsing for the ares-research binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod output;

use crate::research::types::ExecutionMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// A.R.E.S Research - plan, research and report on a topic
#[derive(Parser, Debug)]
#[command(
    name = "ares-research",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "A.R.E.S Research - multi-stage deep research pipeline",
    long_about = "Plans a topic into sub-topic blocks, researches each block with a bounded\n\
                  tool-calling agent and synthesizes a Markdown report with numbered citations.\n\n\
                  Use 'run' for a one-shot research run or 'serve' to expose the HTTP + SSE API.",
    after_help = "EXAMPLES:\n    \
                  ares-research run \"Photosynthesis\"                    # Research in series\n    \
                  ares-research run \"CRISPR\" --mode parallel -k 2       # Two blocks at a time\n    \
                  ares-research run \"Rust async\" -o report.md           # Write the report to a file\n    \
                  ares-research serve --port 3000                       # Start the HTTP server\n    \
                  ares-research --config my.toml config --full          # Show the effective config"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "research.toml", env = "ARES_CONFIG", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Research a topic and print the report
    Run {
        /// The topic to research
        topic: String,

        /// Execution mode (series or parallel)
        #[arg(short, long)]
        mode: Option<ExecutionMode>,

        /// Iteration budget per block
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,

        /// Maximum number of blocks researched at once in parallel mode
        #[arg(short = 'k', long)]
        concurrency: Option<usize>,

        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start the HTTP server
    Serve {
        /// Host address (overrides [server].host)
        #[arg(long)]
        host: Option<String>,

        /// Port (overrides [server].port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show configuration information
    Config {
        /// Show the full configuration as TOML
        #[arg(short = 'f', long)]
        full: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_options() {
        let cli = Cli::try_parse_from([
            "ares-research",
            "run",
            "Photosynthesis",
            "--mode",
            "parallel",
            "-k",
            "2",
            "-n",
            "4",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                topic,
                mode,
                max_iterations,
                concurrency,
                output,
            } => {
                assert_eq!(topic, "Photosynthesis");
                assert_eq!(mode, Some(ExecutionMode::Parallel));
                assert_eq!(max_iterations, Some(4));
                assert_eq!(concurrency, Some(2));
                assert!(output.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["ares-research", "serve", "--port", "8080", "--no-color"])
            .unwrap();
        assert!(cli.no_color);
        assert!(matches!(
            cli.command,
            Commands::Serve {
                port: Some(8080),
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let result = Cli::try_parse_from(["ares-research", "run", "x", "--mode", "swarm"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["ares-research"]).is_err());
    }
}
