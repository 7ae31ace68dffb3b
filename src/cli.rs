//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::{ProcessingStrategy, TestMode};

/// Stomper - automated static-analysis fixing with AI assistance
#[derive(Parser)]
#[command(
    name = "stomper",
    about = "Automatically fix linter and type-checker findings with an AI assistant",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run one fixing session against a repository
    Run {
        /// Repository root (defaults to the current directory)
        path: Option<PathBuf>,

        /// Comma-separated tool set (e.g. "ruff,mypy")
        #[arg(long)]
        tools: Option<String>,

        /// Maximum assistant attempts per file
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Concurrent files (1-16)
        #[arg(long)]
        parallel_files: Option<usize>,

        /// Skip sandbox test runs
        #[arg(long)]
        no_tests: bool,

        /// Test validation mode (full, quick, final, none)
        #[arg(long)]
        test_mode: Option<TestMode>,

        /// Process files in the main tree instead of sandboxes
        #[arg(long)]
        no_isolation: bool,

        /// Stop the session on the first failed file
        #[arg(long)]
        fail_fast: bool,

        /// Cap findings per prompt (0 = unbounded)
        #[arg(long)]
        max_errors: Option<usize>,

        /// Finding grouping strategy (batch-errors, one-error-type, all-errors)
        #[arg(long)]
        strategy: Option<ProcessingStrategy>,

        /// Glob patterns restricting which files are processed
        #[arg(long = "files", value_name = "GLOB")]
        files: Vec<String>,
    },

    /// Show learning-store statistics
    Stats {
        /// Repository root (defaults to the current directory)
        path: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove stale sandboxes left by a crashed session
    Clean {
        /// Repository root (defaults to the current directory)
        path: Option<PathBuf>,
    },
}

/// Output format for the stats command
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["stomper", "run"]).unwrap();
        match cli.command {
            Command::Run {
                path,
                tools,
                no_tests,
                fail_fast,
                ..
            } => {
                assert!(path.is_none());
                assert!(tools.is_none());
                assert!(!no_tests);
                assert!(!fail_fast);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "stomper",
            "run",
            "/repo",
            "--tools",
            "ruff",
            "--max-attempts",
            "5",
            "--parallel-files",
            "4",
            "--test-mode",
            "quick",
            "--strategy",
            "one-error-type",
            "--files",
            "src/**/*.py",
            "--fail-fast",
        ])
        .unwrap();

        match cli.command {
            Command::Run {
                path,
                tools,
                max_attempts,
                parallel_files,
                test_mode,
                strategy,
                files,
                fail_fast,
                ..
            } => {
                assert_eq!(path, Some(PathBuf::from("/repo")));
                assert_eq!(tools.as_deref(), Some("ruff"));
                assert_eq!(max_attempts, Some(5));
                assert_eq!(parallel_files, Some(4));
                assert_eq!(test_mode, Some(TestMode::Quick));
                assert_eq!(strategy, Some(ProcessingStrategy::OneErrorType));
                assert_eq!(files, vec!["src/**/*.py"]);
                assert!(fail_fast);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_stats_format() {
        let cli = Cli::try_parse_from(["stomper", "stats", "--format", "json"]).unwrap();
        match cli.command {
            Command::Stats { format, .. } => assert!(matches!(format, OutputFormat::Json)),
            _ => panic!("expected stats command"),
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
