//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::scheduler::Capacity;

/// Cadence - per-key cooldown job scheduler
#[derive(Parser)]
#[command(
    name = "cadence",
    about = "Runs a job for every key on a cooldown, with a cap on concurrent attempts",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/cadence/logs/cadence.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the scheduler until interrupted
    Run {
        /// Keys file, one key per line
        #[arg(short, long)]
        keys: Option<PathBuf>,

        /// Contexts file, one context per line
        #[arg(long)]
        contexts: Option<PathBuf>,

        /// Max attempts in flight (a number or "unbounded")
        #[arg(short, long)]
        max_concurrent: Option<Capacity>,
    },

    /// Validate config and sources without running anything
    Check {
        /// Keys file, one key per line
        #[arg(short, long)]
        keys: Option<PathBuf>,

        /// Contexts file, one context per line
        #[arg(long)]
        contexts: Option<PathBuf>,
    },

    /// Show the latest scheduler status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show scheduler logs
    Logs {
        /// Keep printing lines as the daemon writes them
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

/// Output format for the status command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
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

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["cadence"]).is_err());
    }

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::parse_from(["cadence", "run"]);
        assert!(matches!(
            cli.command,
            Command::Run {
                keys: None,
                contexts: None,
                max_concurrent: None
            }
        ));
    }

    #[test]
    fn test_cli_parse_run_overrides() {
        let cli = Cli::parse_from([
            "cadence",
            "run",
            "--keys",
            "tokens.txt",
            "--contexts",
            "agents.txt",
            "--max-concurrent",
            "unbounded",
        ]);
        if let Command::Run {
            keys,
            contexts,
            max_concurrent,
        } = cli.command
        {
            assert_eq!(keys, Some(PathBuf::from("tokens.txt")));
            assert_eq!(contexts, Some(PathBuf::from("agents.txt")));
            assert_eq!(max_concurrent, Some(Capacity::Unbounded));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_rejects_zero_capacity() {
        assert!(Cli::try_parse_from(["cadence", "run", "--max-concurrent", "0"]).is_err());
    }

    #[test]
    fn test_cli_parse_status() {
        let cli = Cli::parse_from(["cadence", "status", "--format", "json"]);
        assert!(matches!(cli.command, Command::Status { format: OutputFormat::Json }));
    }

    #[test]
    fn test_cli_parse_logs() {
        let cli = Cli::parse_from(["cadence", "logs", "-n", "10", "-f"]);
        assert!(matches!(cli.command, Command::Logs { follow: true, lines: 10 }));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from(["cadence", "check", "-c", "/path/to/config.yml", "-v", "--log-stderr"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
        assert!(cli.verbose);
        assert!(cli.log_stderr);
        assert!(matches!(cli.command, Command::Check { .. }));
    }
}
