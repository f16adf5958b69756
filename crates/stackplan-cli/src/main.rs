//! stackplan CLI tool.

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "stackplan")]
#[command(about = "Resolve and apply deployment topologies in dependency order", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "STACKPLAN_LOG_FORMAT", value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Where the topology comes from and how it is rendered.
#[derive(Args, Debug)]
pub struct TopologyArgs {
    /// Path to the topology file
    #[arg(default_value = "topology.kdl")]
    pub path: String,

    /// Use the bundled container security sample instead of a file
    #[arg(long, conflicts_with = "path")]
    pub sample: bool,

    /// Context parameter override (KEY=VALUE), may be repeated
    #[arg(long = "context", short = 'c', value_name = "KEY=VALUE")]
    pub context: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a topology file
    Validate {
        #[command(flatten)]
        topology: TopologyArgs,
    },
    /// Print the resolved apply order
    Plan {
        #[command(flatten)]
        topology: TopologyArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply every unit in dependency order
    Apply {
        #[command(flatten)]
        topology: TopologyArgs,

        #[command(flatten)]
        options: commands::apply::ApplyArgs,
    },
    /// Print the bundled sample topology
    Sample,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Validate { topology } => {
            commands::validate(&topology).await?;
        }
        Commands::Plan { topology, json } => {
            commands::plan::show(&topology, json)?;
        }
        Commands::Apply { topology, options } => {
            commands::apply::run(&topology, options).await?;
        }
        Commands::Sample => {
            print!("{}", stackplan_config::sample::SAMPLE_TOPOLOGY);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "stackplan",
            "apply",
            "prod.kdl",
            "--parallel",
            "4",
            "--continue-independent",
            "--context",
            "CIDR_PREFIX=192.168",
            "-c",
            "cluster-name=prod",
        ])
        .unwrap();
        match cli.command {
            Commands::Apply { topology, options } => {
                assert_eq!(topology.path, "prod.kdl");
                assert_eq!(topology.context, vec!["CIDR_PREFIX=192.168", "cluster-name=prod"]);
                assert_eq!(options.parallel, 4);
                assert!(options.continue_independent);
                assert!(!options.dry_run);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["stackplan", "plan"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Text);
        match cli.command {
            Commands::Plan { topology, json } => {
                assert_eq!(topology.path, "topology.kdl");
                assert!(!topology.sample);
                assert!(!json);
            }
            _ => panic!("expected plan"),
        }
    }

    #[test]
    fn test_sample_conflicts_with_path() {
        assert!(Cli::try_parse_from(["stackplan", "plan", "x.kdl", "--sample"]).is_err());
        assert!(Cli::try_parse_from(["stackplan", "plan", "--sample"]).is_ok());
    }
}
