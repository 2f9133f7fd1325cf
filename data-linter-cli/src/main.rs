//! Data Linter command line
//!
//! Runs the linter inline or drives one step of a parallel run. Every step
//! loads the same configuration file, so an external scheduler only has to
//! pass the shard index to the workers.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use data_linter::prelude::*;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "data-linter", author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML run configuration, local or in object storage
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: String,

    /// Emit JSON formatted logs
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log debug output, including failure explanations
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match, validate and archive every landed file in this process
    Run,
    /// Match files and stage balanced work shards
    Init {
        /// Number of workers to split the files between
        #[arg(short, long)]
        workers: usize,
    },
    /// Validate the files of one work shard
    ValidateShard {
        /// Index of the shard to validate
        #[arg(short, long)]
        shard: usize,
    },
    /// Aggregate every staged status record and archive files
    CollectStatus,
    /// Merge the logs of every step into the run log
    CollectLogs,
    /// Summarise the per-table logs
    Summary {
        /// Restrict the summary to one table
        #[arg(long)]
        table: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },
    /// Show the failing tests of one landed file, most recent run first
    Errors {
        /// Original landed path of the file
        #[arg(long)]
        file: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

fn logging_config(cli: &Cli) -> LoggingConfig {
    let config = if cli.json_logs {
        LoggingConfig::production()
    } else {
        LoggingConfig::default()
    };
    if cli.verbose {
        config.with_linter_level(Level::DEBUG)
    } else {
        config
    }
}

async fn execute(cli: &Cli, ctx: &RunContext) -> Result<()> {
    let config = load_and_validate_config(ctx.storage(), &cli.config)
        .await
        .with_context(|| format!("loading config '{}'", cli.config))?;

    match &cli.command {
        Command::Run => {
            let report = run_validation(ctx, &config).await?;
            info!(
                outcome = ?report.outcome,
                failed = report.failed,
                total = report.total,
                "Run finished"
            );
        }
        Command::Init { workers } => {
            let shards = para_run_init(ctx, &config, *workers).await?;
            println!("{}", shards.len());
        }
        Command::ValidateShard { shard } => {
            let records = para_run_validation(ctx, &config, *shard).await?;
            info!(shard, files = records.len(), "Shard validated");
        }
        Command::CollectStatus => {
            let report = para_collect_all_status(ctx, &config).await?;
            info!(outcome = ?report.outcome, total = report.total, "Statuses collected");
        }
        Command::CollectLogs => {
            let path = para_collect_all_logs(ctx, &config).await?;
            println!("{path}");
        }
        Command::Summary { table, format } => {
            let summary = summarize(ctx.storage(), &config.log_base_path, table.as_deref()).await?;
            match format {
                OutputFormat::Markdown => print!("{summary}"),
                OutputFormat::Json => println!("{}", summary.to_json()?),
            }
        }
        Command::Errors { file, format } => {
            let errors = errors_for_file(ctx.storage(), &config.log_base_path, file).await?;
            match format {
                OutputFormat::Markdown => print!("{errors}"),
                OutputFormat::Json => println!("{}", errors.to_json()?),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let run_log = RunLog::new();
    if let Err(e) = init_logging(logging_config(&cli), Some(run_log.clone())) {
        eprintln!("could not initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    let ctx = RunContext::from_env().with_log(run_log);
    match execute(&cli, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_validate_shard() {
        let cli = Cli::parse_from(["data-linter", "validate-shard", "-s", "3", "-c", "s3://cfg/config.yaml"]);
        assert_eq!(cli.config, "s3://cfg/config.yaml");
        assert!(matches!(cli.command, Command::ValidateShard { shard: 3 }));
    }

    #[test]
    fn test_parse_errors_command() {
        let cli = Cli::parse_from([
            "data-linter",
            "errors",
            "--file",
            "s3://land/table1_b.csv",
            "--format",
            "json",
        ]);
        assert!(matches!(
            cli.command,
            Command::Errors { ref file, format: OutputFormat::Json } if file == "s3://land/table1_b.csv"
        ));
    }

    #[test]
    fn test_verbose_raises_linter_level() {
        let cli = Cli::parse_from(["data-linter", "--verbose", "run"]);
        assert_eq!(logging_config(&cli).linter_level, Level::DEBUG);
    }

    #[tokio::test]
    async fn test_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let cli = Cli::parse_from(["data-linter", "run", "-c", path.to_str().unwrap()]);
        let ctx = RunContext::from_env();
        let err = execute(&cli, &ctx).await.unwrap_err();
        assert!(format!("{err:#}").contains("loading config"));
    }
}
