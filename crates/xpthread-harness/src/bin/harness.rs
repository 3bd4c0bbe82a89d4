//! CLI entrypoint for the xpthread smoke driver.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use xpthread_harness::{SmokeConfig, run_smoke, summarize_log};

/// Smoke and evidence tooling for xpthread.
#[derive(Debug, Parser)]
#[command(name = "xpthread-harness")]
#[command(about = "Smoke-test driver for the xpthread threading layer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run once-init, counter, timed-lock and trylock checks.
    Smoke {
        /// Number of contexts incrementing the shared counter.
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Timed-lock deadline distance in milliseconds.
        #[arg(long, default_value_t = 1000)]
        timed_lock_ms: u64,
        /// Optional JSONL evidence path (one line per check).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Validate a structured JSONL evidence file.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Smoke {
            threads,
            timed_lock_ms,
            log,
        } => {
            if let Some(parent) = log.as_deref().and_then(std::path::Path::parent)
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let config = SmokeConfig {
                threads,
                timed_lock: Duration::from_millis(timed_lock_ms),
                log,
            };
            let report = run_smoke(&config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.ok {
                let failed = report.checks.iter().filter(|c| !c.passed).count();
                return Err(format!("Smoke run failed: {failed} check(s)").into());
            }
        }
        Command::ValidateLog { log } => {
            let summary = summarize_log(&log)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);

            if !summary.ok {
                return Err(format!(
                    "Log validation failed: {} error(s) in {} line(s)",
                    summary.errors.len(),
                    summary.lines
                )
                .into());
            }
        }
    }

    Ok(())
}
