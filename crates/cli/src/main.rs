mod config;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use courier_dispatch::{ClientBuilder, MemoryStore};
use courier_storage::{FileWriteLog, PersistedEntry, WriteLog};
use tracing_subscriber::EnvFilter;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Inspect and drain a courier write log.
#[derive(Parser)]
#[command(name = "courier", version, about = "Inspect and drain a courier write log")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the writes waiting in a log
    Status {
        /// Path to the write log file
        #[arg(long)]
        log: PathBuf,
    },

    /// Send every queued write to the API and wait until the log is empty
    Flush {
        /// Path to the write log file
        #[arg(long)]
        log: PathBuf,
        /// Path to a courier.toml config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// API root, overriding the config file
        #[arg(long)]
        base_url: Option<String>,
        /// Give up waiting after this many seconds
        #[arg(long, default_value = "60")]
        timeout: u64,
    },

    /// Delete every queued write
    Clear {
        /// Path to the write log file
        #[arg(long)]
        log: PathBuf,
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(
                &format!("failed to create tokio runtime: {}", e),
                cli.output,
                cli.quiet,
            );
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Status { log } => rt.block_on(cmd_status(&log, cli.output, cli.quiet)),
        Commands::Flush {
            log,
            config,
            base_url,
            timeout,
        } => rt.block_on(cmd_flush(
            &log,
            config.as_deref(),
            base_url,
            Duration::from_secs(timeout),
            cli.output,
            cli.quiet,
        )),
        Commands::Clear { log, yes } => rt.block_on(cmd_clear(&log, yes, cli.output, cli.quiet)),
    }
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_status(log_path: &Path, output: OutputFormat, quiet: bool) {
    let entries = match FileWriteLog::inspect(log_path).await {
        Ok(entries) => entries,
        Err(e) => {
            report_error(&format!("error reading write log: {}", e), output, quiet);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "path": log_path.display().to_string(),
                "count": entries.len(),
                "entries": entries.iter().map(entry_summary).collect::<Vec<_>>(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|e| format!("serialization error: {}", e))
            );
        }
        OutputFormat::Text => {
            println!("{} queued write(s) in {}", entries.len(), log_path.display());
            if !quiet {
                for entry in &entries {
                    println!(
                        "  #{:<6} {:<28} {}",
                        entry.seq, entry.request.command, entry.queued_at
                    );
                }
            }
        }
    }
}

fn entry_summary(entry: &PersistedEntry) -> serde_json::Value {
    serde_json::json!({
        "seq": entry.seq,
        "command": entry.request.command,
        "queuedAt": entry.queued_at,
    })
}

async fn cmd_flush(
    log_path: &Path,
    config_path: Option<&Path>,
    base_url: Option<String>,
    timeout: Duration,
    output: OutputFormat,
    quiet: bool,
) {
    let mut config = match config::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };
    if base_url.is_some() {
        config.transport.base_url = base_url;
    }

    let builder = match ClientBuilder::http(config, Arc::new(MemoryStore::new())) {
        Ok(builder) => builder,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };
    let log = Arc::new(FileWriteLog::open(log_path).await);
    let before = log.len().await.unwrap_or(0);

    let client = match builder.write_log(log.clone()).start().await {
        Ok(client) => client,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };

    let drained = tokio::time::timeout(timeout, client.queue().wait_for_idle())
        .await
        .is_ok();
    client.shutdown().await;
    let remaining = log.len().await.unwrap_or(before);

    match output {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "processed": before.saturating_sub(remaining),
                "remaining": remaining,
                "drained": drained,
            })
        ),
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "processed {} write(s), {} remaining",
                    before.saturating_sub(remaining),
                    remaining
                );
            }
        }
    }
    if !drained {
        report_error(
            &format!("timed out after {}s with {} write(s) queued", timeout.as_secs(), remaining),
            output,
            quiet,
        );
        process::exit(1);
    }
}

async fn cmd_clear(log_path: &Path, yes: bool, output: OutputFormat, quiet: bool) {
    let log = FileWriteLog::open(log_path).await;
    let count = log.len().await.unwrap_or(0);

    if count > 0 && !yes {
        eprintln!("This will delete {} queued write(s) from {}.", count, log_path.display());
        eprintln!("Type 'yes' to confirm:");

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() || input.trim() != "yes" {
            eprintln!("Clear aborted.");
            process::exit(1);
        }
    }

    if let Err(e) = log.clear().await {
        report_error(&format!("error clearing write log: {}", e), output, quiet);
        process::exit(1);
    }
    match output {
        OutputFormat::Json => println!("{}", serde_json::json!({ "cleared": count })),
        OutputFormat::Text => {
            if !quiet {
                println!("cleared {} write(s)", count);
            }
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
