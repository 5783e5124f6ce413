use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use dashlog_logs::{
    CompiledFilter, LogEvent, LogFileWriter, LogFilter, LogLevel, LogRecord, LogStreamConfig,
    LogStreamingService, SearchOptions,
};

mod output;

use output::print_entry;

/// dashlog - parse and follow the dashboard's monthly log files
#[derive(Parser, Debug)]
#[command(name = "dashlog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding logs-YYYY-MM.json files (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Number of entries kept in memory (overrides config)
    #[arg(long, global = true)]
    buffer_size: Option<usize>,

    /// Poll instead of using native file watching
    #[arg(long, global = true)]
    poll: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print history, then follow new entries until interrupted
    Tail {
        #[arg(long)]
        level: Option<String>,

        #[arg(long)]
        component: Option<String>,

        /// Case-insensitive text to look for
        #[arg(long)]
        search: Option<String>,

        #[arg(long)]
        operation_id: Option<String>,

        /// Print entries as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Search the current month's history
    Search {
        pattern: String,

        #[arg(long)]
        case_sensitive: bool,

        /// Also search entry metadata
        #[arg(long)]
        metadata: bool,

        #[arg(long, default_value = "100")]
        max: usize,

        #[arg(long)]
        json: bool,
    },

    /// Print buffer statistics for the current month
    Stats,

    /// Append a record to the current month's log file
    Write {
        #[arg(long)]
        message: String,

        #[arg(long, default_value = "INFO")]
        level: String,

        #[arg(long)]
        component: Option<String>,

        #[arg(long)]
        operation_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run_app(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn load_config(args: &Args) -> Result<LogStreamConfig> {
    let mut config = match &args.config {
        Some(path) => LogStreamConfig::load(path)
            .await
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LogStreamConfig::default(),
    };

    if let Some(dir) = &args.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(size) = args.buffer_size {
        config.history_buffer_size = size;
    }
    if args.poll {
        config.use_file_watcher = false;
    }

    Ok(config)
}

async fn run_app(args: Args) -> Result<()> {
    let config = load_config(&args).await?;

    match args.command {
        Command::Tail {
            level,
            component,
            search,
            operation_id,
            json,
        } => {
            let filter = LogFilter {
                level: level.as_deref().map(parse_level).transpose()?,
                component,
                search,
                operation_id: operation_id.clone(),
                ..LogFilter::default()
            };
            tail(config, filter, operation_id, json).await
        }

        Command::Search {
            pattern,
            case_sensitive,
            metadata,
            max,
            json,
        } => {
            let service = LogStreamingService::new(config);
            service.start_streaming(None).await?;

            let options = SearchOptions {
                case_sensitive,
                include_metadata: metadata,
                max_results: max,
            };
            let results = service.search_logs(pattern.as_str(), &options)?;
            service.stop_streaming().await;

            for entry in &results {
                print_entry(entry, json)?;
            }
            Ok(())
        }

        Command::Stats => {
            let service = LogStreamingService::new(config);
            service.start_streaming(None).await?;
            let stats = service.streaming_stats();
            service.stop_streaming().await;

            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }

        Command::Write {
            message,
            level,
            component,
            operation_id,
        } => {
            let record = LogRecord {
                id: format!("{}-cli", chrono::Utc::now().timestamp_millis()),
                timestamp: chrono::Utc::now().to_rfc3339(),
                level: parse_level(&level)?.as_str().to_string(),
                message,
                source: Some("system".to_string()),
                operation_id,
                component,
                metadata: None,
            };

            let path = LogFileWriter::new(&config.log_dir).append(record).await?;
            eprintln!("appended to {}", path.display());
            Ok(())
        }
    }
}

fn parse_level(s: &str) -> Result<LogLevel> {
    match LogLevel::recognize(s) {
        Some(level) => Ok(level),
        None => anyhow::bail!("unknown level '{}'", s),
    }
}

async fn tail(
    config: LogStreamConfig,
    filter: LogFilter,
    operation_id: Option<String>,
    json: bool,
) -> Result<()> {
    let compiled = CompiledFilter::new(&filter)?;
    let service = LogStreamingService::new(config);
    let mut events = service.subscribe();

    service.start_streaming(operation_id.as_deref()).await?;

    for entry in service.parser().filtered_with(&compiled) {
        print_entry(&entry, json)?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            event = events.recv() => {
                match event {
                    Ok(LogEvent::NewLogEntry(entry)) => {
                        if compiled.matches(&entry) {
                            print_entry(&entry, json)?;
                        }
                    }
                    Ok(LogEvent::LogRotation { file_path }) => {
                        eprintln!("following {}", file_path.display());
                    }
                    Ok(LogEvent::StreamingError { message }) => {
                        eprintln!("warning: {}", message);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        eprintln!("warning: skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    service.stop_streaming().await;
    Ok(())
}
