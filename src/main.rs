//! completion-dispatch entry point.
//!
//! ## CLI Subcommands
//!
//! - `completion-dispatch` or `completion-dispatch serve` - Dispatch JSON-lines jobs (default)
//! - `completion-dispatch check` - Verify provider connectivity (exit 0/1/2/3)
//! - `completion-dispatch config show|defaults|validate` - Inspect configuration

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;

use completion_dispatch::admission::MessageCostEstimator;
use completion_dispatch::cli::{self, config_cmd};
use completion_dispatch::config::{self as dispatch_config, EnvConfig};
use completion_dispatch::provider::OpenAiClient;
use completion_dispatch::shutdown::ShutdownResult;
use completion_dispatch::telemetry::{init_logging, LogConfig};
use completion_dispatch::transport::{ingest_lines, write_responses, ChannelPublisher};
use completion_dispatch::Dispatcher;

const RESPONSE_BUFFER: usize = 256;
const IDLE_POLL: Duration = Duration::from_millis(100);
const WRITER_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "serve" | "" => {
            if let Err(code) = init_tracing() {
                return code;
            }
            let config = match dispatch_config::load() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Configuration error: {e}");
                    return ExitCode::from(2u8);
                }
            };
            match serve(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Server error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        "check" => {
            let config = match dispatch_config::load() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Configuration error: {e}");
                    return ExitCode::from(2u8);
                }
            };
            let code = cli::run_check(&config).await;
            ExitCode::from(code as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => ExitCode::from(config_cmd::run_show() as u8),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(config_cmd::run_validate() as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {subcommand}");
                    print_usage();
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("completion-dispatch {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {command}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> Result<(), ExitCode> {
    let log_config = LogConfig::from_env().map_err(|e| {
        eprintln!("Logging configuration error: {e}");
        ExitCode::from(2u8)
    })?;
    init_logging(&log_config).map_err(|e| {
        eprintln!("Logging initialization failed: {e}");
        ExitCode::from(2u8)
    })
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "completion-dispatch v{version}

USAGE:
    completion-dispatch [COMMAND]

COMMANDS:
    serve            Read jobs from stdin, write records to stdout (default)
    check            Verify provider connectivity and credential
    config show      Print effective configuration
    config defaults  Print built-in defaults
    config validate  Warn about unusable settings
    version          Show version information
    help             Show this help message

ENVIRONMENT:
    DISPATCH_*         Dispatcher settings (see `config defaults`)
    DISPATCH_CONFIG    Optional TOML file; environment overrides it
    DISPATCH_API_KEY   Credential used by `check` (falls back to OPENAI_API_KEY)
    RUST_LOG           Log filter (default: info)
    DISPATCH_LOG_FORMAT  json or pretty (default: json)
    DISPATCH_LOG_FILE    Write logs to this file instead of stderr

EXIT CODES:
    0  Success
    1  Failure / rejected credential
    2  Configuration error
    3  Connection error"
    );
}

async fn serve(config: EnvConfig) -> Result<(), Box<dyn std::error::Error>> {
    let provider = OpenAiClient::new(
        &config.provider_url,
        &config.model,
        config.dispatch.workers.call_timeout,
    )?;
    let estimator = MessageCostEstimator::new(config.per_message_overhead);
    let (publisher, responses) = ChannelPublisher::channel(RESPONSE_BUFFER);
    let writer = tokio::spawn(write_responses(tokio::io::stdout(), responses));

    let dispatcher = Dispatcher::spawn(
        config.dispatch.clone(),
        Arc::new(provider),
        Arc::new(estimator),
        Arc::new(publisher),
    );
    tracing::info!(
        model = %config.model,
        workers = config.dispatch.workers.size,
        "serving jobs from stdin"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = ingest_lines(stdin, &dispatcher) => {
            result?;
            // Input is exhausted; let queued and retrying jobs finish.
            tokio::select! {
                () = dispatcher.until_idle(IDLE_POLL) => {}
                _ = tokio::signal::ctrl_c() => eprintln!("Shutdown signal received, draining..."),
            }
        }
        _ = tokio::signal::ctrl_c() => eprintln!("Shutdown signal received, draining..."),
    }

    let report = dispatcher.shutdown().await;
    match report.drain {
        ShutdownResult::Complete => eprintln!("Shutdown complete"),
        ShutdownResult::Timeout { remaining } => {
            eprintln!("Shutdown timeout, {remaining} calls still running");
        }
    }
    if report.abandoned > 0 {
        eprintln!("{} queued jobs reported as shutdown failures", report.abandoned);
    }

    // The writer ends once every publisher handle is gone.
    drop(dispatcher);
    match tokio::time::timeout(WRITER_GRACE, writer).await {
        Ok(joined) => {
            joined??;
        }
        Err(_) => tracing::warn!("response writer still busy at exit"),
    }
    Ok(())
}
