//! FlowRunner CLI Entry Point
//!
//! Runs the engine and its scheduler from a YAML configuration document.
//!
//! # Usage
//!
//! ```bash
//! # Run schedules until Ctrl-C
//! flowrunner flowrunner.yaml
//!
//! # Fire the next due tick once and wait for its instances
//! flowrunner flowrunner.yaml --once
//!
//! # Keep history on disk and tick every 10 seconds
//! flowrunner flowrunner.yaml --history-dir ./history --tick 10
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colored::Colorize;
use log::{error, info, warn};
use tokio::sync::{broadcast, watch};

use flowrunner::config::DEFAULT_CONFIG_PATH;
use flowrunner::instance::InstanceId;
use flowrunner::monitoring::{EngineEvent, InstanceTimeline};
use flowrunner::{CommandExecutor, Engine, EngineDocument, InstanceStatus, WorkflowInstance};
use flowrunner::{APP_NAME, VERSION};

/// How often `--once` checks whether launched instances have settled.
const SETTLE_POLL: Duration = Duration::from_millis(200);

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    config_path: Option<PathBuf>,
    once: bool,
    history_dir: Option<PathBuf>,
    tick_secs: Option<u64>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Workflow Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowrunner [OPTIONS] [CONFIG_FILE]");
    println!();
    println!("Arguments:");
    println!("  [CONFIG_FILE]       Engine YAML document (default: {})", DEFAULT_CONFIG_PATH.display());
    println!();
    println!("Options:");
    println!("  --once              Run the next due scheduler tick, wait for its instances, exit");
    println!("  --history-dir PATH  Store execution history as JSON files under PATH");
    println!("  --tick SECS         Scheduler tick interval in seconds");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  flowrunner flowrunner.yaml");
    println!("  flowrunner flowrunner.yaml --once");
    println!("  flowrunner flowrunner.yaml --history-dir ./history --tick 10");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--once" => {
                config.once = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--history-dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("--history-dir requires a path argument".to_string());
                }
                config.history_dir = Some(PathBuf::from(&args[i]));
            }
            "--tick" => {
                i += 1;
                if i >= args.len() {
                    return Err("--tick requires a number argument".to_string());
                }
                let secs: u64 = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid tick value: {}", args[i]))?;
                config.tick_secs = Some(secs);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.config_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.config_path = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    Ok(config)
}

fn status_label(status: InstanceStatus) -> colored::ColoredString {
    match status {
        InstanceStatus::Completed => status.as_str().green().bold(),
        InstanceStatus::Failed => status.as_str().red().bold(),
        InstanceStatus::Cancelled => status.as_str().yellow().bold(),
        InstanceStatus::Paused => status.as_str().cyan(),
        _ => status.as_str().normal(),
    }
}

/// Prints a one-block summary and the timeline of a finished instance.
fn print_summary(instance: &WorkflowInstance) {
    println!();
    println!(
        "{} {}.{}@{} [{}]",
        status_label(instance.status),
        instance.namespace,
        instance.workflow_name,
        instance.version,
        instance.id
    );
    println!(
        "  Progress: {}%  Duration: {} ms  Steps: {}  Attempts: {}",
        instance.progress,
        instance.duration.unwrap_or_default(),
        instance.current_pointers().count(),
        instance.pointers.len()
    );
    if let Some(ref err) = instance.error {
        println!("  {} {}: {}", "Error".red(), err.code, err.message);
    }
    if let Some(ref attention) = instance.attention {
        println!("  {} {:?}", "Attention".yellow().bold(), attention);
    }
    println!("{}", InstanceTimeline::from_instance(instance, Utc::now()).gantt_chart());
}

/// Logs engine events as they arrive.
///
/// With `summaries` set, archived instances are printed in full.
async fn report_events(engine: Arc<Engine>, mut events: broadcast::Receiver<EngineEvent>, summaries: bool) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::StatusChanged { instance_id, from, to, .. }) => {
                info!("Instance {}: {} -> {}", instance_id, from, status_label(to));
            }
            Ok(EngineEvent::Archived { instance_id }) if summaries => {
                if let Some(instance) = engine.api().get_instance(&instance_id).await.into_data() {
                    print_summary(&instance);
                }
            }
            Ok(EngineEvent::AttentionRequired { instance_id, attention }) => {
                warn!("Instance {} needs attention: {:?}", instance_id, attention);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event reporter skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Waits until every instance left the active store or was flagged.
async fn wait_settled(engine: &Engine, ids: &[InstanceId]) {
    loop {
        let pending = ids
            .iter()
            .filter(|id| {
                engine
                    .lifecycle()
                    .store()
                    .get(id)
                    .map_or(false, |i| i.attention.is_none())
            })
            .count();
        if pending == 0 {
            return;
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
}

/// Sleeps until the earliest enabled schedule is due, then ticks once.
async fn run_once(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let next = engine
        .scheduler()
        .list(None)
        .into_iter()
        .filter(|s| s.enabled)
        .filter_map(|s| s.next_run)
        .min();

    let Some(due) = next else {
        warn!("No enabled schedules, nothing to run");
        return Ok(());
    };

    let wait = (due - Utc::now()).to_std().unwrap_or_default();
    info!("Next run due at {} (in {:.0?})", due, wait);
    tokio::time::sleep(wait).await;

    let report = engine.scheduler().tick(Utc::now().max(due));
    for (schedule, message) in &report.failed {
        error!("Schedule {} failed to launch: {}", schedule, message);
    }

    let ids: Vec<InstanceId> = report.launched.iter().map(|(_, id)| *id).collect();
    info!("Launched {} instance(s), waiting for them to finish", ids.len());
    wait_settled(engine, &ids).await;

    for id in &ids {
        if let Some(instance) = engine.api().get_instance(id).await.into_data() {
            print_summary(&instance);
        }
    }

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(format!("{} schedule(s) failed to launch", report.failed.len()).into())
    }
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    // Load configuration document
    let config_path = config
        .config_path
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.clone());
    let mut document = EngineDocument::load(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        format!("Could not load '{}': {}", config_path.display(), e)
    })?;

    if let Some(dir) = config.history_dir {
        document.engine.history_dir = Some(dir);
    }
    if let Some(secs) = config.tick_secs {
        document.engine.tick_secs = secs;
    }

    // Commands run relative to the configuration file
    let working_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or(env::current_dir()?);
    info!("Working directory: {}", working_dir.display());

    let executor = Arc::new(CommandExecutor::new().with_working_dir(working_dir));
    let engine = Arc::new(Engine::build(&document.engine, executor).await?);
    engine.load_document(&document)?;

    let events = engine.lifecycle().events().subscribe();
    tokio::spawn(report_events(Arc::clone(&engine), events, !config.once));

    if config.once {
        return run_once(&engine).await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = engine.spawn_scheduler(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown_tx.send(true)?;
    scheduler.await?;

    let active = engine.lifecycle().store().len();
    if active > 0 {
        warn!("{} instance(s) still active at shutdown", active);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
