//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Instant;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use image_eraser::core::config::{Config, StateBackend};
use image_eraser::core::errors::EraserError;
use image_eraser::core::model::RemovalOutcome;
use image_eraser::events::{ApiEventSink, EventSink, LogEventSink};
use image_eraser::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, LogContext, spawn_logger,
};
use image_eraser::pipeline::{
    CollectReport, Collector, CollectorOptions, EraseReport, Eraser, EraserOptions, Phase,
    ScanReport, Scanner,
};
use image_eraser::runtime;
use image_eraser::state::{self, api::ApiClient};
use image_eraser::verify::CommandVerifier;

/// Image eraser: removes unused, vulnerable container images from a node.
#[derive(Debug, Parser)]
#[command(
    name = "eraser",
    author,
    version,
    about = "Node-level container image hygiene",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Inventory this node and publish its removal candidates.
    Collect(CollectArgs),
    /// Verify every candidate of the run and record the vulnerable ones.
    Scan(ScanArgs),
    /// Remove vulnerable images from this node.
    Erase(EraseArgs),
    /// Inspect configuration.
    Config(ConfigArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Overrides shared by the node-local phases.
#[derive(Debug, Clone, Args, Default)]
struct NodeArgs {
    /// Runtime name (containerd, crio, dockershim).
    #[arg(long, value_name = "NAME")]
    runtime: Option<String>,
    /// Explicit runtime endpoint, e.g. unix:///run/containerd/containerd.sock.
    #[arg(long, value_name = "URI")]
    endpoint: Option<String>,
    /// Node name; defaults to NODE_NAME.
    #[arg(long, value_name = "NAME")]
    node_name: Option<String>,
    /// Exclusion file or directory.
    #[arg(long, value_name = "PATH")]
    exclusion: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    /// Shared run record identifier.
    #[arg(long, value_name = "ID")]
    run_id: Option<String>,
}

#[derive(Debug, Clone, Args, Default)]
struct CollectArgs {
    #[command(flatten)]
    node: NodeArgs,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Clone, Args, Default)]
struct ScanArgs {
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Clone, Args, Default)]
struct EraseArgs {
    #[command(flatten)]
    node: NodeArgs,
    #[command(flatten)]
    run: RunArgs,
    /// Work-order file (JSON array) instead of the run's vulnerable list.
    #[arg(long, value_name = "PATH")]
    image_list: Option<PathBuf>,
    /// Report what would be removed without removing anything.
    #[arg(long)]
    dry_run: bool,
    /// Do not emit removal events.
    #[arg(long)]
    no_removal_events: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type. Every variant exits 1.
#[derive(Debug, Error)]
pub enum CliError {
    /// Pipeline or configuration failure.
    #[error(transparent)]
    Eraser(#[from] EraserError),
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Collect(args) => run_collect(cli, args),
        Command::Scan(args) => run_scan(cli, args),
        Command::Erase(args) => run_erase(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── config resolution ────────────────────

fn load_config(cli: &Cli, node: Option<&NodeArgs>, run: &RunArgs) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(node) = node {
        if let Some(name) = &node.runtime {
            config.runtime.name.clone_from(name);
            config.runtime.endpoint = None;
        }
        if let Some(endpoint) = &node.endpoint {
            config.runtime.endpoint = Some(endpoint.clone());
        }
        if let Some(name) = &node.node_name {
            config.node.name = Some(name.clone());
        }
        if let Some(path) = &node.exclusion {
            config.exclusion.path.clone_from(path);
        }
    }
    if let Some(run_id) = &run.run_id {
        config.state.run_id.clone_from(run_id);
    }
    config.validate()?;
    Ok(config)
}

fn current_thread_runtime() -> Result<tokio::runtime::Runtime, CliError> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// Activity logger for one phase run; shut down and joined on `finish`.
struct PhaseLogger {
    handle: ActivityLoggerHandle,
    join: JoinHandle<()>,
    start: Instant,
}

impl PhaseLogger {
    fn start(config: &Config, phase: Phase, node: Option<&str>) -> Result<Self, CliError> {
        let (root, join) = spawn_logger(ActivityLoggerConfig::from(&config.logging))?;
        let handle = root.with_context(LogContext {
            phase: Some(phase.as_str().to_string()),
            node: node.map(str::to_string),
            run_id: Some(config.state.run_id.clone()),
        });
        handle.send(ActivityEvent::PhaseStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config.stable_hash()?,
        });
        Ok(Self {
            handle,
            join,
            start: Instant::now(),
        })
    }

    fn handle(&self) -> ActivityLoggerHandle {
        self.handle.clone()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn finish<T>(
        self,
        result: &Result<T, EraserError>,
        count: impl FnOnce(&T) -> usize,
        details: &str,
    ) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        match result {
            Ok(value) => self.handle.send(ActivityEvent::PhaseCompleted {
                count: count(value),
                duration_ms,
                ok: true,
                details: details.to_string(),
            }),
            Err(err) => {
                self.handle.send(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                self.handle.send(ActivityEvent::PhaseCompleted {
                    count: 0,
                    duration_ms,
                    ok: false,
                    details: details.to_string(),
                });
            }
        }
        self.handle.shutdown();
        let _ = self.join.join();
    }
}

// ──────────────────── collect ────────────────────

fn run_collect(cli: &Cli, args: &CollectArgs) -> Result<(), CliError> {
    let config = load_config(cli, Some(&args.node), &args.run)?;
    let node = config.require_node_name()?.to_string();
    let logger = PhaseLogger::start(&config, Phase::Collect, Some(&node))?;

    let options = CollectorOptions {
        node,
        run_id: config.state.run_id.clone(),
        exclusion_path: config.exclusion.path.clone(),
        extra_patterns: config.exclusion.patterns.clone(),
    };
    let handle = logger.handle();
    let result = current_thread_runtime()?.block_on(async {
        let client = runtime::connect(&config.runtime).await?;
        let store = state::open(&config.state)?;
        Collector::new(&client, store.as_ref(), Some(handle))
            .run(&options)
            .await
    });
    logger.finish(&result, |r| r.candidates.len(), "collect");
    print_collect(cli, &result?)
}

fn print_collect(cli: &Cli, report: &CollectReport) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            println!(
                "{} {} candidate(s) published for {} (run {})",
                "collect:".bold(),
                report.candidates.len().to_string().green(),
                report.node,
                report.run_id
            );
            println!(
                "  {} images, {} running, {} excluded, {} ms",
                report.images, report.running, report.excluded, report.duration_ms
            );
            if cli.verbose {
                for image in report.candidates.iter() {
                    println!("  {} {}", image.digest, image.tags.join(", ").dimmed());
                }
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({"command": "collect", "report": report}))?;
        }
    }
    Ok(())
}

// ──────────────────── scan ────────────────────

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let config = load_config(cli, None, &args.run)?;
    let verifier = CommandVerifier::from_config(&config.scanner)?;
    let logger = PhaseLogger::start(&config, Phase::Scan, None)?;

    let run_id = config.state.run_id.clone();
    let handle = logger.handle();
    let result = current_thread_runtime()?.block_on(async {
        let store = state::open(&config.state)?;
        Scanner::new(&verifier, store.as_ref(), Some(handle))
            .run(&run_id)
            .await
    });
    logger.finish(&result, ScanReport::scanned, "scan");
    print_scan(cli, &result?)
}

fn print_scan(cli: &Cli, report: &ScanReport) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            println!(
                "{} {} scanned: {} verified, {} vulnerable, {} failed (run {})",
                "scan:".bold(),
                report.scanned(),
                report.verified_count().to_string().green(),
                report.vulnerable.len().to_string().yellow(),
                report.failed.len().to_string().red(),
                report.run_id
            );
            if cli.verbose {
                for image in &report.vulnerable {
                    println!("  {} {}", "vulnerable".yellow(), image.digest);
                }
                for failed in &report.failed {
                    println!("  {} {} {}", "failed".red(), failed.digest, failed.reason);
                }
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({"command": "scan", "report": report}))?;
        }
    }
    Ok(())
}

// ──────────────────── erase ────────────────────

fn run_erase(cli: &Cli, args: &EraseArgs) -> Result<(), CliError> {
    let mut config = load_config(cli, Some(&args.node), &args.run)?;
    if args.dry_run {
        config.eraser.dry_run = true;
    }
    if args.no_removal_events {
        config.eraser.emit_removal_events = false;
    }
    let node = config.require_node_name()?.to_string();
    let logger = PhaseLogger::start(&config, Phase::Erase, Some(&node))?;

    let options = EraserOptions {
        node,
        run_id: config.state.run_id.clone(),
        exclusion_path: config.exclusion.path.clone(),
        extra_patterns: config.exclusion.patterns.clone(),
        image_list: args.image_list.clone(),
        dry_run: config.eraser.dry_run,
        tag_fallback: config.eraser.tag_fallback,
    };
    let handle = logger.handle();
    let result = current_thread_runtime()?.block_on(async {
        let client = runtime::connect(&config.runtime).await?;
        let store = state::open(&config.state)?;
        let sink = event_sink(&config, &handle)?;
        let eraser = Eraser::new(&client, store.as_ref(), Some(handle.clone()));
        match &sink {
            Some(sink) => eraser.with_events(sink.as_ref()).run(&options).await,
            None => eraser.run(&options).await,
        }
    });
    logger.finish(&result, |r| r.report.removed_count(), "erase");
    print_erase(cli, &result?)
}

fn event_sink(
    config: &Config,
    logger: &ActivityLoggerHandle,
) -> Result<Option<Box<dyn EventSink>>, EraserError> {
    if !config.eraser.emit_removal_events || config.eraser.dry_run {
        return Ok(None);
    }
    Ok(Some(match config.state.backend {
        StateBackend::Api => Box::new(ApiEventSink::new(
            ApiClient::from_config(&config.state.api)?,
            &config.node.namespace,
        )),
        StateBackend::File => Box::new(LogEventSink::new(logger.clone())),
    }))
}

fn print_erase(cli: &Cli, out: &EraseReport) -> Result<(), CliError> {
    let report = &out.report;
    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            let mode = if report.dry_run { " (dry run)" } else { "" };
            println!(
                "{} {} removed, {} not found, {} skipped, {} failed on {}{mode}",
                "erase:".bold(),
                report.removed_count().to_string().green(),
                report.not_found_count(),
                report.skipped_count().to_string().yellow(),
                report.failed_count().to_string().red(),
                report.node,
            );
            if out.events_failed > 0 {
                println!("  {} removal event(s) could not be emitted", out.events_failed);
            }
            if cli.verbose {
                for (digest, outcome) in &report.entries {
                    println!("  {digest} {}", describe_outcome(outcome));
                }
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({"command": "erase", "report": out}))?;
        }
    }
    Ok(())
}

fn describe_outcome(outcome: &RemovalOutcome) -> String {
    match outcome {
        RemovalOutcome::Removed { handle } => format!("{} via {handle}", "removed".green()),
        RemovalOutcome::NotFound => "not found".to_string(),
        RemovalOutcome::Skipped { reason, detail } => {
            format!("{} ({reason}: {detail})", "skipped".yellow())
        }
        RemovalOutcome::Failed { error, .. } => format!("{} {error}", "failed".red()),
    }
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::User(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                let source = cli.config.clone().unwrap_or_else(Config::default_path);

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", source.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": source.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(e.into())
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");
    let git_sha = option_env!("GIT_SHA").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("eraser {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
                println!("git_sha: {git_sha}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "eraser",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                    "git_sha": git_sha,
                }
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line<T: Serialize + ?Sized>(payload: &T) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("ERASER_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
