use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use doxywiki_core::config::{DoxywikiConfig, load_config};
use doxywiki_core::extract::discover_records;
use doxywiki_core::mediawiki::{MediaWikiClient, MediaWikiClientConfig};
use doxywiki_core::page::PageFactory;
use doxywiki_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, normalize_for_display, resolve_paths,
    resolve_source_dir,
};
use doxywiki_core::site::{DebugMode, DeletionPrompt, Reconciler, RunOptions, RunReport};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "DOXYWIKI_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "doxywiki",
    version,
    about = "Publish Doxygen HTML documentation to a MediaWiki site"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    #[arg(long, global = true, help = "Treat extraction and conversion warnings as fatal")]
    warnings_as_errors: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Synchronize the wiki with the generated documentation.
    Update(UpdateArgs),
    /// Delete every page owned by doxywiki.
    Cleanup(CleanupArgs),
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long, value_name = "DIR", help = "Doxygen HTML output directory")]
    source: Option<PathBuf>,
    #[arg(long, help = "Confirm every deletion on stdin")]
    interactive: bool,
    #[arg(long = "debug", value_enum, value_name = "MODE")]
    debug: Vec<DebugArg>,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct CleanupArgs {
    #[arg(long, help = "Confirm every deletion on stdin")]
    interactive: bool,
    #[arg(long = "debug", value_enum, value_name = "MODE")]
    debug: Vec<CleanupDebugArg>,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DebugArg {
    Dump,
    Unsafe,
    WhichDelete,
}

impl From<DebugArg> for DebugMode {
    fn from(value: DebugArg) -> Self {
        match value {
            DebugArg::Dump => Self::Dump,
            DebugArg::Unsafe => Self::Unsafe,
            DebugArg::WhichDelete => Self::WhichDelete,
        }
    }
}

/// Cleanup writes no pages, so there is nothing to dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CleanupDebugArg {
    Unsafe,
    WhichDelete,
}

impl From<CleanupDebugArg> for DebugMode {
    fn from(value: CleanupDebugArg) -> Self {
        match value {
            CleanupDebugArg::Unsafe => Self::Unsafe,
            CleanupDebugArg::WhichDelete => Self::WhichDelete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

struct StdinPrompt;

impl DeletionPrompt for StdinPrompt {
    fn confirm(&mut self, title: &str) -> bool {
        eprint!("Delete {title}? [y/N] ");
        if io::stderr().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

fn init_logging(level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(io::stderr);
    match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.with_max_level(Level::from(level)).init(),
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let result = match &cli.command {
        Commands::Update(args) => run_update(&cli, args),
        Commands::Cleanup(args) => run_cleanup(&cli, args),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            error!("{error:#}");
            eprintln!("Error: {error:#}");
            ExitCode::from(2)
        }
    }
}

fn resolve(cli: &Cli) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: cli.project_root.clone(),
        config: cli.config.clone(),
    };
    let paths = resolve_paths(&context, &overrides)?;
    if cli.diagnostics {
        eprintln!("[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(paths)
}

fn run_options<M>(cli: &Cli, paths: &ResolvedPaths, debug: &[M]) -> RunOptions
where
    M: Copy + Into<DebugMode>,
{
    RunOptions {
        debug: debug.iter().map(|mode| (*mode).into()).collect::<BTreeSet<_>>(),
        debug_dir: paths.debug_dir.clone(),
        warnings_as_errors: cli.warnings_as_errors,
    }
}

fn connect(config: &DoxywikiConfig) -> Result<MediaWikiClient> {
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config)?)?;
    client
        .login_from_env()
        .context("failed to log in to the wiki")?;
    Ok(client)
}

fn run_update(cli: &Cli, args: &UpdateArgs) -> Result<bool> {
    let paths = resolve(cli)?;
    let config = load_config(&paths.config_path)?;
    let settings = config.settings()?;
    let (source_dir, source) = resolve_source_dir(&paths, &config, args.source.as_deref())?;
    info!(
        "reading {} ({})",
        normalize_for_display(&source_dir),
        source.as_str()
    );

    let discovery = discover_records(&source_dir, &settings.classifier)?;
    info!(
        "extracted {} documents ({} failed, {} ignored)",
        discovery.records.len(),
        discovery.failures.len(),
        discovery.ignored
    );
    let factory = PageFactory::new(&settings, &discovery.records);
    let desired = factory.build(&discovery.records);

    let options = run_options(cli, &paths, args.debug.as_slice());
    let mut client = connect(&config)?;
    let mut prompt = StdinPrompt;
    let mut reconciler = Reconciler::new(&settings, &mut client, &options);
    if args.interactive {
        reconciler = reconciler.with_prompt(&mut prompt);
    }
    let report = reconciler.update(&desired, &discovery.failures)?;
    print_report(&report, args.json)?;
    Ok(succeeded(&report, cli.warnings_as_errors))
}

fn run_cleanup(cli: &Cli, args: &CleanupArgs) -> Result<bool> {
    let paths = resolve(cli)?;
    let config = load_config(&paths.config_path)?;
    let settings = config.settings()?;
    let options = run_options(cli, &paths, args.debug.as_slice());
    let mut client = connect(&config)?;
    let mut prompt = StdinPrompt;
    let mut reconciler = Reconciler::new(&settings, &mut client, &options);
    if args.interactive {
        reconciler = reconciler.with_prompt(&mut prompt);
    }
    let report = reconciler.cleanup()?;
    print_report(&report, args.json)?;
    Ok(succeeded(&report, cli.warnings_as_errors))
}

fn succeeded(report: &RunReport, warnings_as_errors: bool) -> bool {
    !report.aborted
        && !report.has_failures()
        && !(warnings_as_errors && !report.warnings.is_empty())
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(report).context("failed to serialize run report")?;
        println!("{rendered}");
        return Ok(());
    }

    println!("doxywiki {}", report.command);
    println!("applied: {}", report.applied);
    println!("unchanged: {}", report.unchanged);
    println!("refused: {}", report.refused);
    println!("failed: {}", report.failed);
    println!("corrupted: {}", report.corrupted);
    println!("deleted: {}", report.deleted);
    println!("delete_refused: {}", report.delete_refused);
    println!("delete_failed: {}", report.delete_failed);
    println!("purged: {}", report.purged);
    println!("requests: {}", report.request_count);
    if report.aborted {
        println!("aborted: warnings are fatal");
    }
    if let Some(path) = &report.delete_candidates_path {
        println!("delete_candidates: {}", normalize_for_display(Path::new(path)));
    }
    if !report.warnings.is_empty() {
        println!("warnings:");
        for warning in &report.warnings {
            println!("  - {warning}");
        }
    }
    let problems = report
        .pages
        .iter()
        .filter(|page| page.detail.is_some() && !page.status.is_retained())
        .collect::<Vec<_>>();
    if !problems.is_empty() {
        println!("problems:");
        for page in problems {
            println!(
                "  - {} [{}]: {}",
                page.title,
                page.status.as_str(),
                page.detail.as_deref().unwrap_or_default()
            );
        }
    }
    Ok(())
}
