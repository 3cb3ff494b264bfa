use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::debug;
use worklist_core::config::{
    Credentials, DEFAULT_CONFIG_FILENAME, RunConfig, RunOverrides, load_config,
};
use worklist_core::pipeline::{RunReport, RunStatus, list_entries, run_sync};

#[derive(Debug, Parser)]
#[command(
    name = "worklist",
    version,
    about = "Merge newly reported article titles into a wiki worklist page"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Append unseen report titles to the worklist page")]
    Sync(SyncArgs),
    #[command(about = "List titles currently on the worklist page")]
    Entries(EntriesArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, help = "Compute the merge without logging in or saving")]
    dry_run: bool,
    #[arg(long, value_name = "TITLE", help = "Worklist page title")]
    title: Option<String>,
    #[arg(long, value_name = "PATH", conflicts_with = "source_url", help = "Local JSON report")]
    source_file: Option<PathBuf>,
    #[arg(long, value_name = "URL", help = "Remote tabular JSON report")]
    source_url: Option<String>,
}

#[derive(Debug, Args)]
struct EntriesArgs {
    #[arg(long, value_name = "TITLE", help = "Worklist page title")]
    title: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref();
    match cli.command {
        Some(Commands::Sync(args)) => run_sync_command(config_path, cli.diagnostics, args),
        Some(Commands::Entries(args)) => run_entries(config_path, cli.diagnostics, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match verbose {
        0 => "worklist=info,worklist_core=info",
        1 => "worklist=debug,worklist_core=debug",
        _ => "worklist=trace,worklist_core=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_sync_command(config_path: Option<&Path>, diagnostics: bool, args: SyncArgs) -> Result<()> {
    let config = resolve_run_config(
        config_path,
        &RunOverrides {
            title: args.title,
            source_file: args.source_file,
            source_url: args.source_url,
            dry_run: args.dry_run,
        },
    )?;
    if diagnostics {
        println!("[diagnostics]\n{}\n", config.diagnostics());
    }

    let credentials = if config.dry_run {
        None
    } else {
        Some(Credentials::from_env()?)
    };
    let report = run_sync(&config, credentials.as_ref())?;
    print_report(&report);
    Ok(())
}

fn run_entries(config_path: Option<&Path>, diagnostics: bool, args: EntriesArgs) -> Result<()> {
    let config = resolve_run_config(
        config_path,
        &RunOverrides {
            title: args.title,
            ..RunOverrides::default()
        },
    )?;
    if diagnostics {
        println!("[diagnostics]\n{}\n", config.diagnostics());
    }

    let entries = list_entries(&config)?;
    println!("worklist: {}", config.worklist_title);
    println!("entries.count: {}", entries.len());
    for title in entries {
        println!("entries.title: {title}");
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("worklist sync");
    println!("worklist: {}", report.worklist_title);
    println!("source: {}", report.source);
    println!("status: {}", report.status.as_str());
    println!("loaded_rows: {}", report.loaded_rows);
    match report.status {
        RunStatus::NoSourceRows => {
            println!("No pages found in the report; exiting.");
        }
        RunStatus::UpToDate => {
            println!("existing_entries: {}", report.existing_entries);
            println!("No new pages to add; worklist is up to date.");
        }
        RunStatus::Updated | RunStatus::DryRun => {
            println!("existing_entries: {}", report.existing_entries);
            println!("created_page: {}", format_flag(report.created_page));
            println!("added.count: {}", report.added.len());
            for title in &report.added {
                println!("added.title: {title}");
            }
            if let Some(summary) = &report.summary {
                println!("summary: {summary}");
            }
            if let Some(revision) = report.new_revision_id {
                println!("new_revision_id: {revision}");
            }
            if let Some(preview) = &report.preview {
                println!("\n[preview]\n{preview}");
            }
        }
    }
    println!("request_count: {}", report.request_count);
}

fn resolve_run_config(config_path: Option<&Path>, overrides: &RunOverrides) -> Result<RunConfig> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    debug!(path = %normalize_path(&path), "loading config");
    let file = load_config(&path)?;
    file.resolve(overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
