//! Gitport CLI - migrate a GitLab group tree between instances.

mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::Parser;
use console::{Term, style};
use tabled::settings::Style;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use gitport::api::RestClient;
use gitport::migrate::{
    GroupStatus, MigrateOptions, MigrationReport, ProjectStatus, migrate_group_tree,
};
use gitport::retry::ApiRateLimiter;

#[derive(Parser)]
#[command(name = "gitport")]
#[command(version)]
#[command(about = "Migrate a GitLab group tree to another instance")]
#[command(
    long_about = "Gitport mirrors a group hierarchy and all of its projects from one GitLab \
instance onto another, preserving paths 1:1. Projects are moved through the \
export/import API with a bounded number of concurrent transfers; a failing \
project never aborts its siblings, and re-running against an already-migrated \
tree skips existing projects unless --overwrite is set."
)]
#[command(after_long_help = r#"EXAMPLES
    Mirror a group tree:
        $ gitport --source-url https://gitlab.old.example --source-token $OLD_TOKEN \
                  --target-url https://gitlab.new.example --target-token $NEW_TOKEN \
                  --source-group teamA

    Re-run replacing projects that already exist on the target:
        $ gitport --source-group teamA --overwrite

    Mirror under a different root on the target:
        $ gitport --source-group teamA --target-group archive/teamA

CONFIGURATION
    Gitport reads configuration from:
      1. ~/.config/gitport/config.toml (or $XDG_CONFIG_HOME/gitport/config.toml)
      2. ./gitport.toml
      3. Environment variables (GITPORT_* prefix, e.g., GITPORT_SOURCE_TOKEN)
      4. .env file in current directory
    CLI flags override all of the above.

ENVIRONMENT VARIABLES
    GITPORT_SOURCE_URL       Source instance URL
    GITPORT_SOURCE_TOKEN     Source personal access token (api scope)
    GITPORT_TARGET_URL       Target instance URL
    GITPORT_TARGET_TOKEN     Target personal access token (api scope)

NOTES
    Interrupting a run (Ctrl+C) stops dispatching new projects but does not
    retract export/import jobs already running server-side; those finish (or
    fail) on their own and may leave artifacts to clean up manually.
    Instance-level settings, CI/CD variables, webhooks and integrations are
    not migrated.
"#)]
struct Cli {
    /// Source instance URL (e.g. https://gitlab.old.example.com)
    #[arg(long)]
    source_url: Option<String>,

    /// Source personal access token with api scope
    #[arg(long)]
    source_token: Option<String>,

    /// Target instance URL
    #[arg(long)]
    target_url: Option<String>,

    /// Target personal access token with api scope
    #[arg(long)]
    target_token: Option<String>,

    /// Source group path to migrate (e.g. "org/team")
    #[arg(long)]
    source_group: String,

    /// Root path on the target (defaults to the source group path)
    #[arg(long)]
    target_group: Option<String>,

    /// Maximum concurrent project migrations
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Replace target projects that already exist (default: skip them)
    #[arg(long)]
    overwrite: bool,

    /// API request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip SSL certificate verification
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Seconds between export/import status polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Ceiling in seconds on a single export or import wait
    #[arg(long)]
    phase_timeout: Option<u64>,

    /// Persistent log file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();
    let cli = Cli::parse();

    let log_file = cli
        .log_file
        .clone()
        .unwrap_or_else(|| config.migrate.log_file.clone());
    init_tracing(&log_file)?;

    // Set up graceful shutdown handler (Ctrl+C)
    shutdown::setup_shutdown_handler();

    // Startup validation: anything wrong here is fatal before any migration.
    let source_url = cli
        .source_url
        .clone()
        .or_else(|| config.source_url())
        .ok_or("source URL missing (use --source-url or GITPORT_SOURCE_URL)")?;
    let source_token = cli
        .source_token
        .clone()
        .or_else(|| config.source_token())
        .ok_or("source token missing (use --source-token or GITPORT_SOURCE_TOKEN)")?;
    let target_url = cli
        .target_url
        .clone()
        .or_else(|| config.target_url())
        .ok_or("target URL missing (use --target-url or GITPORT_TARGET_URL)")?;
    let target_token = cli
        .target_token
        .clone()
        .or_else(|| config.target_token())
        .ok_or("target token missing (use --target-token or GITPORT_TARGET_TOKEN)")?;

    url::Url::parse(&source_url).map_err(|e| format!("invalid source URL {source_url}: {e}"))?;
    url::Url::parse(&target_url).map_err(|e| format!("invalid target URL {target_url}: {e}"))?;

    let timeout = Duration::from_secs(cli.timeout.unwrap_or(config.migrate.timeout_secs));
    let verify_ssl = config.migrate.verify_ssl && !cli.insecure;

    let source = RestClient::new(
        &source_url,
        &source_token,
        timeout,
        verify_ssl,
        Some(ApiRateLimiter::new(config.migrate.requests_per_second)),
    )?;
    let target = RestClient::new(
        &target_url,
        &target_token,
        timeout,
        verify_ssl,
        Some(ApiRateLimiter::new(config.migrate.requests_per_second)),
    )?;

    let options = MigrateOptions {
        target_group: cli.target_group.clone(),
        concurrency: cli.concurrency.unwrap_or(config.migrate.concurrency),
        overwrite: cli.overwrite || config.migrate.overwrite,
        poll_interval: Duration::from_secs(
            cli.poll_interval.unwrap_or(config.migrate.poll_interval_secs),
        ),
        phase_timeout: Duration::from_secs(
            cli.phase_timeout.unwrap_or(config.migrate.phase_timeout_secs),
        ),
        ..MigrateOptions::default()
    };

    tracing::info!(
        source = %source_url,
        target = %target_url,
        group = %cli.source_group,
        "=== migration run starting ==="
    );

    let reporter = Arc::new(progress::ProgressReporter::new());
    let callback = reporter.as_callback();
    let started = Instant::now();

    let report = migrate_group_tree(
        &source,
        &target,
        &cli.source_group,
        &options,
        Some(shutdown::shutdown_flag()),
        Some(callback),
    )
    .await?;

    reporter.finish();
    print_summary(&report, started.elapsed());

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

/// Install the tracing subscriber: a persistent plain-text log file in every
/// mode, plus console output when not attached to a TTY (interactive runs get
/// progress bars instead).
fn init_tracing(log_file: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| format!("cannot open log file {}: {e}", log_file.display()))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gitport=info,gitport_cli=info"));

    let file_layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));

    if Term::stdout().is_term() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(fmt::layer().with_target(false))
            .init();
    }
    Ok(())
}

#[derive(tabled::Tabled)]
struct ProjectRow {
    #[tabled(rename = "Project")]
    project: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn print_summary(report: &MigrationReport, elapsed: Duration) {
    println!();
    println!(
        "{}  {} migrated, {} skipped, {} failed in {:.1}s",
        style("Projects:").bold(),
        style(report.succeeded()).green(),
        style(report.skipped()).yellow(),
        if report.failed() > 0 {
            style(report.failed()).red()
        } else {
            style(report.failed()).dim()
        },
        elapsed.as_secs_f64()
    );
    println!(
        "{}    {} created, {} reused, {} failed",
        style("Groups:").bold(),
        report.groups_created(),
        report.groups_reused(),
        report.groups_failed()
    );

    if !report.projects.is_empty() {
        let rows: Vec<ProjectRow> = report
            .projects
            .iter()
            .map(|o| {
                let (outcome, detail) = match &o.status {
                    ProjectStatus::Succeeded => ("migrated".to_string(), String::new()),
                    ProjectStatus::Skipped { reason } => ("skipped".to_string(), reason.clone()),
                    ProjectStatus::Failed { phase, reason } => {
                        ("failed".to_string(), format!("{phase}: {reason}"))
                    }
                };
                ProjectRow {
                    project: o.project.full_path.clone(),
                    target: o.target_full_path.clone(),
                    outcome,
                    detail,
                }
            })
            .collect();

        let mut table = tabled::Table::new(rows);
        table.with(Style::rounded());
        println!("\n{table}");
    }

    let failed_groups: Vec<_> = report
        .groups
        .iter()
        .filter_map(|g| match &g.status {
            GroupStatus::Failed { reason } => Some((g.source_path.as_str(), reason.as_str())),
            _ => None,
        })
        .collect();
    if !failed_groups.is_empty() {
        println!("\n{}", style("Failed groups:").bold().red());
        for (path, reason) in failed_groups {
            println!("  ✗ {path}: {reason}");
        }
    }
}
