use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod delta;
mod divisions;
mod error;
mod houses;
mod matcher;
mod models;
mod outliers;
mod parser;
mod pipeline;
mod report;
mod stats;

use cache::{HttpSource, SnapshotCache};
use config::RosterConfig;
use pipeline::RunRequest;
use report::RunMetadata;

#[derive(Parser)]
#[command(name = "roster-delta")]
#[command(about = "Period-over-period activity deltas from dated roster snapshots", long_about = None)]
struct Cli {
    /// Path to a TOML config file (defaults to ./roster-delta.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the snapshot on DATE with the one SPAN days earlier
    Delta {
        /// Reference date (YYYY-MM-DD) and/or span in days, in either order
        #[arg(num_args = 0..=2)]
        args: Vec<String>,
        /// Print the analysis as JSON instead of the log text
        #[arg(long)]
        json: bool,
    },
    /// Division headcounts and leader eligibility for one snapshot
    Divisions { date: Option<String> },
    /// Per-house member, host and activity figures for one snapshot
    Houses { date: Option<String> },
    /// Active divisions per house, one snapshot per month from FROM to TO
    HouseDivisions { from: String, to: String },
    /// Resolve a snapshot into the local cache
    Fetch { date: String },
}

fn parse_date(value: &str) -> anyhow::Result<NaiveDate> {
    ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .with_context(|| format!("'{value}' is not a date (expected YYYY-MM-DD)"))
}

/// A purely numeric argument is the span, anything else the reference date.
fn parse_run_args(
    args: &[String],
    default_span: u32,
    today: NaiveDate,
) -> anyhow::Result<RunRequest> {
    let mut request = RunRequest {
        reference: today,
        span_days: default_span,
    };
    let is_span = |arg: &String| !arg.is_empty() && arg.chars().all(|c| c.is_ascii_digit());
    if args.iter().filter(|arg| is_span(*arg)).count() > 1 {
        bail!("expected at most one span argument");
    }
    for arg in args {
        if is_span(arg) {
            request.span_days = arg.parse().context("span is out of range")?;
        } else {
            request.reference = parse_date(arg)?;
        }
    }
    Ok(request)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RosterConfig::load(cli.config.as_deref()).context("failed to load config")?;
    config
        .ensure_dirs()
        .context("failed to create output directories")?;

    let source = HttpSource::new(&config.source).context("failed to create HTTP client")?;
    let cache = SnapshotCache::new(&config.paths.cache_dir, source);
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Delta { args, json } => {
            let started_at = Utc::now();
            let timer = Instant::now();
            let request = parse_run_args(&args, config.analysis.default_span_days, today)?;

            let outcome = pipeline::run(&config, &cache, request, || RunMetadata {
                started_at,
                elapsed: timer.elapsed(),
            })
            .await
            .with_context(|| {
                format!(
                    "delta run for {} over {} days failed",
                    request.reference, request.span_days
                )
            })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.analysis)?);
                return Ok(());
            }

            println!("{}", outcome.log);
            if outcome.analysis.outliers.is_empty() {
                println!("No outliers for this window.");
            } else {
                println!("Outliers:");
                for outlier in outcome.analysis.outliers.iter() {
                    println!("- {outlier}");
                }
            }
            println!(
                "Report written to {} and {}.",
                outcome.paths.table.display(),
                outcome.paths.log.display()
            );
        }
        Commands::Divisions { date } => {
            let date = match date {
                Some(value) => parse_date(&value)?,
                None => today,
            };
            let snapshot = pipeline::load_snapshot(&cache, date, &config.schema).await?;
            let headcounts = divisions::division_headcounts(&snapshot);

            println!("Division headcounts on {}:", snapshot.date);
            for headcount in headcounts.iter() {
                println!("- {}: {}", headcount.division, headcount.count);
            }

            let path = config.eligible_path();
            let previous = divisions::load_eligible(&path)?;
            let outcome = divisions::check_eligibility(
                &snapshot,
                &headcounts,
                &previous,
                &config.schema,
                &config.divisions,
            );
            divisions::save_eligible(&path, &outcome.eligible)?;

            if outcome.lost.is_empty() {
                println!(
                    "No eligible leaders dropped below {}.",
                    config.divisions.eligibility_headcount
                );
            } else {
                println!(
                    "Leaders below {} members:",
                    config.divisions.eligibility_headcount
                );
                for loss in outcome.lost.iter() {
                    println!(
                        "- {} (#{}, {}): {}",
                        loss.leader_name, loss.leader_id, loss.division, loss.count
                    );
                }
            }
        }
        Commands::Houses { date } => {
            let date = match date {
                Some(value) => parse_date(&value)?,
                None => today,
            };
            let snapshot = pipeline::load_snapshot(&cache, date, &config.schema).await?;
            let stats = houses::house_statistics(&snapshot, &config.schema, &config.houses);
            let rendered = houses::render_statistics(&stats);

            let path = config
                .paths
                .report_dir
                .join(houses::statistics_file_name(date));
            report::write_artifact(&path, &rendered)?;
            println!("{rendered}");
            println!("House statistics written to {}.", path.display());
        }
        Commands::HouseDivisions { from, to } => {
            let from = parse_date(&from)?;
            let to = parse_date(&to)?;
            let rows =
                houses::active_divisions_over(&cache, from, to, &config.schema, &config.houses)
                    .await
                    .with_context(|| format!("active division count {from}..{to} failed"))?;
            let rendered = houses::render_active_divisions(&config.houses.names, &rows);

            let path = config
                .paths
                .report_dir
                .join(houses::divisions_file_name(from, to));
            report::write_artifact(&path, &rendered)?;
            println!("{rendered}");
            println!("Active divisions written to {}.", path.display());
        }
        Commands::Fetch { date } => {
            let date = parse_date(&date)?;
            let raw = cache.resolve(date).await?;
            println!(
                "Snapshot for {date} cached at {} ({} bytes).",
                cache.entry_path(date).display(),
                raw.len()
            );
        }
    }

    Ok(())
}
