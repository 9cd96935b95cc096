use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{SnapshotCache, SnapshotSource};
use crate::config::{RosterConfig, SchemaConfig};
use crate::delta::{compute_deltas, CohortRules};
use crate::error::{RosterError, RosterResult};
use crate::matcher::join;
use crate::models::{DeltaRecord, OutlierEntry, Snapshot, StatisticsSummary};
use crate::outliers::{detect, OutlierPolicy};
use crate::parser::parse;
use crate::report::{ArtifactPaths, ReportWriter, RunMetadata};
use crate::stats::{summarize_run, unbucketed_ranks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub reference: NaiveDate,
    pub span_days: u32,
}

impl RunRequest {
    pub fn lookback(&self) -> RosterResult<NaiveDate> {
        self.reference
            .checked_sub_days(Days::new(u64::from(self.span_days)))
            .ok_or_else(|| {
                RosterError::Config(format!(
                    "span of {} days before {} is out of range",
                    self.span_days, self.reference
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub deltas: Vec<DeltaRecord>,
    pub summary: StatisticsSummary,
    pub outliers: Vec<OutlierEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub analysis: Analysis,
    pub paths: ArtifactPaths,
    pub log: String,
}

pub async fn load_snapshot<S: SnapshotSource>(
    cache: &SnapshotCache<S>,
    date: NaiveDate,
    schema: &SchemaConfig,
) -> RosterResult<Snapshot> {
    let raw = cache.resolve(date).await?;
    parse(&raw, date, schema)
}

/// Resolves `(prev, now)` concurrently; both must succeed before either is
/// used. A zero span resolves its single date once.
pub async fn load_pair<S: SnapshotSource>(
    cache: &SnapshotCache<S>,
    request: &RunRequest,
    schema: &SchemaConfig,
) -> RosterResult<(Snapshot, Snapshot)> {
    let lookback = request.lookback()?;
    if lookback == request.reference {
        let snapshot = load_snapshot(cache, lookback, schema).await?;
        return Ok((snapshot.clone(), snapshot));
    }
    tokio::try_join!(
        load_snapshot(cache, lookback, schema),
        load_snapshot(cache, request.reference, schema),
    )
}

pub fn analyze(prev: &Snapshot, now: &Snapshot, config: &RosterConfig) -> RosterResult<Analysis> {
    let analysis = &config.analysis;

    let pairs = join(prev, now);
    info!(
        prev_date = %prev.date,
        now_date = %now.date,
        prev = prev.len(),
        now = now.len(),
        matched = pairs.len(),
        "joined snapshots"
    );

    let deltas = compute_deltas(&pairs, &config.schema.primary_counter)?;

    let vocabulary = now.rank_vocabulary();
    let skipped = unbucketed_ranks(&deltas, &vocabulary);
    if !skipped.is_empty() {
        debug!(?skipped, "ranks without a bucket");
    }

    let rules = CohortRules::from_config(analysis);
    let summary = summarize_run(&deltas, &vocabulary, &rules, analysis.rounding_precision);
    let outliers = detect(&deltas, &OutlierPolicy::from_config(analysis));

    Ok(Analysis {
        deltas,
        summary,
        outliers,
    })
}

/// Runs the whole pipeline. Artifacts are only written once both snapshots
/// resolved and the analysis completed.
pub async fn run<S, F>(
    config: &RosterConfig,
    cache: &SnapshotCache<S>,
    request: RunRequest,
    metadata: F,
) -> RosterResult<RunOutcome>
where
    S: SnapshotSource,
    F: FnOnce() -> RunMetadata,
{
    let (prev, now) = load_pair(cache, &request, &config.schema).await?;
    let analysis = analyze(&prev, &now, config)?;

    let writer = ReportWriter::new(&config.paths, config.analysis.rounding_precision);
    let (paths, log) = writer.write(
        &analysis.deltas,
        &analysis.summary,
        &analysis.outliers,
        request.reference,
        request.span_days,
        &metadata(),
    )?;

    Ok(RunOutcome {
        analysis,
        paths,
        log,
    })
}
