use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::cache::file_key;
use crate::config::PathsConfig;
use crate::error::{RosterError, RosterResult};
use crate::models::{Cohort, DeltaRecord, OutlierEntry, StatisticsSummary};
use crate::outliers::outlier_share;

const RULE_WIDTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub table: PathBuf,
    pub log: PathBuf,
}

/// `YYYY.MM.DD.<span>` so runs for different dates or spans never collide.
pub fn artifact_stem(reference: NaiveDate, span_days: u32) -> String {
    format!("{}.{}", file_key(reference), span_days)
}

pub fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "null".to_owned(), |value| value.to_string())
}

/// Delta table sorted ascending by delta. Ties keep input order.
pub fn delta_table(deltas: &[DeltaRecord]) -> RosterResult<String> {
    let mut sorted: Vec<&DeltaRecord> = deltas.iter().collect();
    sorted.sort_by(|a, b| a.delta.total_cmp(&b.delta));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["index", "name", "rank", "delta"])?;
    for (index, record) in sorted.iter().enumerate() {
        writer.write_record([
            index.to_string(),
            record.name.clone(),
            record.rank.clone(),
            record.delta.to_string(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| RosterError::Io(err.into_error()))?;
    String::from_utf8(bytes).map_err(|err| {
        RosterError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    })
}

pub fn build_log(
    summary: &StatisticsSummary,
    outliers: &[OutlierEntry],
    metadata: &RunMetadata,
    precision: u32,
) -> String {
    let mut output = String::new();
    let rule = "=".repeat(RULE_WIDTH);

    let _ = writeln!(output, "Net income\t{}", summary.net);
    let _ = writeln!(
        output,
        "Mean and median\t{}\t{}",
        format_optional(summary.overall.mean),
        format_optional(summary.overall.median)
    );
    let _ = writeln!(output, "{rule}");

    for (rank, stats) in summary.by_rank.iter() {
        let _ = writeln!(
            output,
            "{}\t{}\t{}",
            rank,
            format_optional(stats.mean),
            format_optional(stats.median)
        );
    }
    let _ = writeln!(output, "{rule}");

    for cohort in Cohort::ALL {
        if let Some(stats) = summary.by_cohort.get(&cohort) {
            let _ = writeln!(
                output,
                "{}\t{}\t{}",
                cohort.label(),
                format_optional(stats.mean),
                format_optional(stats.median)
            );
        }
    }
    let _ = writeln!(
        output,
        "Outliers\t{} ({}%)",
        outliers.len(),
        format_optional(outlier_share(outliers.len(), summary.overall.count, precision))
    );
    let _ = writeln!(output, "{rule}");

    let _ = writeln!(
        output,
        "Run at\t{}",
        metadata.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    let _ = write!(output, "Execution time\t{}ms", metadata.elapsed.as_millis());

    output
}

pub struct ReportWriter {
    report_dir: PathBuf,
    log_dir: PathBuf,
    precision: u32,
}

impl ReportWriter {
    pub fn new(paths: &PathsConfig, precision: u32) -> Self {
        Self {
            report_dir: paths.report_dir.clone(),
            log_dir: paths.log_dir.clone(),
            precision,
        }
    }

    pub fn paths_for(&self, reference: NaiveDate, span_days: u32) -> ArtifactPaths {
        let stem = artifact_stem(reference, span_days);
        ArtifactPaths {
            table: self.report_dir.join(format!("{stem}.csv")),
            log: self.log_dir.join(format!("{stem}.log")),
        }
    }

    /// Renders both artifacts, then stages each next to its target before
    /// renaming either into place. A failure at any step leaves neither.
    pub fn write(
        &self,
        deltas: &[DeltaRecord],
        summary: &StatisticsSummary,
        outliers: &[OutlierEntry],
        reference: NaiveDate,
        span_days: u32,
        metadata: &RunMetadata,
    ) -> RosterResult<(ArtifactPaths, String)> {
        let table = delta_table(deltas)?;
        let log = build_log(summary, outliers, metadata, self.precision);
        let paths = self.paths_for(reference, span_days);

        for dir in [&self.report_dir, &self.log_dir] {
            fs::create_dir_all(dir)?;
        }

        let staged_table = stage(&paths.table, &table)?;
        let staged_log = match stage(&paths.log, &log) {
            Ok(staged) => staged,
            Err(err) => {
                discard(&staged_table);
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&staged_table, &paths.table) {
            discard(&staged_table);
            discard(&staged_log);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&staged_log, &paths.log) {
            discard(&staged_log);
            discard(&paths.table);
            return Err(err.into());
        }
        info!(table = %paths.table.display(), log = %paths.log.display(), "report written");

        Ok((paths, log))
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".partial");
    PathBuf::from(staged)
}

fn stage(path: &Path, contents: &str) -> RosterResult<PathBuf> {
    let staged = staging_path(path);
    if let Err(err) = fs::write(&staged, contents) {
        discard(&staged);
        return Err(err.into());
    }
    Ok(staged)
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove artifact");
        }
    }
}

/// Writes one standalone artifact through the same stage-and-rename path.
pub fn write_artifact(path: &Path, contents: &str) -> RosterResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staged = stage(path, contents)?;
    if let Err(err) = fs::rename(&staged, path) {
        discard(&staged);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::delta::CohortRules;
    use crate::stats::summarize_run;
    use chrono::TimeZone;

    fn record(id: u64, name: &str, rank: &str, delta: f64) -> DeltaRecord {
        DeltaRecord {
            id,
            name: name.to_owned(),
            rank: rank.to_owned(),
            delta,
            sponsor_tier: None,
        }
    }

    fn metadata() -> RunMetadata {
        RunMetadata {
            started_at: Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap(),
            elapsed: Duration::from_millis(42),
        }
    }

    #[test]
    fn stem_encodes_date_and_span() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert_eq!(artifact_stem(date, 30), "2024.01.08.30");
    }

    #[test]
    fn table_is_sorted_ascending_with_sequence_index() {
        let deltas = vec![
            record(1, "Avery", "Member", 40.0),
            record(2, "Jules", "Elite", -5.0),
            record(3, "Kiara", "L5", 12.5),
        ];
        let table = delta_table(&deltas).unwrap();
        assert_eq!(
            table,
            "index,name,rank,delta\n0,Jules,Elite,-5\n1,Kiara,L5,12.5\n2,Avery,Member,40\n"
        );
    }

    #[test]
    fn log_lists_ranks_alphabetically_and_nulls() {
        let rules = CohortRules::from_config(&AnalysisConfig::default());
        let deltas = vec![
            record(1, "Avery", "Member", 40.0),
            record(2, "Jules", "Elite", 600.0),
        ];
        let vocabulary = vec!["Member".to_owned(), "Elite".to_owned(), "Leader".to_owned()];
        let summary = summarize_run(&deltas, &vocabulary, &rules, 3);
        let outliers = vec![OutlierEntry {
            name: "Jules".to_owned(),
            rank: "Elite".to_owned(),
            delta: 600.0,
            sponsor_tier: None,
        }];

        let log = build_log(&summary, &outliers, &metadata(), 3);
        let expected = "\
Net income\t640
Mean and median\t320\t320
================================
Elite\t600\t600
Leader\tnull\tnull
Member\t40\t40
================================
Members\t320\t320
Officers\tnull\tnull
Vanguards\tnull\tnull
Outliers\t1 (50%)
================================
Run at\t2024-01-08T12:00:00.000Z
Execution time\t42ms";
        assert_eq!(log, expected);
    }

    #[test]
    fn writer_places_artifacts_in_their_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            cache_dir: dir.path().join("csv"),
            report_dir: dir.path().join("reports"),
            log_dir: dir.path().join("logs"),
        };
        let writer = ReportWriter::new(&paths, 3);
        let rules = CohortRules::from_config(&AnalysisConfig::default());
        let deltas = vec![record(1, "Avery", "Member", 40.0)];
        let summary = summarize_run(&deltas, &["Member".to_owned()], &rules, 3);
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();

        let (written, log) = writer
            .write(&deltas, &summary, &[], date, 7, &metadata())
            .unwrap();

        assert_eq!(written.table, dir.path().join("reports/2024.01.08.7.csv"));
        assert_eq!(written.log, dir.path().join("logs/2024.01.08.7.log"));
        assert_eq!(fs::read_to_string(&written.log).unwrap(), log);
        assert!(fs::read_to_string(&written.table)
            .unwrap()
            .starts_with("index,name,rank,delta\n0,Avery,Member,40"));
    }

    #[test]
    fn failed_log_write_leaves_no_table_behind() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("logs");
        fs::write(&blocked, "not a directory").unwrap();
        let paths = PathsConfig {
            cache_dir: dir.path().join("csv"),
            report_dir: dir.path().join("reports"),
            log_dir: blocked,
        };
        let writer = ReportWriter::new(&paths, 3);
        let rules = CohortRules::from_config(&AnalysisConfig::default());
        let deltas = vec![record(1, "Avery", "Member", 40.0)];
        let summary = summarize_run(&deltas, &["Member".to_owned()], &rules, 3);
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();

        assert!(writer
            .write(&deltas, &summary, &[], date, 7, &metadata())
            .is_err());
        assert!(!writer.paths_for(date, 7).table.exists());
        let leftovers = fs::read_dir(&paths.report_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn rename_failure_rolls_back_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            cache_dir: dir.path().join("csv"),
            report_dir: dir.path().join("reports"),
            log_dir: dir.path().join("logs"),
        };
        let writer = ReportWriter::new(&paths, 3);
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let target = writer.paths_for(date, 7);
        // A non-empty directory at the log path makes the final rename fail.
        fs::create_dir_all(target.log.join("occupied")).unwrap();

        let rules = CohortRules::from_config(&AnalysisConfig::default());
        let deltas = vec![record(1, "Avery", "Member", 40.0)];
        let summary = summarize_run(&deltas, &["Member".to_owned()], &rules, 3);

        assert!(writer
            .write(&deltas, &summary, &[], date, 7, &metadata())
            .is_err());
        assert!(!target.table.exists());
        assert!(!staging_path(&target.table).exists());
        assert!(!staging_path(&target.log).exists());
    }

    #[test]
    fn standalone_artifact_is_written_without_staging_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("houses.2021.04.01.tsv");

        write_artifact(&path, "stat\tTrident").unwrap();
        write_artifact(&path, "stat\tSabre").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "stat\tSabre");
        assert!(!staging_path(&path).exists());
    }
}
