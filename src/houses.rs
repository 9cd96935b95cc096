//! House-level views of a roster: per-house activity figures for one
//! snapshot, and how many divisions each house had active month by month.

use std::collections::BTreeSet;
use std::fmt::Write;

use chrono::{Months, NaiveDate};
use tracing::{debug, info};

use crate::cache::{file_key, SnapshotCache, SnapshotSource};
use crate::config::{HouseConfig, SchemaConfig};
use crate::error::{RosterError, RosterResult};
use crate::models::{HouseDivisionCount, HouseStatistics, MemberRecord, Snapshot};
use crate::pipeline::load_snapshot;
use crate::report::format_optional;
use crate::stats::mean;

/// The member's house column, or the division fallback for reports without
/// one. Unassigned values yield `None`.
pub fn house_of<'a>(member: &'a MemberRecord, config: &'a HouseConfig) -> Option<&'a str> {
    let house = match member.extra_text(&config.column) {
        Some(house) if !house.is_empty() => house,
        _ => config
            .division_houses
            .get(&member.division)
            .map(String::as_str)?,
    };
    (!config.unassigned.iter().any(|value| value == house)).then_some(house)
}

fn is_host(member: &MemberRecord, schema: &SchemaConfig, config: &HouseConfig) -> bool {
    match member.extra_text(&schema.position) {
        Some(position) => {
            !position.is_empty() && !config.non_host_positions.iter().any(|p| p == position)
        }
        None => false,
    }
}

/// Missing or non-numeric cells count as zero.
fn counter_values(members: &[&MemberRecord], column: &str) -> Vec<f64> {
    members
        .iter()
        .map(|member| member.counter(column).unwrap_or(0.0))
        .collect()
}

pub fn house_statistics(
    snapshot: &Snapshot,
    schema: &SchemaConfig,
    config: &HouseConfig,
) -> Vec<HouseStatistics> {
    config
        .names
        .iter()
        .map(|house| {
            let members: Vec<&MemberRecord> = snapshot
                .members
                .iter()
                .filter(|member| house_of(member, config) == Some(house.as_str()))
                .collect();
            let hosts: Vec<&MemberRecord> = members
                .iter()
                .copied()
                .filter(|member| is_host(member, schema, config))
                .collect();

            HouseStatistics {
                house: house.clone(),
                members: members.len(),
                hosts: hosts.len(),
                reputation: mean(&counter_values(&members, &config.reputation), config.precision),
                recruits: counter_values(&members, &config.recruits).iter().sum(),
                events_attended: mean(
                    &counter_values(&members, &config.events_attended),
                    config.precision,
                ),
                events_hosted: mean(
                    &counter_values(&hosts, &config.events_hosted),
                    config.precision,
                ),
                discord_hours: mean(
                    &counter_values(&members, &config.discord_hours),
                    config.precision,
                ),
            }
        })
        .collect()
}

/// Distinct assigned divisions per configured house. Houses outside the
/// configured list are ignored.
pub fn active_divisions(snapshot: &Snapshot, config: &HouseConfig) -> Vec<usize> {
    let mut active: Vec<BTreeSet<&str>> = vec![BTreeSet::new(); config.names.len()];
    let mut unplaced = 0usize;

    for member in snapshot.members.iter() {
        if config.unassigned.iter().any(|value| *value == member.division) {
            continue;
        }
        let slot = house_of(member, config)
            .and_then(|house| config.names.iter().position(|name| name == house));
        match slot {
            Some(idx) => {
                active[idx].insert(member.division.as_str());
            }
            None => unplaced += 1,
        }
    }

    if unplaced > 0 {
        debug!(date = %snapshot.date, unplaced, "members without a known house");
    }
    active.iter().map(BTreeSet::len).collect()
}

/// `from`, then each following month up to and including `to`.
pub fn monthly_dates(from: NaiveDate, to: NaiveDate) -> RosterResult<Vec<NaiveDate>> {
    if from > to {
        return Err(RosterError::Config(format!(
            "range start {from} is after its end {to}"
        )));
    }

    let mut dates = Vec::new();
    let mut months = 0u32;
    loop {
        let date = from.checked_add_months(Months::new(months)).ok_or_else(|| {
            RosterError::Config(format!("month {months} after {from} is out of range"))
        })?;
        if date > to {
            break;
        }
        dates.push(date);
        months += 1;
    }
    Ok(dates)
}

/// Resolves one snapshot per month and counts active divisions in each.
/// Snapshots are resolved in order; the first failure aborts the range.
pub async fn active_divisions_over<S: SnapshotSource>(
    cache: &SnapshotCache<S>,
    from: NaiveDate,
    to: NaiveDate,
    schema: &SchemaConfig,
    config: &HouseConfig,
) -> RosterResult<Vec<HouseDivisionCount>> {
    let dates = monthly_dates(from, to)?;
    info!(%from, %to, months = dates.len(), "counting active divisions");

    let mut rows = Vec::with_capacity(dates.len());
    for date in dates {
        let snapshot = load_snapshot(cache, date, schema).await?;
        rows.push(HouseDivisionCount {
            date,
            counts: active_divisions(&snapshot, config),
        });
    }
    Ok(rows)
}

/// One row per figure, one column per house.
pub fn render_statistics(stats: &[HouseStatistics]) -> String {
    let mut output = String::from("stat");
    for house in stats {
        let _ = write!(output, "\t{}", house.house);
    }

    let rows: [(&str, fn(&HouseStatistics) -> String); 7] = [
        ("members", |s| s.members.to_string()),
        ("hosts", |s| s.hosts.to_string()),
        ("reputation", |s| format_optional(s.reputation)),
        ("recruits", |s| s.recruits.to_string()),
        ("events_attended", |s| format_optional(s.events_attended)),
        ("events_hosted", |s| format_optional(s.events_hosted)),
        ("discord_hours", |s| format_optional(s.discord_hours)),
    ];
    for (label, value) in rows {
        let _ = write!(output, "\n{label}");
        for house in stats {
            let _ = write!(output, "\t{}", value(house));
        }
    }
    output
}

pub fn render_active_divisions(names: &[String], rows: &[HouseDivisionCount]) -> String {
    let mut output = String::from("date");
    for name in names {
        let _ = write!(output, "\t{name}");
    }
    for row in rows {
        let _ = write!(output, "\n{}", row.date);
        for count in row.counts.iter() {
            let _ = write!(output, "\t{count}");
        }
    }
    output
}

pub fn statistics_file_name(date: NaiveDate) -> String {
    format!("houses.{}.tsv", file_key(date))
}

pub fn divisions_file_name(from: NaiveDate, to: NaiveDate) -> String {
    format!("house-divisions.{}.{}.tsv", file_key(from), file_key(to))
}
