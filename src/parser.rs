//! Turns raw roster CSV into a typed, filtered [`Snapshot`].
//!
//! Reports have gone through more than one column layout. The header row is
//! sniffed into a [`SchemaEra`] and mapped onto one canonical [`ColumnMap`];
//! everything downstream only sees the canonical [`MemberRecord`].

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use tracing::debug;

use crate::config::SchemaConfig;
use crate::error::{RosterError, RosterResult};
use crate::models::{FieldValue, MemberRecord, Snapshot};

const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaEra {
    /// Named header with a `rank` column.
    Current,
    /// Named header that only carries `member_rank`.
    LegacyMemberRank,
    /// No header row at all; columns addressed by index. Rejected.
    Positional,
}

impl SchemaEra {
    pub fn detect(header: &StringRecord, schema: &SchemaConfig) -> Self {
        let first = header.get(0).unwrap_or_default();
        if first.parse::<u64>().is_ok() {
            return SchemaEra::Positional;
        }
        if position(header, &schema.rank).is_some() {
            SchemaEra::Current
        } else {
            SchemaEra::LegacyMemberRank
        }
    }
}

/// Header indices of the canonical fields.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub era: SchemaEra,
    pub headers: Vec<String>,
    pub id: usize,
    pub name: usize,
    pub rank: Option<usize>,
    pub legacy_rank: Option<usize>,
    pub division: Option<usize>,
    pub sponsor: Option<usize>,
    pub primary_counter: usize,
}

impl ColumnMap {
    pub fn from_header(header: &StringRecord, schema: &SchemaConfig) -> RosterResult<Self> {
        let era = SchemaEra::detect(header, schema);
        if era == SchemaEra::Positional {
            return Err(RosterError::malformed_row(
                "header row is missing; positional snapshots are not supported",
                header,
            ));
        }

        let required = |column: &str| {
            position(header, column).ok_or_else(|| {
                RosterError::malformed(format!("header is missing required column '{column}'"))
            })
        };

        let id = required(&schema.id)?;
        let name = required(&schema.name)?;
        let primary_counter = required(&schema.primary_counter)?;
        let rank = position(header, &schema.rank);
        let legacy_rank = position(header, &schema.legacy_rank);
        if rank.is_none() && legacy_rank.is_none() {
            return Err(RosterError::malformed(format!(
                "header is missing required column '{}' (or legacy '{}')",
                schema.rank, schema.legacy_rank
            )));
        }

        Ok(Self {
            era,
            headers: header.iter().map(str::to_owned).collect(),
            id,
            name,
            rank,
            legacy_rank,
            division: position(header, &schema.division),
            sponsor: position(header, &schema.sponsor),
            primary_counter,
        })
    }

    /// Rank under the canonical column, falling back to the legacy one.
    fn rank_of<'r>(&self, row: &'r StringRecord) -> &'r str {
        self.rank
            .or(self.legacy_rank)
            .and_then(|idx| row.get(idx))
            .unwrap_or_default()
    }

    /// Both rank columns are checked: each report era used its own name.
    fn is_excluded(&self, row: &StringRecord, excluded: &[String]) -> bool {
        [self.rank, self.legacy_rank]
            .into_iter()
            .flatten()
            .filter_map(|idx| row.get(idx))
            .any(|value| excluded.iter().any(|rank| rank == value))
    }

    fn is_canonical(&self, idx: usize) -> bool {
        idx == self.id
            || idx == self.name
            || Some(idx) == self.rank
            || Some(idx) == self.legacy_rank
            || Some(idx) == self.division
            || Some(idx) == self.sponsor
    }
}

fn position(header: &StringRecord, column: &str) -> Option<usize> {
    header.iter().position(|name| name == column)
}

/// Coerces one cell. Dates are shifted back by `offset_hours` to line up with
/// the source's report cutoff before being truncated to a calendar day.
pub fn coerce(cell: &str, offset_hours: i64) -> FieldValue {
    if cell.is_empty() {
        return FieldValue::Text(String::new());
    }
    if let Ok(value) = cell.parse::<f64>() {
        if value.is_finite() {
            return FieldValue::Number(value);
        }
    }
    if let Some(shifted) = parse_datetime(cell).and_then(|datetime| {
        Duration::try_hours(offset_hours).and_then(|offset| datetime.checked_sub_signed(offset))
    }) {
        return FieldValue::Date(shifted.date());
    }
    FieldValue::Text(cell.to_owned())
}

fn parse_datetime(cell: &str) -> Option<NaiveDateTime> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(cell) {
        return Some(datetime.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(cell, format).ok())
        .or_else(|| {
            DATE_FORMATS.iter().find_map(|format| {
                NaiveDate::parse_from_str(cell, format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
        })
}

pub fn parse(raw: &str, date: NaiveDate, schema: &SchemaConfig) -> RosterResult<Snapshot> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw.trim().as_bytes());

    let mut records = reader.records();
    let header = match records.next() {
        Some(header) => header?,
        None => return Err(RosterError::malformed("snapshot is empty")),
    };
    let columns = ColumnMap::from_header(&header, schema)?;
    debug!(era = ?columns.era, columns = columns.headers.len(), "snapshot header");

    let mut members = Vec::new();
    let mut seen = HashSet::new();
    let mut excluded = 0usize;

    for (line, record) in records.enumerate() {
        let row = record?;
        if row.len() != columns.headers.len() {
            return Err(RosterError::malformed_row(
                format!(
                    "row {} has {} columns, header has {}",
                    line + 2,
                    row.len(),
                    columns.headers.len()
                ),
                &row,
            ));
        }

        if columns.is_excluded(&row, &schema.excluded_ranks) {
            excluded += 1;
            continue;
        }

        let member = build_member(&columns, &row, schema)?;
        if !seen.insert(member.id) {
            return Err(RosterError::malformed_row(
                format!("duplicate member id {}", member.id),
                &row,
            ));
        }
        members.push(member);
    }

    debug!(%date, kept = members.len(), excluded, "snapshot parsed");
    Ok(Snapshot { date, members })
}

fn build_member(
    columns: &ColumnMap,
    row: &StringRecord,
    schema: &SchemaConfig,
) -> RosterResult<MemberRecord> {
    let cell = |idx: usize| row.get(idx).unwrap_or_default();

    let id = cell(columns.id)
        .parse::<u64>()
        .map_err(|_| RosterError::malformed_row("member id is not an integer", row))?;

    let mut counters = BTreeMap::new();
    let mut extra = BTreeMap::new();
    for (idx, header) in columns.headers.iter().enumerate() {
        if columns.is_canonical(idx) {
            continue;
        }
        match coerce(cell(idx), schema.date_offset_hours) {
            FieldValue::Number(value) => {
                counters.insert(header.clone(), value);
            }
            other => {
                extra.insert(header.clone(), other);
            }
        }
    }

    let primary = &columns.headers[columns.primary_counter];
    if !counters.contains_key(primary) {
        return Err(RosterError::malformed_row(
            format!("'{primary}' is not numeric"),
            row,
        ));
    }

    let sponsor_tier = columns
        .sponsor
        .map(cell)
        .filter(|value| !value.is_empty())
        .map(str::to_owned);

    Ok(MemberRecord {
        id,
        name: cell(columns.name).to_owned(),
        rank: columns.rank_of(row).to_owned(),
        division: columns.division.map(cell).unwrap_or_default().to_owned(),
        counters,
        sponsor_tier,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid date")
    }

    fn schema() -> SchemaConfig {
        SchemaConfig::default()
    }

    #[test]
    fn parses_header_driven_rows() {
        let raw = "\
id,name,rank,division,position,reputation,recruits,vanguard
7,Avery Lee,Member,DI-VII,,140,2,
9,Kiara Patel,L5,DI-XIV,DC,900,0,Gold
";
        let snapshot = parse(raw, date(), &schema()).expect("parse");
        assert_eq!(snapshot.date, date());
        assert_eq!(snapshot.len(), 2);

        let avery = &snapshot.members[0];
        assert_eq!(avery.id, 7);
        assert_eq!(avery.rank, "Member");
        assert_eq!(avery.division, "DI-VII");
        assert_eq!(avery.counter("reputation"), Some(140.0));
        assert_eq!(avery.counter("recruits"), Some(2.0));
        assert_eq!(avery.sponsor_tier, None);
        assert_eq!(avery.extra_text("position"), Some(""));

        let kiara = &snapshot.members[1];
        assert_eq!(kiara.sponsor_tier.as_deref(), Some("Gold"));
        assert_eq!(kiara.extra_text("position"), Some("DC"));
    }

    #[test]
    fn filters_inactive_and_applicants_under_either_rank_column() {
        let raw = "\
id,name,rank,member_rank,reputation
1,A,Member,Member,10
2,B,Inactive,Member,10
3,C,Member,Applicant,10
4,D,Applicant,,10
";
        let snapshot = parse(raw, date(), &schema()).expect("parse");
        let ids: Vec<u64> = snapshot.members.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn legacy_member_rank_era_maps_to_canonical_rank() {
        let raw = "id,name,member_rank,reputation\n1,A,Elite,10\n2,B,Inactive,4\n";
        let header = StringRecord::from(vec!["id", "name", "member_rank", "reputation"]);
        assert_eq!(
            SchemaEra::detect(&header, &schema()),
            SchemaEra::LegacyMemberRank
        );

        let snapshot = parse(raw, date(), &schema()).expect("parse");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.members[0].rank, "Elite");
    }

    #[test]
    fn positional_snapshots_are_rejected() {
        let raw = "1,A,Member,10\n2,B,Member,12\n";
        let err = parse(raw, date(), &schema()).expect_err("positional");
        assert!(err.to_string().contains("positional"));
    }

    #[test]
    fn missing_required_column_is_malformed() {
        let raw = "id,name,rank\n1,A,Member\n";
        let err = parse(raw, date(), &schema()).expect_err("missing counter");
        assert!(matches!(err, RosterError::MalformedSnapshot { .. }));
        assert!(err.to_string().contains("'reputation'"));
    }

    #[test]
    fn short_row_aborts_with_row_details() {
        let raw = "id,name,rank,reputation\n1,A,Member,10\n2,B,Member\n";
        match parse(raw, date(), &schema()).expect_err("short row") {
            RosterError::MalformedSnapshot { row, len, .. } => {
                assert_eq!(row.as_deref(), Some("2,B,Member"));
                assert_eq!(len, Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_numeric_primary_counter_is_malformed() {
        let raw = "id,name,rank,reputation\n1,A,Member,lots\n";
        let err = parse(raw, date(), &schema()).expect_err("bad counter");
        assert!(err.to_string().contains("'reputation' is not numeric"));
    }

    #[test]
    fn duplicate_ids_are_malformed() {
        let raw = "id,name,rank,reputation\n1,A,Member,10\n1,B,Member,12\n";
        let err = parse(raw, date(), &schema()).expect_err("duplicate");
        assert!(err.to_string().contains("duplicate member id 1"));
    }

    #[test]
    fn dates_shift_back_six_hours() {
        assert_eq!(
            coerce("2021-02-24", 6),
            FieldValue::Date(NaiveDate::from_ymd_opt(2021, 2, 23).expect("date"))
        );
        assert_eq!(
            coerce("2021-02-24 07:00:00", 6),
            FieldValue::Date(NaiveDate::from_ymd_opt(2021, 2, 24).expect("date"))
        );
        assert_eq!(coerce("12.5", 6), FieldValue::Number(12.5));
        assert_eq!(coerce("DI-XIV", 6), FieldValue::Text("DI-XIV".to_owned()));
        assert_eq!(coerce("inf", 6), FieldValue::Text("inf".to_owned()));
    }

    #[test]
    fn unrepresentable_date_shift_stays_text() {
        assert_eq!(
            coerce("2021-02-24", i64::MAX),
            FieldValue::Text("2021-02-24".to_owned())
        );
        assert_eq!(
            coerce("2021-02-24", 10_000_000_000_000),
            FieldValue::Text("2021-02-24".to_owned())
        );
    }

    #[test]
    fn join_date_columns_land_in_extra() {
        let raw = "id,name,rank,reputation,joined\n5,E,Member,3,2020-06-01\n";
        let snapshot = parse(raw, date(), &schema()).expect("parse");
        assert_eq!(
            snapshot.members[0].extra.get("joined"),
            Some(&FieldValue::Date(
                NaiveDate::from_ymd_opt(2020, 5, 31).expect("date")
            ))
        );
    }
}
