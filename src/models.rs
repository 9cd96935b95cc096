use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

/// A coerced cell value. Numeric-looking cells become numbers, date-looking
/// cells become calendar dates, everything else stays text.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberRecord {
    pub id: u64,
    pub name: String,
    pub rank: String,
    pub division: String,
    pub counters: BTreeMap<String, f64>,
    pub sponsor_tier: Option<String>,
    /// Remaining columns not covered by the canonical fields.
    pub extra: BTreeMap<String, FieldValue>,
}

impl MemberRecord {
    pub fn counter(&self, name: &str) -> Option<f64> {
        self.counters.get(name).copied()
    }

    pub fn extra_text(&self, column: &str) -> Option<&str> {
        self.extra.get(column).and_then(FieldValue::as_text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub members: Vec<MemberRecord>,
}

impl Snapshot {
    /// Distinct ranks in this snapshot, sorted.
    pub fn rank_vocabulary(&self) -> Vec<String> {
        let mut ranks: Vec<String> = self.members.iter().map(|m| m.rank.clone()).collect();
        ranks.sort();
        ranks.dedup();
        ranks
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaRecord {
    pub id: u64,
    pub name: String,
    pub rank: String,
    pub delta: f64,
    pub sponsor_tier: Option<String>,
}

impl DeltaRecord {
    pub fn is_sponsor(&self) -> bool {
        self.sponsor_tier.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Cohort {
    Members,
    Officers,
    Sponsors,
}

impl Cohort {
    pub const ALL: [Cohort; 3] = [Cohort::Members, Cohort::Officers, Cohort::Sponsors];

    pub fn label(self) -> &'static str {
        match self {
            Cohort::Members => "Members",
            Cohort::Officers => "Officers",
            Cohort::Sponsors => "Vanguards",
        }
    }
}

/// Count, mean and median of a group of deltas. Empty groups carry `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

pub type RankStatistics = Summary;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSummary {
    pub net: f64,
    pub overall: Summary,
    pub by_rank: BTreeMap<String, RankStatistics>,
    pub by_cohort: BTreeMap<Cohort, Summary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierEntry {
    pub name: String,
    pub rank: String,
    pub delta: f64,
    pub sponsor_tier: Option<String>,
}

impl std::fmt::Display for OutlierEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {} - {} - {}",
            self.name,
            self.rank,
            self.delta,
            self.sponsor_tier.as_deref().unwrap_or("0x")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivisionHeadcount {
    pub division: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityLoss {
    pub leader_id: u64,
    pub leader_name: String,
    pub division: String,
    pub count: usize,
}

/// Per-house figures for one snapshot. Means are `None` for an empty group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HouseStatistics {
    pub house: String,
    pub members: usize,
    pub hosts: usize,
    pub reputation: Option<f64>,
    pub recruits: f64,
    pub events_attended: Option<f64>,
    /// Averaged over hosts only.
    pub events_hosted: Option<f64>,
    pub discord_hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseDivisionCount {
    pub date: NaiveDate,
    /// Active division count per configured house, in configured order.
    pub counts: Vec<usize>,
}
