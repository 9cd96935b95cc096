use std::collections::HashSet;

use crate::config::AnalysisConfig;
use crate::error::{RosterError, RosterResult};
use crate::matcher::MatchedPair;
use crate::models::{Cohort, DeltaRecord};

/// Signed change of `counter` for every matched pair. Rank, name and sponsor
/// status come from the newer record. Negative deltas are kept as-is.
pub fn compute_deltas(
    pairs: &[MatchedPair<'_>],
    counter: &str,
) -> RosterResult<Vec<DeltaRecord>> {
    pairs
        .iter()
        .map(|pair| {
            let now = pair.now.counter(counter);
            let prev = pair.prev.counter(counter);
            match (now, prev) {
                (Some(now), Some(prev)) => Ok(DeltaRecord {
                    id: pair.now.id,
                    name: pair.now.name.clone(),
                    rank: pair.now.rank.clone(),
                    delta: now - prev,
                    sponsor_tier: pair.now.sponsor_tier.clone(),
                }),
                _ => Err(RosterError::malformed(format!(
                    "member {} has no '{counter}' counter",
                    pair.now.id
                ))),
            }
        })
        .collect()
}

/// Closed rank sets deciding cohort membership. Cohorts overlap: a sponsor
/// officer counts toward both.
#[derive(Debug, Clone, Default)]
pub struct CohortRules {
    member_ranks: HashSet<String>,
    officer_ranks: HashSet<String>,
}

impl CohortRules {
    pub fn new(member_ranks: &[String], officer_ranks: &[String]) -> Self {
        Self {
            member_ranks: member_ranks.iter().cloned().collect(),
            officer_ranks: officer_ranks.iter().cloned().collect(),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(&config.member_ranks, &config.officer_ranks)
    }

    pub fn cohorts_of(&self, record: &DeltaRecord) -> Vec<Cohort> {
        let mut cohorts = Vec::new();
        if self.member_ranks.contains(&record.rank) {
            cohorts.push(Cohort::Members);
        }
        if self.officer_ranks.contains(&record.rank) {
            cohorts.push(Cohort::Officers);
        }
        if record.is_sponsor() {
            cohorts.push(Cohort::Sponsors);
        }
        cohorts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::join;
    use crate::matcher::tests::{member, snapshot};

    fn rules() -> CohortRules {
        CohortRules::from_config(&AnalysisConfig::default())
    }

    #[test]
    fn delta_is_now_minus_prev() {
        let prev = snapshot(1, vec![member(7, "Member", 100.0)]);
        let now = snapshot(8, vec![member(7, "Member", 140.0)]);

        let deltas = compute_deltas(&join(&prev, &now), "reputation").expect("deltas");
        assert_eq!(
            deltas,
            vec![DeltaRecord {
                id: 7,
                name: "member-7".to_owned(),
                rank: "Member".to_owned(),
                delta: 40.0,
                sponsor_tier: None,
            }]
        );
        assert!(!deltas[0].is_sponsor());
        assert_eq!(rules().cohorts_of(&deltas[0]), vec![Cohort::Members]);
    }

    #[test]
    fn negative_deltas_are_not_clamped() {
        let prev = snapshot(1, vec![member(1, "Elite", 300.0)]);
        let now = snapshot(8, vec![member(1, "Elite", 120.0)]);
        let deltas = compute_deltas(&join(&prev, &now), "reputation").expect("deltas");
        assert_eq!(deltas[0].delta, -180.0);
    }

    #[test]
    fn rank_and_sponsor_come_from_newer_record() {
        let prev = snapshot(1, vec![member(2, "Member", 10.0)]);
        let mut promoted = member(2, "L4", 50.0);
        promoted.sponsor_tier = Some("Silver".to_owned());
        let now = snapshot(8, vec![promoted]);

        let deltas = compute_deltas(&join(&prev, &now), "reputation").expect("deltas");
        assert_eq!(deltas[0].rank, "L4");
        assert!(deltas[0].is_sponsor());
        assert_eq!(
            rules().cohorts_of(&deltas[0]),
            vec![Cohort::Officers, Cohort::Sponsors]
        );
    }

    #[test]
    fn unknown_counter_is_an_error() {
        let prev = snapshot(1, vec![member(1, "Member", 1.0)]);
        let now = snapshot(8, vec![member(1, "Member", 2.0)]);
        assert!(compute_deltas(&join(&prev, &now), "recruits").is_err());
    }

    #[test]
    fn ranks_outside_both_sets_have_no_rank_cohort() {
        let record = DeltaRecord {
            id: 1,
            name: "x".to_owned(),
            rank: "Probation".to_owned(),
            delta: 1.0,
            sponsor_tier: None,
        };
        assert!(rules().cohorts_of(&record).is_empty());
    }
}
