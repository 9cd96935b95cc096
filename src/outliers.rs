use crate::config::AnalysisConfig;
use crate::models::{DeltaRecord, OutlierEntry};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierPolicy {
    pub threshold_base: f64,
    pub sponsor_multiplier: f64,
}

impl OutlierPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            threshold_base: config.outlier_threshold_base,
            sponsor_multiplier: config.sponsor_multiplier,
        }
    }

    /// Sponsors are expected to be more active, so their bar is raised.
    pub fn threshold_for(&self, record: &DeltaRecord) -> f64 {
        if record.is_sponsor() {
            self.threshold_base * self.sponsor_multiplier
        } else {
            self.threshold_base
        }
    }

    pub fn is_outlier(&self, record: &DeltaRecord) -> bool {
        record.delta > self.threshold_for(record)
    }
}

/// Flags deltas strictly above their threshold, in input order.
pub fn detect(deltas: &[DeltaRecord], policy: &OutlierPolicy) -> Vec<OutlierEntry> {
    deltas
        .iter()
        .filter(|record| policy.is_outlier(record))
        .map(|record| OutlierEntry {
            name: record.name.clone(),
            rank: record.rank.clone(),
            delta: record.delta,
            sponsor_tier: record.sponsor_tier.clone(),
        })
        .collect()
}

/// Outliers as a percentage of matched members; `None` when nothing matched.
pub fn outlier_share(outliers: usize, matched: usize, precision: u32) -> Option<f64> {
    if matched == 0 {
        return None;
    }
    Some(crate::stats::round_to(
        outliers as f64 / matched as f64 * 100.0,
        precision,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, delta: f64, sponsor: Option<&str>) -> DeltaRecord {
        DeltaRecord {
            id: 1,
            name: name.to_owned(),
            rank: "Member".to_owned(),
            delta,
            sponsor_tier: sponsor.map(str::to_owned),
        }
    }

    fn policy() -> OutlierPolicy {
        OutlierPolicy::from_config(&AnalysisConfig::default())
    }

    #[test]
    fn non_sponsor_threshold_is_strict() {
        assert!(policy().is_outlier(&record("a", 501.0, None)));
        assert!(!policy().is_outlier(&record("a", 500.0, None)));
    }

    #[test]
    fn sponsor_threshold_is_multiplied() {
        assert!(policy().is_outlier(&record("a", 2501.0, Some("Gold"))));
        assert!(!policy().is_outlier(&record("a", 2500.0, Some("Gold"))));
        assert!(!policy().is_outlier(&record("a", 2499.0, Some("Gold"))));
        assert!(!policy().is_outlier(&record("a", 501.0, Some("Gold"))));
    }

    #[test]
    fn detect_preserves_input_order() {
        let deltas = vec![
            record("late", 900.0, None),
            record("quiet", 10.0, None),
            record("early", 3000.0, Some("Gold")),
        ];
        let outliers = detect(&deltas, &policy());
        let names: Vec<&str> = outliers.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["late", "early"]);
        assert_eq!(outliers[0].to_string(), "late - Member - 900 - 0x");
        assert_eq!(outliers[1].to_string(), "early - Member - 3000 - Gold");
    }

    #[test]
    fn share_is_rounded_percentage() {
        assert_eq!(outlier_share(1, 3, 3), Some(33.333));
        assert_eq!(outlier_share(0, 0, 3), None);
    }
}
