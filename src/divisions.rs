//! Daily division check: headcount per division and which division leaders
//! dropped below the eligibility headcount after having reached it.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::config::{DivisionConfig, SchemaConfig};
use crate::error::{RosterError, RosterResult};
use crate::models::{DivisionHeadcount, EligibilityLoss, Snapshot};

const ROMAN: [(&str, usize); 13] = [
    ("M", 1000),
    ("CM", 900),
    ("D", 500),
    ("CD", 400),
    ("C", 100),
    ("XC", 90),
    ("L", 50),
    ("XL", 40),
    ("X", 10),
    ("IX", 9),
    ("V", 5),
    ("IV", 4),
    ("I", 1),
];

/// Sort key for a division code such as `DI-XIV`: the Roman numeral after the
/// three-character prefix. Codes with any other suffix sort as 1.
pub fn division_ordinal(code: &str) -> usize {
    let suffix = code.get(3..).unwrap_or_default();
    if !suffix.chars().all(|c| "IXVDLCM".contains(c)) {
        return 1;
    }

    let mut rest = suffix;
    let mut total = 0;
    for (numeral, value) in ROMAN {
        while let Some(stripped) = rest.strip_prefix(numeral) {
            rest = stripped;
            total += value;
        }
    }
    total
}

pub fn division_headcounts(snapshot: &Snapshot) -> Vec<DivisionHeadcount> {
    let mut headcounts: Vec<DivisionHeadcount> = Vec::new();
    for member in snapshot.members.iter().filter(|m| !m.division.is_empty()) {
        match headcounts.iter_mut().find(|h| h.division == member.division) {
            Some(entry) => entry.count += 1,
            None => headcounts.push(DivisionHeadcount {
                division: member.division.clone(),
                count: 1,
            }),
        }
    }
    headcounts.sort_by_key(|h| division_ordinal(&h.division));
    headcounts
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityOutcome {
    /// Previously eligible leaders followed by newly eligible ones.
    pub eligible: Vec<u64>,
    /// Previously eligible leaders whose division is now below the headcount.
    pub lost: Vec<EligibilityLoss>,
}

pub fn check_eligibility(
    snapshot: &Snapshot,
    headcounts: &[DivisionHeadcount],
    previously_eligible: &[u64],
    schema: &SchemaConfig,
    config: &DivisionConfig,
) -> EligibilityOutcome {
    let previous: HashSet<u64> = previously_eligible.iter().copied().collect();
    let mut eligible = previously_eligible.to_vec();
    let mut lost = Vec::new();

    for headcount in headcounts {
        let leader = snapshot.members.iter().find(|m| {
            m.division == headcount.division
                && m.extra_text(&schema.position) == Some(config.leader_position.as_str())
        });
        let Some(leader) = leader else {
            continue;
        };

        if headcount.count >= config.eligibility_headcount {
            if !eligible.contains(&leader.id) {
                eligible.push(leader.id);
            }
        } else if previous.contains(&leader.id) {
            lost.push(EligibilityLoss {
                leader_id: leader.id,
                leader_name: leader.name.clone(),
                division: headcount.division.clone(),
                count: headcount.count,
            });
        }
    }

    EligibilityOutcome { eligible, lost }
}

/// Reads the persisted eligible set, one id per line. A missing file is an
/// empty set.
pub fn load_eligible(path: &Path) -> RosterResult<Vec<u64>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<u64>().map_err(|_| {
                RosterError::Io(std::io::Error::new(
                    ErrorKind::InvalidData,
                    format!("{}: '{line}' is not a member id", path.display()),
                ))
            })
        })
        .collect()
}

pub fn save_eligible(path: &Path, ids: &[u64]) -> RosterResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = ids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, body)?;
    Ok(())
}
