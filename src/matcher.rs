use std::collections::HashMap;

use crate::models::{MemberRecord, Snapshot};

#[derive(Debug, Clone, Copy)]
pub struct MatchedPair<'a> {
    pub prev: &'a MemberRecord,
    pub now: &'a MemberRecord,
}

/// Pairs every `prev` member with the `now` member of the same id, in `prev`
/// order. Members that left (only in `prev`) and members that joined (only in
/// `now`) have no baseline to diff against and are dropped here.
pub fn join<'a>(prev: &'a Snapshot, now: &'a Snapshot) -> Vec<MatchedPair<'a>> {
    let index: HashMap<u64, &MemberRecord> = now.members.iter().map(|m| (m.id, m)).collect();

    prev.members
        .iter()
        .filter_map(|prev| index.get(&prev.id).map(|now| MatchedPair { prev, now }))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    pub(crate) fn member(id: u64, rank: &str, reputation: f64) -> MemberRecord {
        MemberRecord {
            id,
            name: format!("member-{id}"),
            rank: rank.to_owned(),
            division: String::new(),
            counters: BTreeMap::from([("reputation".to_owned(), reputation)]),
            sponsor_tier: None,
            extra: BTreeMap::new(),
        }
    }

    pub(crate) fn snapshot(day: u32, members: Vec<MemberRecord>) -> Snapshot {
        Snapshot {
            date: NaiveDate::from_ymd_opt(2024, 1, day).expect("valid date"),
            members,
        }
    }

    #[test]
    fn join_keeps_prev_order_and_only_shared_ids() {
        let prev = snapshot(
            1,
            vec![
                member(3, "Member", 1.0),
                member(1, "Member", 1.0),
                member(2, "Elite", 1.0),
            ],
        );
        let now = snapshot(
            8,
            vec![
                member(1, "Member", 5.0),
                member(3, "Captain", 2.0),
                member(4, "Member", 9.0),
            ],
        );

        let pairs = join(&prev, &now);
        let ids: Vec<u64> = pairs.iter().map(|p| p.prev.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert!(pairs.iter().all(|p| p.prev.id == p.now.id));
        assert_eq!(pairs[0].now.rank, "Captain");
    }

    #[test]
    fn join_with_empty_side_is_empty() {
        let prev = snapshot(1, vec![member(1, "Member", 1.0)]);
        let now = snapshot(8, Vec::new());
        assert!(join(&prev, &now).is_empty());
        assert!(join(&now, &prev).is_empty());
    }
}
