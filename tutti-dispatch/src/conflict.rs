//! Conflict analysis
//!
//! A musician who appears on the ranked lists of several active needs in the
//! same project is in conflict. Under the smart policy only the need holding
//! the musician's best appearance (lowest rank, ties broken by the more
//! senior position) may contact them; under the simple policy every need may.
//!
//! The analysis is recomputed from scratch for each dispatch pass and never
//! persisted.

use std::collections::HashMap;

use tutti_common::db::ConflictPolicy;
use uuid::Uuid;

use crate::roster::NeedRoster;

/// One place a musician appears within the project's active needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appearance {
    pub need_id: Uuid,
    pub rank: i64,
    pub hierarchy_level: i64,
    pub variant: String,
    /// Position of the need in dispatch order; last-resort tie breaker
    order: usize,
}

impl Appearance {
    fn sort_key(&self) -> (i64, i64, usize) {
        (self.rank, self.hierarchy_level, self.order)
    }
}

/// Result of one analysis
#[derive(Debug, Clone, Default)]
pub struct ConflictResolution {
    policy: ConflictPolicy,
    /// Musicians on more than one need's list, with every appearance
    conflicts: HashMap<Uuid, Vec<Appearance>>,
    /// Need allowed to contact each conflicted musician (smart policy)
    owners: HashMap<Uuid, Uuid>,
}

impl ConflictResolution {
    /// May `need_id` contact `musician_id`?
    pub fn allows(&self, musician_id: Uuid, need_id: Uuid) -> bool {
        match self.policy {
            ConflictPolicy::Simple => true,
            ConflictPolicy::Smart => self
                .owners
                .get(&musician_id)
                .map_or(true, |owner| *owner == need_id),
        }
    }

    /// Appearances of a conflicted musician, best first
    pub fn appearances(&self, musician_id: Uuid) -> Option<&[Appearance]> {
        self.conflicts.get(&musician_id).map(Vec::as_slice)
    }

    pub fn conflicted_musicians(&self) -> usize {
        self.conflicts.len()
    }
}

/// Computes cross-need conflicts for one project
#[derive(Debug, Clone, Copy)]
pub struct ConflictAnalyzer {
    policy: ConflictPolicy,
}

impl ConflictAnalyzer {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Analyze the rosters of the project's active needs
    ///
    /// `rosters` must be in dispatch order. Only appearances the need could
    /// act on (active musician, residence requirement met) are counted.
    pub fn analyze(&self, rosters: &[NeedRoster]) -> ConflictResolution {
        let mut by_musician: HashMap<Uuid, Vec<Appearance>> = HashMap::new();

        for (order, roster) in rosters.iter().enumerate() {
            // An appearance the need can never use must not claim the musician
            for candidate in roster.candidates.iter().filter(|c| c.qualifies_for(&roster.need)) {
                by_musician
                    .entry(candidate.musician_id)
                    .or_default()
                    .push(Appearance {
                        need_id: roster.need.id,
                        rank: candidate.rank,
                        hierarchy_level: roster.hierarchy_level,
                        variant: roster.variant.clone(),
                        order,
                    });
            }
        }

        by_musician.retain(|_, appearances| appearances.len() > 1);

        let mut owners = HashMap::with_capacity(by_musician.len());
        for (musician_id, appearances) in by_musician.iter_mut() {
            appearances.sort_by_key(Appearance::sort_key);
            owners.insert(*musician_id, appearances[0].need_id);
        }

        tracing::debug!(
            policy = %self.policy,
            conflicted = by_musician.len(),
            "Conflict analysis complete"
        );

        ConflictResolution {
            policy: self.policy,
            conflicts: by_musician,
            owners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutti_common::db::{Need, NeedStatus, RankedCandidate, Strategy};

    fn roster(hierarchy_level: i64, entries: &[(Uuid, i64)]) -> NeedRoster {
        NeedRoster {
            need: Need {
                id: Uuid::new_v4(),
                project_id: Uuid::nil(),
                position_id: Uuid::new_v4(),
                list_id: Uuid::new_v4(),
                quantity: 1,
                strategy: Strategy::Sequential,
                response_time_hours: 24,
                requires_local: false,
                status: NeedStatus::Active,
                created_at: chrono::Utc::now(),
            },
            hierarchy_level,
            display_order: hierarchy_level,
            variant: "A".to_string(),
            candidates: entries
                .iter()
                .map(|(musician_id, rank)| RankedCandidate {
                    musician_id: *musician_id,
                    rank: *rank,
                    active: true,
                    local_resident: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_smart_policy_keeps_best_rank() {
        let m1 = Uuid::new_v4();
        let need_a = roster(1, &[(m1, 1)]);
        let need_b = roster(2, &[(Uuid::new_v4(), 1), (Uuid::new_v4(), 2), (m1, 3)]);

        let resolution =
            ConflictAnalyzer::new(ConflictPolicy::Smart).analyze(&[need_a.clone(), need_b.clone()]);

        assert!(resolution.allows(m1, need_a.need.id));
        assert!(!resolution.allows(m1, need_b.need.id));
        assert_eq!(resolution.conflicted_musicians(), 1);
    }

    #[test]
    fn test_smart_policy_tie_goes_to_senior_position() {
        let m1 = Uuid::new_v4();
        let junior = roster(3, &[(m1, 2)]);
        let senior = roster(1, &[(m1, 2)]);

        let resolution =
            ConflictAnalyzer::new(ConflictPolicy::Smart).analyze(&[junior.clone(), senior.clone()]);

        assert!(resolution.allows(m1, senior.need.id));
        assert!(!resolution.allows(m1, junior.need.id));

        let appearances = resolution.appearances(m1).unwrap();
        assert_eq!(appearances[0].need_id, senior.need.id);
    }

    #[test]
    fn test_simple_policy_allows_everyone() {
        let m1 = Uuid::new_v4();
        let need_a = roster(1, &[(m1, 1)]);
        let need_b = roster(2, &[(m1, 3)]);

        let resolution =
            ConflictAnalyzer::new(ConflictPolicy::Simple).analyze(&[need_a.clone(), need_b.clone()]);

        assert!(resolution.allows(m1, need_a.need.id));
        assert!(resolution.allows(m1, need_b.need.id));
        // Conflicts are still reported
        assert_eq!(resolution.conflicted_musicians(), 1);
    }

    #[test]
    fn test_unconflicted_musicians_are_always_allowed() {
        let m1 = Uuid::new_v4();
        let need_a = roster(1, &[(m1, 1)]);

        let resolution = ConflictAnalyzer::new(ConflictPolicy::Smart).analyze(&[need_a.clone()]);

        assert!(resolution.allows(m1, need_a.need.id));
        assert!(resolution.appearances(m1).is_none());
    }

    #[test]
    fn test_unusable_appearance_does_not_claim_musician() {
        let m1 = Uuid::new_v4();
        // Best rank is on a local-only need, but the musician lives elsewhere
        let mut local_only = roster(1, &[(m1, 1)]);
        local_only.need.requires_local = true;
        let open = roster(2, &[(Uuid::new_v4(), 1), (m1, 2)]);

        let resolution = ConflictAnalyzer::new(ConflictPolicy::Smart)
            .analyze(&[local_only.clone(), open.clone()]);

        assert!(resolution.allows(m1, open.need.id));
        assert!(resolution.appearances(m1).is_none());
    }

    #[test]
    fn test_inactive_appearances_are_ignored() {
        let m1 = Uuid::new_v4();
        let mut need_a = roster(1, &[(m1, 1)]);
        need_a.candidates[0].active = false;
        let need_b = roster(2, &[(m1, 1)]);

        let resolution =
            ConflictAnalyzer::new(ConflictPolicy::Smart).analyze(&[need_a, need_b]);

        assert_eq!(resolution.conflicted_musicians(), 0);
    }
}
