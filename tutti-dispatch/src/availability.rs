//! Availability filter
//!
//! Narrows a need's ranked list to the musicians who may be contacted now.

use std::collections::{BTreeSet, HashSet};

use tutti_common::db::{Need, RankedCandidate};
use uuid::Uuid;

use crate::conflict::ConflictResolution;

/// Musicians selected earlier in the current dispatch pass
///
/// Immutable: `with` returns the extended set, so each need's step receives
/// the claims of the needs dispatched before it and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimedSet(BTreeSet<Uuid>);

impl ClaimedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, musician_id: &Uuid) -> bool {
        self.0.contains(musician_id)
    }

    /// A copy of this set extended with `musicians`
    pub fn with<'a>(&self, musicians: impl IntoIterator<Item = &'a Uuid>) -> Self {
        let mut next = self.0.clone();
        next.extend(musicians.into_iter().copied());
        Self(next)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Eligibility rules for one dispatch step
pub struct AvailabilityFilter<'a> {
    /// Musicians with any request in the project, re-read inside the step
    engaged: &'a HashSet<Uuid>,
    conflicts: &'a ConflictResolution,
}

impl<'a> AvailabilityFilter<'a> {
    pub fn new(engaged: &'a HashSet<Uuid>, conflicts: &'a ConflictResolution) -> Self {
        Self { engaged, conflicts }
    }

    /// Rank-ordered musicians of `candidates` eligible for `need`
    ///
    /// A musician is eligible when they are active, meet the local-residence
    /// requirement, have never been contacted in this project, were not
    /// claimed earlier in this pass, and the conflict policy lets this need
    /// reach them.
    pub fn eligible(
        &self,
        need: &Need,
        candidates: &[RankedCandidate],
        claimed: &ClaimedSet,
    ) -> Vec<Uuid> {
        let mut ordered: Vec<&RankedCandidate> = candidates.iter().collect();
        ordered.sort_by_key(|c| c.rank);

        ordered
            .into_iter()
            .filter(|c| c.qualifies_for(need))
            .filter(|c| !self.engaged.contains(&c.musician_id))
            .filter(|c| !claimed.contains(&c.musician_id))
            .filter(|c| self.conflicts.allows(c.musician_id, need.id))
            .map(|c| c.musician_id)
            .collect()
    }
}
