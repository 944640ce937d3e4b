//! Strategy dispatcher
//!
//! Pure selection math: given a need's strategy, its quantity, the current
//! accepted/pending counts and the rank-ordered eligible musicians, decide
//! which musicians receive a request in this pass. The result is always a
//! prefix of the eligible list.

use tutti_common::db::Strategy;
use uuid::Uuid;

/// Request counts for one need at the moment of dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeedCounts {
    pub accepted: i64,
    pub pending: i64,
}

impl NeedCounts {
    /// Positions still unfilled
    pub fn remaining(&self, quantity: i64) -> i64 {
        (quantity - self.accepted).max(0)
    }
}

fn as_slots(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

/// Number of new requests the strategy allows right now
pub fn allowance(strategy: &Strategy, quantity: i64, counts: NeedCounts, eligible: usize) -> usize {
    if counts.remaining(quantity) == 0 {
        return 0;
    }

    let slots = match strategy {
        Strategy::Sequential => {
            if counts.pending == 0 {
                1
            } else {
                0
            }
        }
        Strategy::Parallel => as_slots(counts.remaining(quantity) - counts.pending),
        // One batch at a time; the next batch waits for every pending reply
        Strategy::FirstCome { max_recipients } => {
            if counts.pending > 0 {
                0
            } else {
                max_recipients.map_or(eligible, as_slots)
            }
        }
    };

    slots.min(eligible)
}

/// Select the recipients for this pass (a rank-order prefix of `eligible`)
pub fn select_recipients(
    strategy: &Strategy,
    quantity: i64,
    counts: NeedCounts,
    eligible: &[Uuid],
) -> Vec<Uuid> {
    let take = allowance(strategy, quantity, counts, eligible.len());
    eligible[..take].to_vec()
}

/// Check a selection against the strategy's concurrency rules
///
/// Returns a description of the broken rule, if any.
pub fn verify_selection(
    strategy: &Strategy,
    quantity: i64,
    counts: NeedCounts,
    selected: &[Uuid],
) -> Result<(), String> {
    let chosen = selected.len() as i64;
    if chosen == 0 {
        return Ok(());
    }

    if counts.accepted >= quantity {
        return Err(format!(
            "{} recipients selected for a need already holding {} of {} acceptances",
            chosen, counts.accepted, quantity
        ));
    }

    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = selected.iter().find(|id| !seen.insert(**id)) {
        return Err(format!("musician {} selected twice", dup));
    }

    match strategy {
        Strategy::Sequential => {
            if counts.pending + chosen > 1 {
                return Err(format!(
                    "sequential need would hold {} open requests",
                    counts.pending + chosen
                ));
            }
        }
        Strategy::Parallel => {
            if counts.accepted + counts.pending + chosen > quantity {
                return Err(format!(
                    "parallel need would hold {} accepted + {} pending for quantity {}",
                    counts.accepted,
                    counts.pending + chosen,
                    quantity
                ));
            }
        }
        Strategy::FirstCome { max_recipients } => {
            if counts.pending > 0 {
                return Err(format!(
                    "first_come batch of {} sent while {} requests still pending",
                    chosen, counts.pending
                ));
            }
            if let Some(cap) = max_recipients {
                if chosen > *cap {
                    return Err(format!("first_come batch of {} exceeds cap {}", chosen, cap));
                }
            }
        }
    }

    Ok(())
}
