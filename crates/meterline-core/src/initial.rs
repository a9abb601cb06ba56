//! Helpers for the "exactly one initial" catalog flags.
//!
//! Packages and package-plans both carry an `is_initial` flag. The store
//! re-establishes the invariant on every write; these functions decide which
//! record keeps or receives the flag.

use crate::{PackagePlan, PackagePlanId};

/// Keep `is_initial` on the first item of a batch that requests it and clear
/// it on every later one.
///
/// Returns the index of the item that kept the flag.
pub fn first_initial_wins<T>(
    items: &mut [T],
    flag: impl Fn(&mut T) -> &mut bool,
) -> Option<usize> {
    let mut winner = None;
    for (index, item) in items.iter_mut().enumerate() {
        let is_initial = flag(item);
        if *is_initial {
            if winner.is_some() {
                *is_initial = false;
            } else {
                winner = Some(index);
            }
        }
    }
    winner
}

/// The package-plan that should be promoted to initial, if any.
///
/// Returns `None` when the list is empty or already has an initial plan.
/// Otherwise picks the first active plan by position, or the first plan at
/// all when none is active.
#[must_use]
pub fn promotion_candidate(plans: &[PackagePlan]) -> Option<PackagePlanId> {
    if plans.iter().any(|plan| plan.is_initial) {
        return None;
    }
    let mut ordered: Vec<&PackagePlan> = plans.iter().collect();
    ordered.sort_by_key(|plan| (plan.position, plan.created_at, plan.id));
    ordered
        .iter()
        .find(|plan| plan.is_active)
        .or_else(|| ordered.first())
        .map(|plan| plan.id)
}
