use crate::signals::CoordinatorStatus;
use crate::state::{EnsembleResult, EnsembleVote};

/// Count votes per status in first-encountered order.
pub fn tally(votes: &[EnsembleVote]) -> Vec<(CoordinatorStatus, u32)> {
    let mut counts: Vec<(CoordinatorStatus, u32)> = Vec::new();
    for vote in votes {
        match counts.iter_mut().find(|(status, _)| *status == vote.status) {
            Some((_, n)) => *n += 1,
            None => counts.push((vote.status, 1)),
        }
    }
    counts
}

/// Plurality status, ties going to the entry that appears first in the
/// tally. The selected variant is the first vote that reported it.
///
/// Returns `None` only for an empty vote list.
pub fn select(round: u32, votes: Vec<EnsembleVote>) -> Option<EnsembleResult> {
    let counts = tally(&votes);
    let mut best: Option<(CoordinatorStatus, u32)> = None;
    for &(status, n) in &counts {
        if best.is_none_or(|(_, top)| n > top) {
            best = Some((status, n));
        }
    }
    let (selected_status, _) = best?;
    let selected_variant = votes.iter().find(|v| v.status == selected_status)?.variant;

    Some(EnsembleResult {
        round,
        votes,
        tally: counts,
        selected_status,
        selected_variant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EnsembleVariant;

    fn votes(statuses: [CoordinatorStatus; 3]) -> Vec<EnsembleVote> {
        EnsembleVariant::ORDER
            .into_iter()
            .zip(statuses)
            .map(|(variant, status)| EnsembleVote {
                variant,
                status,
                failed: false,
            })
            .collect()
    }

    #[test]
    fn test_plurality_wins() {
        let result = select(
            1,
            votes([
                CoordinatorStatus::Revise,
                CoordinatorStatus::Pass,
                CoordinatorStatus::Pass,
            ]),
        )
        .unwrap();
        assert_eq!(result.selected_status, CoordinatorStatus::Pass);
        assert_eq!(result.selected_variant, EnsembleVariant::Balanced);
        assert_eq!(
            result.tally,
            vec![(CoordinatorStatus::Revise, 1), (CoordinatorStatus::Pass, 2)]
        );
    }

    #[test]
    fn test_three_way_tie_goes_to_first_variant() {
        let result = select(
            2,
            votes([
                CoordinatorStatus::Fail,
                CoordinatorStatus::Pass,
                CoordinatorStatus::Revise,
            ]),
        )
        .unwrap();
        assert_eq!(result.selected_status, CoordinatorStatus::Fail);
        assert_eq!(result.selected_variant, EnsembleVariant::Strict);
    }

    #[test]
    fn test_unanimous() {
        let result = select(1, votes([CoordinatorStatus::Revise; 3])).unwrap();
        assert_eq!(result.tally, vec![(CoordinatorStatus::Revise, 3)]);
        assert_eq!(result.selected_variant, EnsembleVariant::Strict);
    }

    #[test]
    fn test_empty_votes() {
        assert!(select(1, Vec::new()).is_none());
    }
}
