use crate::models::job::{JobStatus, UnitStatus};

/// Folds unit statuses into a job status.
///
/// - every unit `completed` → `completed`
/// - every unit `failed`    → `failed`
/// - a mix of the two       → `partial`
///
/// Returns `None` when there are no units or any unit is not yet terminal;
/// the job status must not be written in that case. Pure and order-independent.
pub fn aggregate_job_status<I>(statuses: I) -> Option<JobStatus>
where
    I: IntoIterator<Item = UnitStatus>,
{
    let mut any_completed = false;
    let mut any_failed = false;

    for status in statuses {
        match status {
            UnitStatus::Completed => any_completed = true,
            UnitStatus::Failed => any_failed = true,
            UnitStatus::Pending | UnitStatus::Running => return None,
        }
    }

    match (any_completed, any_failed) {
        (false, false) => None,
        (true, false) => Some(JobStatus::Completed),
        (false, true) => Some(JobStatus::Failed),
        (true, true) => Some(JobStatus::Partial),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// All 2^n completed/failed combinations of length n.
    fn combinations(n: usize) -> Vec<Vec<UnitStatus>> {
        (0..1u32 << n)
            .map(|mask| {
                (0..n)
                    .map(|bit| {
                        if mask & (1 << bit) != 0 {
                            UnitStatus::Completed
                        } else {
                            UnitStatus::Failed
                        }
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_exhaustive_small_unit_sets() {
        for n in 1..=6 {
            for statuses in combinations(n) {
                let all_completed = statuses.iter().all(|s| *s == UnitStatus::Completed);
                let all_failed = statuses.iter().all(|s| *s == UnitStatus::Failed);
                let expected = if all_completed {
                    JobStatus::Completed
                } else if all_failed {
                    JobStatus::Failed
                } else {
                    JobStatus::Partial
                };

                assert_eq!(
                    aggregate_job_status(statuses.iter().copied()),
                    Some(expected),
                    "{statuses:?}"
                );
            }
        }
    }

    #[test]
    fn test_is_idempotent_and_order_independent() {
        for statuses in combinations(4) {
            let first = aggregate_job_status(statuses.iter().copied());
            let second = aggregate_job_status(statuses.iter().copied());
            let reversed = aggregate_job_status(statuses.iter().rev().copied());
            assert_eq!(first, second);
            assert_eq!(first, reversed);
        }
    }

    #[test]
    fn test_empty_set_has_no_status() {
        assert_eq!(aggregate_job_status(Vec::new()), None);
    }

    #[test]
    fn test_non_terminal_unit_blocks_aggregation() {
        assert_eq!(
            aggregate_job_status([UnitStatus::Completed, UnitStatus::Running]),
            None
        );
        assert_eq!(
            aggregate_job_status([UnitStatus::Pending, UnitStatus::Failed]),
            None
        );
    }
}
