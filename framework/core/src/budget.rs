use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed number of iterations shared between every virtual user of a scenario.
///
/// Virtual users claim one unit before starting each iteration. The decrement is a compare and swap
/// so the number of successful claims is exactly the initial budget, no matter how many threads
/// are claiming at once.
#[derive(Debug)]
pub struct IterationBudget {
    total: u64,
    remaining: AtomicU64,
}

impl IterationBudget {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            remaining: AtomicU64::new(total),
        }
    }

    /// Claim a single iteration. Returns false once the budget is exhausted.
    pub fn try_claim(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn claimed(&self) -> u64 {
        self.total - self.remaining()
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn empty_budget_never_grants() {
        let budget = IterationBudget::new(0);
        assert!(!budget.try_claim());
        assert_eq!(0, budget.claimed());
    }

    #[test]
    fn concurrent_claims_are_exact() {
        let budget = Arc::new(IterationBudget::new(10_000));
        let granted = Arc::new(AtomicUsize::new(0));

        let handles = (0..16)
            .map(|_| {
                let budget = budget.clone();
                let granted = granted.clone();
                std::thread::spawn(move || {
                    while budget.try_claim() {
                        granted.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(10_000, granted.load(Ordering::Relaxed));
        assert_eq!(0, budget.remaining());
        assert_eq!(10_000, budget.claimed());
        assert!(!budget.try_claim());
    }
}
