use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Source of randomness for one virtual user.
///
/// Each virtual user owns its own generator so nothing is shared between threads. With a run seed
/// the generator for a given scenario and virtual user index is always the same.
#[derive(Debug)]
pub struct Randomizer {
    rng: StdRng,
}

impl Randomizer {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn for_vu(run_seed: Option<u64>, scenario: &str, index: usize) -> Self {
        match run_seed {
            Some(seed) => Self::seeded(mix_seed(seed, scenario, index)),
            None => Self::from_entropy(),
        }
    }

    /// A uniformly random permutation of `items`. The input is left untouched.
    pub fn shuffled<T: Clone>(&mut self, items: &[T]) -> Vec<T> {
        let mut copy = items.to_vec();
        copy.shuffle(&mut self.rng);
        copy
    }

    /// Uniformly random duration in `[min, max]`.
    pub fn duration_between(&mut self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let nanos = self.rng.gen_range(duration_nanos(min)..=duration_nanos(max));
        Duration::from_nanos(nanos)
    }

    pub fn duration_up_to(&mut self, max: Duration) -> Duration {
        self.duration_between(Duration::ZERO, max)
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

// FNV-1a over the scenario name, folded with the run seed and index.
fn mix_seed(seed: u64, scenario: &str, index: usize) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = scenario
        .bytes()
        .chain((index as u64).to_le_bytes())
        .fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        });

    seed ^ hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shuffle_does_not_mutate_source() {
        let mut randomizer = Randomizer::seeded(7);
        let source = vec![1, 2, 3, 4, 5];

        let mut shuffled = randomizer.shuffled(&source);

        assert_eq!(vec![1, 2, 3, 4, 5], source);
        shuffled.sort();
        assert_eq!(source, shuffled);
    }

    #[test]
    fn seeded_is_deterministic() {
        let items = (0..20).collect::<Vec<_>>();

        let a = Randomizer::for_vu(Some(42), "steady_load", 3).shuffled(&items);
        let b = Randomizer::for_vu(Some(42), "steady_load", 3).shuffled(&items);
        let other_vu = Randomizer::for_vu(Some(42), "steady_load", 4).shuffled(&items);

        assert_eq!(a, b);
        assert_ne!(a, other_vu);
    }

    #[test]
    fn positional_uniformity() {
        const K: usize = 5;
        const TRIALS: usize = 10_000;

        let mut randomizer = Randomizer::seeded(0x5eed);
        let items = (0..K).collect::<Vec<_>>();

        // counts[element][position]
        let mut counts = [[0usize; K]; K];
        for _ in 0..TRIALS {
            for (position, element) in randomizer.shuffled(&items).into_iter().enumerate() {
                counts[element][position] += 1;
            }
        }

        let expected = TRIALS as f64 / K as f64;
        for (element, row) in counts.iter().enumerate() {
            let chi_square = row
                .iter()
                .map(|&observed| {
                    let diff = observed as f64 - expected;
                    diff * diff / expected
                })
                .sum::<f64>();

            // 4 degrees of freedom, the 99.9% critical value is 18.47
            assert!(
                chi_square < 30.0,
                "element {element} has chi-square {chi_square} over positions {row:?}"
            );
        }
    }

    #[test]
    fn durations_stay_in_bounds() {
        let mut randomizer = Randomizer::seeded(1);
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(300);

        for _ in 0..1000 {
            let d = randomizer.duration_between(min, max);
            assert!(d >= min && d <= max, "{d:?} out of bounds");
        }

        assert_eq!(min, randomizer.duration_between(min, min));
        assert_eq!(Duration::ZERO, randomizer.duration_up_to(Duration::ZERO));
    }
}
