//! Bounded weighted reservoir sampling (A-Res with uniform weights).
//!
//! Every qualifying object draws a uniform key in `[0, 1)`; a bounded
//! min-heap keeps the `capacity` largest keys. Each eligible object
//! therefore survives with equal probability `capacity / eligible`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Payload kept per sampled object.
#[derive(Debug, Clone)]
pub struct ReservoirEntry<T> {
    pub key: f64,
    pub payload: T,
}

impl<T> ReservoirEntry<T> {
    fn new(key: f64, payload: T) -> Self {
        Self { key, payload }
    }
}

// Min-heap ordering on the uniform key; ties resolved by total_cmp so the
// heap order is total even for pathological float keys.
impl<T> PartialEq for ReservoirEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key.total_cmp(&other.key) == Ordering::Equal
    }
}

impl<T> Eq for ReservoirEntry<T> {}

impl<T> PartialOrd for ReservoirEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for ReservoirEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we need the minimum on top.
        other.key.total_cmp(&self.key)
    }
}

/// A single `(category, region)` reservoir bounded at `capacity`.
#[derive(Debug)]
pub struct Reservoir<T> {
    capacity: usize,
    heap: BinaryHeap<ReservoirEntry<T>>,
}

impl<T> Reservoir<T> {
    /// Create a reservoir holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.min(1024)),
        }
    }

    /// Offer an object with its uniform key.
    pub fn offer(&mut self, key: f64, payload: T) {
        if self.heap.len() < self.capacity {
            self.heap.push(ReservoirEntry::new(key, payload));
        } else if self
            .heap
            .peek()
            .is_some_and(|smallest| key > smallest.key)
        {
            self.heap.pop();
            self.heap.push(ReservoirEntry::new(key, payload));
        }
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Report whether nothing has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain the retained payloads; order is unspecified.
    pub fn drain(self) -> Vec<T> {
        self.heap.into_iter().map(|entry| entry.payload).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rstest::rstest;

    #[rstest]
    fn fills_up_to_capacity() {
        let mut reservoir = Reservoir::new(3);
        for i in 0..3 {
            reservoir.offer(0.1 * f64::from(i), i);
        }
        assert_eq!(reservoir.len(), 3);
    }

    #[rstest]
    fn keeps_the_largest_keys() {
        let mut reservoir = Reservoir::new(2);
        reservoir.offer(0.1, "low");
        reservoir.offer(0.9, "high");
        reservoir.offer(0.5, "mid");
        let mut kept = reservoir.drain();
        kept.sort_unstable();
        assert_eq!(kept, vec!["high", "mid"]);
    }

    #[rstest]
    fn smaller_keys_never_displace() {
        let mut reservoir = Reservoir::new(1);
        reservoir.offer(0.8, "keep");
        reservoir.offer(0.2, "drop");
        assert_eq!(reservoir.drain(), vec!["keep"]);
    }

    #[rstest]
    fn never_exceeds_capacity() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut reservoir = Reservoir::new(5);
        for i in 0..1_000 {
            reservoir.offer(rng.gen::<f64>(), i);
        }
        assert_eq!(reservoir.len(), 5);
    }

    /// Over many seeds, each of N eligible objects is selected with
    /// frequency approaching capacity / N.
    #[rstest]
    fn selection_is_approximately_uniform() {
        const ELIGIBLE: usize = 10;
        const CAPACITY: usize = 2;
        const RUNS: usize = 4_000;

        let mut hits = vec![0_u32; ELIGIBLE];
        for seed in 0..RUNS as u64 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut reservoir = Reservoir::new(CAPACITY);
            for object in 0..ELIGIBLE {
                reservoir.offer(rng.gen::<f64>(), object);
            }
            for object in reservoir.drain() {
                hits[object] += 1;
            }
        }

        let expected = RUNS as f64 * CAPACITY as f64 / ELIGIBLE as f64;
        for (object, &count) in hits.iter().enumerate() {
            let deviation = (f64::from(count) - expected).abs() / expected;
            assert!(
                deviation < 0.15,
                "object {object} selected {count} times, expected ~{expected}"
            );
        }
    }
}
