// Synthetic request workload
//
// Keys follow a Zipf-like popularity curve: rank r is drawn with weight
// 1 / (r + 1)^skew, so a handful of fragments take most of the traffic.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// What the backend does when asked to produce a fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Production succeeds
    Succeed,
    /// Production returns an error
    Fail,
    /// Producer dies while holding the update lock
    Crash,
}

/// A single request issued by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub key: String,
    pub outcome: Outcome,
}

/// Samples key ranks from a precomputed cumulative distribution
#[derive(Debug, Clone)]
pub struct ZipfKeys {
    cdf: Vec<f64>,
}

impl ZipfKeys {
    /// Build a sampler over `keys` ranks. A skew of 0 is uniform.
    pub fn new(keys: usize, skew: f64) -> Self {
        let keys = keys.max(1);
        let mut cdf = Vec::with_capacity(keys);
        let mut total = 0.0;
        for rank in 0..keys {
            total += 1.0 / ((rank + 1) as f64).powf(skew.max(0.0));
            cdf.push(total);
        }
        for weight in &mut cdf {
            *weight /= total;
        }
        Self { cdf }
    }

    /// Number of distinct ranks
    pub fn len(&self) -> usize {
        self.cdf.len()
    }

    /// Always false: a sampler has at least one rank
    pub fn is_empty(&self) -> bool {
        self.cdf.is_empty()
    }

    /// Draw a rank in `0..len()`
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let point: f64 = rng.gen();
        self.cdf
            .partition_point(|&cumulative| cumulative < point)
            .min(self.cdf.len() - 1)
    }
}

/// Deterministic per-worker request stream
#[derive(Debug)]
pub struct Workload {
    keys: ZipfKeys,
    failure_rate: f64,
    abandon_rate: f64,
    rng: StdRng,
}

impl Workload {
    /// Create the stream for worker `worker`. Equal seeds give equal streams.
    pub fn new(keys: ZipfKeys, failure_rate: f64, abandon_rate: f64, seed: u64, worker: usize) -> Self {
        Self {
            keys,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            abandon_rate: abandon_rate.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed.wrapping_add(worker as u64)),
        }
    }

    /// Draw the next request
    pub fn next_request(&mut self) -> Request {
        let rank = self.keys.sample(&mut self.rng);
        let roll: f64 = self.rng.gen();
        let outcome = if roll < self.abandon_rate {
            Outcome::Crash
        } else if roll < self.abandon_rate + self.failure_rate {
            Outcome::Fail
        } else {
            Outcome::Succeed
        };
        Request {
            key: format!("fragment-{rank}"),
            outcome,
        }
    }

    /// Access the worker's generator (used for reservoir sampling)
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_when_skew_is_zero() {
        let keys = ZipfKeys::new(4, 0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts = [0usize; 4];
        for _ in 0..40_000 {
            counts[keys.sample(&mut rng)] += 1;
        }
        for count in counts {
            assert!((9_000..11_000).contains(&count), "count {count}");
        }
    }

    #[test]
    fn test_skew_favours_low_ranks() {
        let keys = ZipfKeys::new(100, 1.2);
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts = vec![0usize; 100];
        for _ in 0..50_000 {
            counts[keys.sample(&mut rng)] += 1;
        }
        assert!(counts[0] > counts[1]);
        assert!(counts[1] > counts[50]);
        assert!(counts[0] > 50_000 / 10);
    }

    #[test]
    fn test_single_key() {
        let keys = ZipfKeys::new(0, 1.0);
        assert_eq!(keys.len(), 1);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(keys.sample(&mut rng), 0);
    }

    #[test]
    fn test_same_seed_same_stream() {
        let keys = ZipfKeys::new(50, 1.0);
        let mut a = Workload::new(keys.clone(), 0.1, 0.1, 99, 3);
        let mut b = Workload::new(keys.clone(), 0.1, 0.1, 99, 3);
        let mut c = Workload::new(keys, 0.1, 0.1, 99, 4);
        let first: Vec<_> = (0..100).map(|_| a.next_request()).collect();
        let second: Vec<_> = (0..100).map(|_| b.next_request()).collect();
        let other: Vec<_> = (0..100).map(|_| c.next_request()).collect();
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn test_outcome_rates() {
        let mut always_fail = Workload::new(ZipfKeys::new(10, 1.0), 1.0, 0.0, 1, 0);
        assert!((0..100).all(|_| always_fail.next_request().outcome == Outcome::Fail));

        let mut always_crash = Workload::new(ZipfKeys::new(10, 1.0), 0.0, 1.0, 1, 0);
        assert!((0..100).all(|_| always_crash.next_request().outcome == Outcome::Crash));

        let mut healthy = Workload::new(ZipfKeys::new(10, 1.0), 0.0, 0.0, 1, 0);
        assert!((0..100).all(|_| healthy.next_request().outcome == Outcome::Succeed));
    }
}
