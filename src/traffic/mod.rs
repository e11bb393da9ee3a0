//! Synthetic traffic: payload generation and baud-derived pacing.

pub mod pacing;

pub use pacing::pacing_interval;

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces pseudo-random payload chunks drawn from ASCII letters and digits.
pub struct TrafficGenerator {
    rng: StdRng,
    chunk_len: usize,
}

impl TrafficGenerator {
    pub fn new(chunk_len: usize) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            chunk_len: chunk_len.max(1),
        }
    }

    /// Deterministic generator, for reproducible runs.
    pub fn seeded(chunk_len: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            chunk_len: chunk_len.max(1),
        }
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Next payload chunk.
    pub fn next_chunk(&mut self) -> String {
        (&mut self.rng)
            .sample_iter(Alphanumeric)
            .take(self.chunk_len)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_is_one_symbol() {
        let mut gen = TrafficGenerator::new(1);
        for _ in 0..100 {
            let chunk = gen.next_chunk();
            assert_eq!(chunk.len(), 1);
            assert!(chunk.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_configured_chunk_length() {
        let mut gen = TrafficGenerator::new(16);
        let chunk = gen.next_chunk();
        assert_eq!(chunk.len(), 16);
        assert!(chunk.bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_zero_length_is_clamped() {
        let gen = TrafficGenerator::new(0);
        assert_eq!(gen.chunk_len(), 1);
    }

    #[test]
    fn test_seeded_generators_agree() {
        let mut a = TrafficGenerator::seeded(8, 7);
        let mut b = TrafficGenerator::seeded(8, 7);
        for _ in 0..10 {
            assert_eq!(a.next_chunk(), b.next_chunk());
        }
    }
}
