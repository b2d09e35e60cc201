//! Surprise sampling over a ranked candidate list.
//!
//! A batch of size `k` keeps the best `max(1, floor(k * (1 - surprise)))`
//! candidates and fills the rest with random picks from the near-miss tier
//! `sorted[k..3k]`. The top-ranked candidate always leads the batch.

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};

use crate::error::{RecommendError, Result};

/// The near-miss tier extends to `k * SURPRISE_POOL_FACTOR` ranks.
pub const SURPRISE_POOL_FACTOR: usize = 3;

/// Picks a batch from a list sorted by descending score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversitySampler {
    surprise: f64,
}

impl DiversitySampler {
    /// `surprise` must be within `[0, 1]`.
    pub fn new(surprise: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&surprise) {
            return Err(RecommendError::InvalidInput(format!(
                "surprise must be within [0, 1], got {surprise}"
            )));
        }
        Ok(Self { surprise })
    }

    pub fn surprise(&self) -> f64 {
        self.surprise
    }

    /// Split a batch of `k` into `(top, surprise)` slot counts.
    pub fn split(&self, k: usize) -> (usize, usize) {
        if k == 0 {
            return (0, 0);
        }
        let num_top = ((k as f64 * (1.0 - self.surprise)).floor() as usize).clamp(1, k);
        (num_top, k - num_top)
    }

    /// Choose up to `k` items from `sorted`, with `k` capped at its length.
    ///
    /// With surprise 0 this is exactly `sorted[..k]`. Otherwise the top
    /// slots are joined by at most `num_surprise` draws from the near-miss
    /// tier, so a short tier yields a short batch. Everything after the
    /// leader is shuffled.
    pub fn sample<T, R>(&self, sorted: Vec<T>, k: usize, rng: &mut R) -> Vec<T>
    where
        R: Rng + ?Sized,
    {
        let k = k.min(sorted.len());
        if k == 0 {
            return Vec::new();
        }

        let (num_top, num_surprise) = self.split(k);
        let mut picked: Vec<usize> = (0..num_top).collect();

        if num_surprise > 0 && sorted.len() > k {
            let pool_end = sorted.len().min(k * SURPRISE_POOL_FACTOR);
            let pool: Vec<usize> = (k..pool_end).collect();
            let draws = num_surprise.min(pool.len());
            picked.extend(pool.choose_multiple(rng, draws).copied());
        }

        if self.surprise > 0.0 && picked.len() > 2 {
            picked[1..].shuffle(rng);
        }

        let mut slots: Vec<Option<T>> = sorted.into_iter().map(Some).collect();
        picked
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect()
    }
}
