//! Reservoir sampling: uniform random sampling from streams
//!
//! Implementation of Algorithm R (Vitter 1985), the standard algorithm for
//! maintaining a uniform random sample of `k` items from a stream of
//! unknown length, with a configurable geometric backing-array growth
//! policy and a hard cap on lifetime stream length.

use crate::common::validation::validate_sample_size;
use crate::common::{Result, SketchError, SketchRng};
use crate::sampling::resize::ResizeFactor;

/// Bound on the estimated total weight of a predicate-matching subset,
/// returned by [`ReservoirSampling::estimate_subset_sum`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubsetSumEstimate {
    /// Point estimate of the subset's total weight.
    pub estimate: f64,
    /// Lower bound of the estimate's uncertainty interval.
    pub lower_bound: f64,
    /// Upper bound of the estimate's uncertainty interval.
    pub upper_bound: f64,
}

/// Uniform `k`-of-`n` reservoir sample over a stream of items of type `T`.
#[derive(Debug, Clone)]
pub struct ReservoirSampling<T: Clone> {
    k: usize,
    resize_factor: ResizeFactor,
    reservoir: Vec<T>,
    n: u64,
    rng: SketchRng,
}

impl<T: Clone> ReservoirSampling<T> {
    /// Hard cap on the number of observations a reservoir can process.
    /// Beyond this, [`Self::update`] returns `SketchError::InvalidState`
    /// rather than silently degrading the sample's uniformity guarantee.
    pub const MAX_N: u64 = (1 << 48) - 1;

    const INITIAL_CAPACITY: usize = 8;

    /// Creates a reservoir of target size `k`, growing its backing array
    /// eightfold at a time, seeded from the process-wide default
    /// generator.
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` if `k == 0`.
    pub fn new(k: usize) -> Result<Self> {
        Self::with_resize_factor(k, ResizeFactor::X8)
    }

    /// Like [`Self::new`], with an explicit growth policy.
    pub fn with_resize_factor(k: usize, resize_factor: ResizeFactor) -> Result<Self> {
        validate_sample_size(k)?;
        Ok(ReservoirSampling {
            k,
            resize_factor,
            reservoir: Vec::with_capacity(Self::INITIAL_CAPACITY.min(k)),
            n: 0,
            rng: SketchRng::from_default(),
        })
    }

    /// Like [`Self::new`], with an explicit seed for reproducible tests.
    pub fn with_seed(k: usize, seed: u64) -> Result<Self> {
        Self::with_seed_and_resize_factor(k, seed, ResizeFactor::X8)
    }

    /// Like [`Self::with_resize_factor`], with an explicit seed.
    pub fn with_seed_and_resize_factor(
        k: usize,
        seed: u64,
        resize_factor: ResizeFactor,
    ) -> Result<Self> {
        validate_sample_size(k)?;
        Ok(ReservoirSampling {
            k,
            resize_factor,
            reservoir: Vec::with_capacity(Self::INITIAL_CAPACITY.min(k)),
            n: 0,
            rng: SketchRng::seed_from_u64(seed),
        })
    }

    /// Target sample size.
    pub fn capacity(&self) -> usize {
        self.k
    }

    /// Number of items currently retained (`< k` until the stream fills
    /// the reservoir, `== k` afterwards).
    pub fn len(&self) -> usize {
        self.reservoir.len()
    }

    /// `true` if no items have been retained yet.
    pub fn is_empty(&self) -> bool {
        self.reservoir.is_empty()
    }

    /// Total number of observations folded in so far.
    pub fn count(&self) -> u64 {
        self.n
    }

    /// The currently retained sample.
    pub fn sample(&self) -> &[T] {
        &self.reservoir
    }

    /// Consumes the reservoir, returning the retained sample.
    pub fn into_sample(self) -> Vec<T> {
        self.reservoir
    }

    fn grow_if_needed(&mut self) {
        if self.reservoir.capacity() <= self.reservoir.len() && self.reservoir.len() < self.k {
            let grown = (self.reservoir.capacity().max(1) * self.resize_factor.factor())
                .clamp(Self::INITIAL_CAPACITY, self.k);
            let additional = grown.saturating_sub(self.reservoir.capacity());
            if additional > 0 {
                self.reservoir.reserve(additional);
            }
        }
    }

    /// Feeds one observation through Algorithm R.
    ///
    /// # Errors
    /// Returns `SketchError::InvalidState` once the reservoir has
    /// processed [`Self::MAX_N`] observations.
    pub fn update(&mut self, item: T) -> Result<()> {
        if self.n >= Self::MAX_N {
            return Err(SketchError::InvalidState {
                reason: format!(
                    "reservoir has already processed the maximum of {} observations",
                    Self::MAX_N
                ),
            });
        }
        self.n += 1;
        if self.reservoir.len() < self.k {
            self.grow_if_needed();
            self.reservoir.push(item);
        } else {
            let j = self.rng.next_below(self.n);
            if j < self.k as u64 {
                self.reservoir[j as usize] = item;
            }
        }
        Ok(())
    }

    /// Probability that any single observed item currently appears in the
    /// sample.
    pub fn inclusion_probability(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        (self.k as f64 / self.n as f64).min(1.0)
    }

    /// Observations each retained item stands for: `1` while every observed
    /// item is still retained (`n <= k`), otherwise `n / len` (the inverse
    /// of [`Self::inclusion_probability`]).
    fn per_item_weight(&self) -> f64 {
        if self.n as usize <= self.k {
            1.0
        } else {
            self.n as f64 / self.reservoir.len() as f64
        }
    }

    /// Estimates the total weight of the subset of the *original stream*
    /// matching `predicate`, using the fraction of the current sample that
    /// matches as an unbiased estimator scaled by the inclusion
    /// probability's inverse.
    pub fn estimate_subset_sum<F>(&self, predicate: F) -> SubsetSumEstimate
    where
        F: Fn(&T) -> bool,
    {
        if self.n == 0 {
            return SubsetSumEstimate {
                estimate: 0.0,
                lower_bound: 0.0,
                upper_bound: 0.0,
            };
        }
        let matching = self.reservoir.iter().filter(|item| predicate(item)).count() as f64;
        let weight = self.per_item_weight();
        let estimate = matching * weight;
        let half_width = if self.n as usize <= self.k {
            0.0
        } else {
            matching.sqrt() * weight
        };
        SubsetSumEstimate {
            estimate,
            lower_bound: (estimate - half_width).max(0.0),
            upper_bound: estimate + half_width,
        }
    }

    /// Merges `other` into `self` via a weighted reshuffle: every retained
    /// item from both reservoirs competes for the combined sample with
    /// probability proportional to the number of original observations it
    /// stands in for (`n / len`, the inverse of its source reservoir's
    /// inclusion probability) — a retained item from a longer stream
    /// represents more original observations and must dominate the merge
    /// accordingly, not be crowded out by a shorter stream's items.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        let mut combined: Vec<(T, f64)> = Vec::with_capacity(self.reservoir.len() + other.reservoir.len());
        combined.extend(
            self.reservoir
                .iter()
                .cloned()
                .map(|item| (item, self.per_item_weight())),
        );
        combined.extend(
            other
                .reservoir
                .iter()
                .cloned()
                .map(|item| (item, other.per_item_weight())),
        );

        // Weighted partial Fisher-Yates: each position draws from the
        // remaining pool with probability proportional to weight.
        let mut pool = combined;
        let mut result = Vec::with_capacity(self.k);
        while result.len() < self.k && !pool.is_empty() {
            let total: f64 = pool.iter().map(|(_, w)| w).sum();
            let pick = if total <= 0.0 {
                self.rng.next_below(pool.len() as u64) as usize
            } else {
                let mut target = self.rng.next_unit() * total;
                let mut idx = pool.len() - 1;
                for (i, (_, w)) in pool.iter().enumerate() {
                    if target < *w {
                        idx = i;
                        break;
                    }
                    target -= w;
                }
                idx
            };
            let (item, _) = pool.swap_remove(pick);
            result.push(item);
        }

        self.n += other.n;
        self.reservoir = result;
        Ok(())
    }

    /// Clears all retained items and the observation count, keeping `k`
    /// and the growth policy.
    pub fn clear(&mut self) {
        self.reservoir.clear();
        self.n = 0;
    }
}
