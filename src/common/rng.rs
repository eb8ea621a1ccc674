//! Pluggable deterministic randomness used by carry propagation and sampling
//!
//! Every sketch that makes a random choice (which half of a merged block
//! survives, which reservoir slot a light item displaces) holds its own
//! [`SketchRng`]. A process-wide default exists so that callers who do not
//! care about reproducibility never have to thread a generator through;
//! tests that do care can pin it with [`seed_default`].

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;

/// A seedable, per-sketch random source.
///
/// Wraps `rand`'s `SmallRng` (fast, non-cryptographic, the same choice the
/// sampling algorithms use) behind the handful of operations the quantiles
/// and sampling algorithms actually need: a single fair bit for carry
/// propagation and down-sampling, and a uniform integer draw for reservoir
/// replacement decisions.
#[derive(Clone, Debug)]
pub struct SketchRng {
    inner: SmallRng,
}

impl SketchRng {
    /// Seeds from the OS entropy source. Use this in production code.
    pub fn from_os_rng() -> Self {
        SketchRng {
            inner: SmallRng::from_os_rng(),
        }
    }

    /// Seeds deterministically. Use this in tests that need reproducible
    /// sketches, or when a caller wants cross-sketch determinism by
    /// managing seeds itself.
    pub fn seed_from_u64(seed: u64) -> Self {
        SketchRng {
            inner: SmallRng::seed_from_u64(seed),
        }
    }

    /// Draws a single fair random bit.
    ///
    /// Used by carry propagation to choose the even or odd half of a
    /// tandem-merged block, and by down-sampling merges to choose the
    /// parity at each halving step.
    pub fn next_bit(&mut self) -> bool {
        self.inner.random::<bool>()
    }

    /// Draws a uniform integer in `[0, bound)`.
    ///
    /// `bound` must be non-zero.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        self.inner.random_range(0..bound)
    }

    /// Draws a uniform `f64` in `[0, 1)`.
    pub fn next_unit(&mut self) -> f64 {
        self.inner.random::<f64>()
    }
}

impl Default for SketchRng {
    fn default() -> Self {
        Self::from_os_rng()
    }
}

thread_local! {
    static DEFAULT_RNG: RefCell<SketchRng> = RefCell::new(SketchRng::from_os_rng());
}

/// Re-seeds the process-wide default generator used by sketches created
/// via their `new` constructors, for this thread.
///
/// Intended for tests that want deterministic output without threading a
/// seed through every constructor call.
pub fn seed_default(seed: u64) {
    DEFAULT_RNG.with(|rng| *rng.borrow_mut() = SketchRng::seed_from_u64(seed));
}

/// Draws a fair bit from the thread-local default generator.
pub fn default_next_bit() -> bool {
    DEFAULT_RNG.with(|rng| rng.borrow_mut().next_bit())
}

/// Returns a fresh [`SketchRng`] seeded from the thread-local default
/// generator's state, advancing it in the process.
///
/// Constructors use this so that `Sketch::new(k)` is reproducible within a
/// thread after a call to [`seed_default`], without requiring every call
/// site to pass an explicit seed.
pub fn from_default() -> SketchRng {
    DEFAULT_RNG.with(|rng| {
        let mut guard = rng.borrow_mut();
        let seed = guard.inner.random::<u64>();
        SketchRng::seed_from_u64(seed)
    })
}
