//! Streaming quantiles: an ACM-style rank sketch built from a small
//! unsorted base buffer backed by an exponentially-weighted cascade of
//! fixed-size levels.
//!
//! Compared to the alternative quantile sketch families:
//!
//! - **t-digest / REQ** concentrate accuracy near the tails at the cost of
//!   a more complex, centroid-merging update rule.
//! - **KLL** grows each level's capacity independently and compacts
//!   lazily; this sketch instead keeps every level at a fixed size `K`
//!   and lets a carry-propagation rule (identical in spirit to
//!   incrementing a binary counter) decide which levels get touched on
//!   each base-buffer flush.
//!
//! Both give comparable space for `eps`-accurate rank queries; this
//! module trades a slightly looser constant for a simpler, more uniform
//! merge rule, which is what makes the down-sampling merge a clean
//! bit-shift instead of a per-level capacity recomputation.
//!
//! # Modules
//! - [`bits`]: bit-pattern arithmetic for the occupied-level counter.
//! - [`merge`]: tandem blocky merge and parity sub-sampling primitives.
//! - [`sketch`]: the core [`QuantilesSketch`] update and merge engine.
//! - [`auxiliary`]: lazily-built rank/quantile/PMF/CDF/KS query engine.
//! - [`codec`]: binary wire format and the heapify/wrap/compact trio.
//! - [`memory`]: byte-region-backed updatable variant.
//! - [`union`]: multi-sketch accumulation facade.
//!
//! # Example
//!
//! ```
//! use sketch_oxide::quantiles::QuantilesSketch;
//!
//! let mut s = QuantilesSketch::new(128).unwrap();
//! for i in 1..=10_000 {
//!     s.update(i as f64);
//! }
//! let median = s.quantile(0.5).unwrap();
//! assert!((median - 5000.0).abs() < 200.0);
//! ```

pub mod auxiliary;
pub mod bits;
pub mod codec;
pub mod memory;
pub mod merge;
pub mod sketch;
pub mod union;

pub use auxiliary::{ks_test, Auxiliary, KsResult};
pub use codec::ReadOnlySketch;
pub use memory::{ByteRegion, CallbackRegion, GrowableRegion, MemoryBackedSketch};
pub use sketch::{QuantilesSketch, DEFAULT_K, MAX_K, MIN_K};
pub use union::Union;
