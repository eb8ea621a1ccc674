//! sketch_oxide: streaming quantiles and weighted-sampling summaries
//!
//! Two mergeable summary families over an unbounded stream of
//! observations:
//!
//! - [`quantiles`]: an Agarwal-Cormode-Mishra-style rank sketch
//!   ([`quantiles::QuantilesSketch`]) supporting rank, quantile, PMF, CDF,
//!   and Kolmogorov-Smirnov queries with a deterministic size bound.
//! - [`sampling`]: uniform ([`sampling::ReservoirSampling`]) and weighted
//!   ([`sampling::VarOptSampling`]) sampling over a stream, producing a
//!   bounded-size sample from which subset sums can be estimated.
//!
//! Both families share the same merge discipline (folding one summary
//! into another conserves the combined observation count) and the same
//! error surface ([`SketchError`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod common;
pub mod quantiles;
pub mod sampling;

pub use common::{Mergeable, Result, Sketch, SketchError};
pub use quantiles::QuantilesSketch;
pub use sampling::{ReservoirSampling, VarOptSampling};

/// Error types and result alias for sketch operations.
pub mod error {
    pub use crate::common::{Result, SketchError};
}
