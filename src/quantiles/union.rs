//! Union facade: accumulates any number of sketches (or raw inputs) into
//! one result sketch, handling every combination of null/empty/valid
//! gadget and input.
//!
//! A union maintains a private "gadget" sketch capped at a configured
//! maximum `K`. Unlike [`crate::common::Mergeable::merge`], which refuses
//! to shrink its destination's resolution, the union is explicitly
//! allowed to down-sample its own gadget when a smaller-`K` input arrives,
//! since the gadget is private and has no external identity to preserve.

use crate::common::validation::validate_k;
use crate::common::{Mergeable, Result};
use crate::quantiles::sketch::{QuantilesSketch, MAX_K, MIN_K};

/// Accumulates sketches into a single combined result.
pub struct Union {
    max_k: u16,
    gadget: Option<QuantilesSketch>,
}

impl Union {
    /// Creates a union whose gadget never exceeds `max_k`.
    pub fn new(max_k: u16) -> Result<Self> {
        validate_k(max_k, MIN_K, MAX_K)?;
        Ok(Union {
            max_k,
            gadget: None,
        })
    }

    /// The configured maximum resolution of this union's gadget.
    pub fn max_k(&self) -> u16 {
        self.max_k
    }

    /// Folds `input` into the union.
    ///
    /// Handles every combination of a null/empty/valid gadget and a
    /// null/empty/valid input:
    /// - null, null: no-op.
    /// - null, empty: adopt an empty gadget at `input`'s `K`.
    /// - null, valid: adopt `input`, down-sampled to `max_k` if larger.
    /// - non-null, null: no-op.
    /// - non-null, empty: retain the gadget, adopting `input`'s smaller
    ///   `K` if it is smaller (an empty input carries no approximation
    ///   error, so narrowing to it is always safe).
    /// - non-null, valid, same/larger input `K`: merge directly (the
    ///   merge engine down-samples the input on the fly if needed).
    /// - non-null, valid, smaller input `K`: down-sample the gadget to
    ///   the input's `K` first, then merge.
    ///
    /// # Errors
    /// Returns `SketchError::IncompatibleSketches` if the down-sampling
    /// ratio required between gadget and input is not a power of two.
    pub fn update(&mut self, input: Option<&QuantilesSketch>) -> Result<()> {
        let Some(input) = input else {
            return Ok(());
        };

        match &mut self.gadget {
            None => {
                if input.is_empty() {
                    self.gadget = Some(QuantilesSketch::new(input.k().min(self.max_k))?);
                } else if input.k() > self.max_k {
                    self.gadget = Some(input.downsample_to(self.max_k)?);
                } else {
                    self.gadget = Some(input.clone());
                }
                Ok(())
            }
            Some(gadget) => {
                if input.is_empty() {
                    if input.k() < gadget.k() {
                        *gadget = gadget.downsample_to(input.k())?;
                    }
                    Ok(())
                } else if input.k() >= gadget.k() {
                    gadget.merge(input)
                } else {
                    let mut downgraded = gadget.downsample_to(input.k())?;
                    downgraded.merge(input)?;
                    *gadget = downgraded;
                    Ok(())
                }
            }
        }
    }

    /// Returns a copy of the current result, or `None` if nothing has
    /// ever been folded in.
    pub fn result(&self) -> Option<QuantilesSketch> {
        self.gadget.clone()
    }

    /// Returns the current result and resets the union to its initial
    /// state.
    pub fn result_and_reset(&mut self) -> Option<QuantilesSketch> {
        self.gadget.take()
    }
}
