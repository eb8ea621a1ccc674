//! Tandem blocky merge and parity sub-sampling
//!
//! These two primitives are the entire payload of carry propagation: two
//! sorted blocks of equal size are zipped into one sorted block of double
//! the size, then collapsed back down by keeping every other element. The
//! coin flip that decides which parity survives is the sketch's only
//! source of randomness.

use crate::common::SketchRng;

/// Merges two sorted slices into one sorted `Vec`, preserving duplicates.
pub fn tandem_merge(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        if a[i] <= b[j] {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Keeps either the even- or odd-indexed half of a sorted block.
///
/// `sorted` must have even length; `take_odd` selects the parity. Each
/// surviving item absorbs the weight of the discarded neighbor next to it.
pub fn subsample_half(sorted: &[f64], take_odd: bool) -> Vec<f64> {
    debug_assert_eq!(
        sorted.len() % 2,
        0,
        "block to subsample must be even-length"
    );
    let start = usize::from(take_odd);
    sorted.iter().copied().skip(start).step_by(2).collect()
}

/// Tandem blocky merge: merges `carry` with an occupied `level` of equal
/// length, then halves the result by a single fair coin flip.
///
/// This is the one step the carry-propagation loop repeats at every
/// occupied level it passes through, in both the update path and the
/// merge engine.
pub fn merge_and_halve(carry: &[f64], level: &[f64], rng: &mut SketchRng) -> Vec<f64> {
    debug_assert_eq!(carry.len(), level.len(), "tandem merge requires equal-size blocks");
    let merged = tandem_merge(carry, level);
    subsample_half(&merged, rng.next_bit())
}

/// Repeatedly halves `block` `steps` times, each halving an independent
/// fair coin flip. Used by down-sampling merges to fold a larger-`K`
/// source level down to a smaller destination `K`.
pub fn downsample_steps(mut block: Vec<f64>, steps: u32, rng: &mut SketchRng) -> Vec<f64> {
    for _ in 0..steps {
        block = subsample_half(&block, rng.next_bit());
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tandem_merge_is_sorted() {
        let merged = tandem_merge(&[1.0, 3.0, 5.0], &[2.0, 4.0, 6.0]);
        assert_eq!(merged, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn tandem_merge_preserves_duplicates() {
        let merged = tandem_merge(&[1.0, 1.0], &[1.0, 2.0]);
        assert_eq!(merged, vec![1.0, 1.0, 1.0, 2.0]);
    }

    #[test]
    fn subsample_half_picks_correct_parity() {
        let sorted = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(subsample_half(&sorted, false), vec![0.0, 2.0, 4.0]);
        assert_eq!(subsample_half(&sorted, true), vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn merge_and_halve_conserves_count() {
        let mut rng = SketchRng::seed_from_u64(1);
        let carry = vec![1.0, 3.0, 5.0, 7.0];
        let level = vec![2.0, 4.0, 6.0, 8.0];
        let result = merge_and_halve(&carry, &level, &mut rng);
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn downsample_steps_halves_each_time() {
        let mut rng = SketchRng::seed_from_u64(2);
        let block: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let result = downsample_steps(block, 2, &mut rng);
        assert_eq!(result.len(), 4);
    }
}
