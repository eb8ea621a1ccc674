//! Lazily-built rank/quantile/PMF/CDF query engine
//!
//! A sketch's base buffer and occupied levels are query-hostile as stored:
//! values arrive unsorted and each occupied level implicitly represents a
//! different weight. [`Auxiliary`] flattens both into one sorted values
//! array `A` with a parallel cumulative-weight array `C`, `|C| = |A| + 1`,
//! `C` strictly increasing, `C[last] == N`. Every query in this module
//! reads from that snapshot; nothing here mutates the sketch.

use crate::common::SketchError;

/// A sorted-values-plus-cumulative-weights snapshot of one sketch.
///
/// Storage level `l` (0-indexed, matching bit `l` of the occupied-level
/// pattern) holds items of weight `2^(l+1)`; base-buffer items not yet
/// folded into any level hold weight 1. Summing weights this way makes
/// `C[last]` equal the sketch's total observation count `N` exactly.
#[derive(Debug, Clone)]
pub struct Auxiliary {
    values: Vec<f64>,
    cumulative: Vec<u64>,
    n: u64,
}

impl Auxiliary {
    /// Builds the snapshot from a sorted base buffer and the occupied
    /// levels of a sketch. Unoccupied levels must be represented as empty
    /// slices; they contribute nothing.
    pub fn build(sorted_base_buffer: &[f64], levels: &[Vec<f64>], n: u64) -> Self {
        let mut items: Vec<(f64, u64)> = Vec::with_capacity(
            sorted_base_buffer.len() + levels.iter().map(Vec::len).sum::<usize>(),
        );
        for &v in sorted_base_buffer {
            items.push((v, 1));
        }
        for (level_idx, level) in levels.iter().enumerate() {
            if level.is_empty() {
                continue;
            }
            let weight = 1u64 << (level_idx + 1);
            items.extend(level.iter().map(|&v| (v, weight)));
        }
        items.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut values = Vec::with_capacity(items.len());
        let mut cumulative = Vec::with_capacity(items.len() + 1);
        cumulative.push(0u64);
        let mut running = 0u64;
        for (v, w) in items {
            values.push(v);
            running += w;
            cumulative.push(running);
        }
        Auxiliary {
            values,
            cumulative,
            n,
        }
    }

    /// `true` if the snapshot carries no observations.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of distinct retained values (not the total observation count).
    pub fn retained_len(&self) -> usize {
        self.values.len()
    }

    /// Fraction of the stream at or below `value`.
    ///
    /// `inclusive` selects between `P(X <= value)` (the usual convention)
    /// and the strict `P(X < value)`.
    pub fn rank(&self, value: f64, inclusive: bool) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        let count = if inclusive {
            self.values.partition_point(|&x| x <= value)
        } else {
            self.values.partition_point(|&x| x < value)
        };
        self.cumulative[count] as f64 / self.n as f64
    }

    /// The smallest retained value `v` such that the weight strictly below
    /// `v` already reaches `phi * N` (the exclusive search convention:
    /// `target`'s own weight is not counted towards itself).
    ///
    /// Callers are expected to special-case `phi == 0.0` and `phi == 1.0`
    /// against the sketch's exactly-tracked min/max; this only covers the
    /// interior.
    pub fn quantile(&self, phi: f64) -> f64 {
        let target = ((phi * self.n as f64).ceil() as u64).clamp(1, self.n);
        let idx = self.cumulative[..self.values.len()].partition_point(|&c| c < target);
        self.values[idx.min(self.values.len() - 1)]
    }

    /// Probability mass in each of the `k + 1` buckets carved out by `k`
    /// ascending split points: `(-inf, s0], (s0, s1], ..., (s_{k-1}, inf)`.
    ///
    /// Runs in `O(k log n)` via one binary search per split point.
    pub fn pmf_binary_search(&self, split_points: &[f64]) -> Vec<f64> {
        let mut masses = Vec::with_capacity(split_points.len() + 1);
        let mut prev = 0u64;
        for &s in split_points {
            let count = self.values.partition_point(|&x| x <= s);
            let cum = self.cumulative[count];
            masses.push((cum - prev) as f64 / self.n as f64);
            prev = cum;
        }
        masses.push((self.n - prev) as f64 / self.n as f64);
        masses
    }

    /// Same result as [`Self::pmf_binary_search`], computed with a single
    /// linear scan over the sorted values instead of a binary search per
    /// split point. Kept around as a cross-check: the two must always
    /// agree.
    pub fn pmf_linear(&self, split_points: &[f64]) -> Vec<f64> {
        let mut masses = vec![0u64; split_points.len() + 1];
        let mut bucket = 0usize;
        for (idx, &v) in self.values.iter().enumerate() {
            while bucket < split_points.len() && v > split_points[bucket] {
                bucket += 1;
            }
            let weight = self.cumulative[idx + 1] - self.cumulative[idx];
            masses[bucket] += weight;
        }
        masses
            .into_iter()
            .map(|w| w as f64 / self.n as f64)
            .collect()
    }

    /// Cumulative distribution evaluated at each split point (the running
    /// sum of [`Self::pmf_binary_search`]).
    pub fn cdf(&self, split_points: &[f64]) -> Vec<f64> {
        let mut acc = 0.0;
        self.pmf_binary_search(split_points)
            .into_iter()
            .map(|m| {
                acc += m;
                acc
            })
            .collect()
    }
}

/// Result of a two-sample Kolmogorov-Smirnov comparison between two
/// sketches' auxiliary CDFs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsResult {
    /// Observed KS statistic: `sup_x |F1(x) - F2(x)|`.
    pub statistic: f64,
    /// Critical value for the requested significance level.
    pub threshold: f64,
    /// `true` if the statistic exceeds the threshold (distributions differ).
    pub rejected: bool,
}

/// Largest absolute CDF gap between two auxiliary snapshots, evaluated at
/// every distinct value retained by either.
pub fn ks_statistic(a: &Auxiliary, b: &Auxiliary) -> f64 {
    if a.is_empty() || b.is_empty() {
        return f64::NAN;
    }
    let mut xs: Vec<f64> = a.values.iter().chain(b.values.iter()).copied().collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();
    xs.into_iter()
        .map(|x| (a.rank(x, true) - b.rank(x, true)).abs())
        .fold(0.0, f64::max)
}

/// Critical value for the two-sample KS test at significance level `alpha`,
/// drawn from the standard asymptotic table (Press et al., *Numerical
/// Recipes*). Supported levels: 0.10, 0.05, 0.025, 0.01, 0.005.
pub fn ks_threshold(alpha: f64, n1: u64, n2: u64) -> Result<f64, SketchError> {
    let c = if (alpha - 0.10).abs() < 1e-9 {
        1.2239
    } else if (alpha - 0.05).abs() < 1e-9 {
        1.3581
    } else if (alpha - 0.025).abs() < 1e-9 {
        1.4808
    } else if (alpha - 0.01).abs() < 1e-9 {
        1.6276
    } else if (alpha - 0.005).abs() < 1e-9 {
        1.7308
    } else {
        return Err(SketchError::InvalidParameter {
            param: "alpha".to_string(),
            value: alpha.to_string(),
            constraint: "must be one of 0.10, 0.05, 0.025, 0.01, 0.005".to_string(),
        });
    };
    Ok(c * (((n1 + n2) as f64) / (n1 as f64 * n2 as f64)).sqrt())
}

/// Runs a two-sample KS test between two auxiliary snapshots.
pub fn ks_test(a: &Auxiliary, b: &Auxiliary, alpha: f64) -> Result<KsResult, SketchError> {
    let statistic = ks_statistic(a, b);
    let threshold = ks_threshold(alpha, a.n, b.n)?;
    Ok(KsResult {
        statistic,
        threshold,
        rejected: statistic > threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aux_from_flat(values: &[f64]) -> Auxiliary {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Auxiliary::build(&sorted, &[], sorted.len() as u64)
    }

    #[test]
    fn rank_is_monotonic_and_bounded() {
        let aux = aux_from_flat(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(aux.rank(0.0, true), 0.0);
        assert_eq!(aux.rank(3.0, true), 0.6);
        assert_eq!(aux.rank(5.0, true), 1.0);
    }

    #[test]
    fn rank_inclusive_vs_exclusive() {
        let aux = aux_from_flat(&[1.0, 2.0, 2.0, 3.0]);
        assert_eq!(aux.rank(2.0, true), 0.75);
        assert_eq!(aux.rank(2.0, false), 0.25);
    }

    #[test]
    fn quantile_picks_reasonable_values() {
        let aux = aux_from_flat(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(aux.quantile(0.25), 20.0);
        assert_eq!(aux.quantile(0.5), 30.0);
        assert_eq!(aux.quantile(1.0), 40.0);
    }

    #[test]
    fn pmf_linear_and_binary_search_agree() {
        let aux = aux_from_flat(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let splits = [2.0, 5.0];
        assert_eq!(aux.pmf_linear(&splits), aux.pmf_binary_search(&splits));
    }

    #[test]
    fn pmf_sums_to_one() {
        let aux = aux_from_flat(&[1.0, 5.0, 9.0, 13.0]);
        let pmf = aux.pmf_binary_search(&[4.0, 8.0]);
        let sum: f64 = pmf.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_levels_contribute_correct_total() {
        // level 0 (weight 2) holds two items, base buffer holds one (weight 1)
        let levels = vec![vec![1.0, 2.0]];
        let aux = Auxiliary::build(&[0.0], &levels, 5);
        assert_eq!(aux.rank(2.0, true), 1.0);
    }

    #[test]
    fn ks_statistic_zero_for_identical_distributions() {
        let a = aux_from_flat(&[1.0, 2.0, 3.0, 4.0]);
        let b = aux_from_flat(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ks_statistic(&a, &b), 0.0);
    }

    #[test]
    fn ks_statistic_positive_for_shifted_distributions() {
        let a = aux_from_flat(&[1.0, 2.0, 3.0, 4.0]);
        let b = aux_from_flat(&[5.0, 6.0, 7.0, 8.0]);
        assert!(ks_statistic(&a, &b) > 0.9);
    }

    #[test]
    fn ks_threshold_rejects_unsupported_alpha() {
        assert!(ks_threshold(0.5, 10, 10).is_err());
    }
}
