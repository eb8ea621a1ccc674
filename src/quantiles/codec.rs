//! Binary wire format: preamble, flags, and the three conversions
//! (heapify / wrap / compact).
//!
//! Layout (all multi-byte fields little-endian):
//!
//! ```text
//! offset 0       : preLongs    (1 byte)  1 = empty, 4 = non-empty
//! offset 1       : serVer      (1 byte)  1, 2, or 3 accepted on read; 3 written
//! offset 2       : familyID    (1 byte)  fixed tag identifying this sketch family
//! offset 3       : flags       (1 byte)  EMPTY | COMPACT | ORDERED | READ_ONLY
//! offset 4       : k           (1 byte on serVer 1, 2 bytes LE on serVer >= 2)
//! offset 6/5..8  : reserved, must be zero
//! -- non-empty sketches only, starting at offset 8 --
//! offset 8..16   : n           (u64 LE)
//! offset 16..24  : min         (f64 LE)
//! offset 24..32  : max         (f64 LE)
//! offset 32..    : samples     base buffer, then each occupied level low-to-high
//! ```
//!
//! The sample payload differs between the updatable and compact forms:
//! updatable form pads the base buffer out to `2K` slots so a
//! memory-backed sketch can grow in place; compact form emits only the
//! `num_retained()` live values. `ordered` additionally sorts the base
//! buffer portion before writing it, which both shrinks nothing but makes
//! repeat queries against a wrapped view cheaper.

use crate::common::validation;
use crate::common::{Result, SketchError};
use crate::quantiles::bits;
use crate::quantiles::sketch::QuantilesSketch;

const PRE_LONGS_EMPTY: u8 = 1;
const PRE_LONGS_FULL: u8 = 4;
const FAMILY_ID: u8 = 0x51; // 'Q' for quantiles
const SERIAL_VERSION: u8 = 3;

const FLAG_READ_ONLY: u8 = 1 << 0;
const FLAG_EMPTY: u8 = 1 << 1;
const FLAG_COMPACT: u8 = 1 << 2;
const FLAG_ORDERED: u8 = 1 << 3;

const EMPTY_PREAMBLE_BYTES: usize = 8;
const FULL_PREAMBLE_BYTES: usize = 32;

/// Parsed preamble fields, independent of the serialized version that
/// produced them.
#[derive(Debug, Clone)]
struct Preamble {
    flags: u8,
    k: u16,
    n: u64,
    min: f64,
    max: f64,
}

impl Preamble {
    fn is_empty(&self) -> bool {
        self.flags & FLAG_EMPTY != 0
    }
}

fn parse_preamble(bytes: &[u8]) -> Result<Preamble> {
    validation::validate_min_size(bytes.len(), EMPTY_PREAMBLE_BYTES)?;
    validation::validate_byte_size(bytes.len())?;

    let pre_longs = bytes[0];
    let ser_ver = bytes[1];
    let family_id = bytes[2];
    let flags = bytes[3];

    if family_id != FAMILY_ID {
        return Err(SketchError::CorruptFormat(format!(
            "unexpected family id {family_id:#x}, expected {FAMILY_ID:#x}"
        )));
    }
    if !(1..=3).contains(&ser_ver) {
        return Err(SketchError::CorruptFormat(format!(
            "unsupported serialization version {ser_ver}"
        )));
    }

    let k = if ser_ver == 1 {
        bytes[4] as u16
    } else {
        u16::from_le_bytes([bytes[4], bytes[5]])
    };

    if flags & FLAG_EMPTY != 0 {
        if pre_longs != PRE_LONGS_EMPTY {
            return Err(SketchError::CorruptFormat(
                "empty flag set but preLongs does not match the empty form".to_string(),
            ));
        }
        return Ok(Preamble {
            flags,
            k,
            n: 0,
            min: f64::NAN,
            max: f64::NAN,
        });
    }

    if pre_longs != PRE_LONGS_FULL {
        return Err(SketchError::CorruptFormat(
            "non-empty sketch requires the full preamble form".to_string(),
        ));
    }
    validation::validate_min_size(bytes.len(), FULL_PREAMBLE_BYTES)?;

    let n = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let min = f64::from_le_bytes(bytes[16..24].try_into().unwrap());
    let max = f64::from_le_bytes(bytes[24..32].try_into().unwrap());

    Ok(Preamble {
        flags,
        k,
        n,
        min,
        max,
    })
}

/// Serializes `sketch`. `compact` emits only retained values; otherwise
/// the base buffer is padded to `2K` slots for in-place growth. `ordered`
/// additionally sorts the base-buffer portion and sets `FLAG_ORDERED`.
pub fn to_bytes(sketch: &QuantilesSketch, compact: bool, ordered: bool) -> Vec<u8> {
    if sketch.is_empty() {
        let mut out = vec![0u8; EMPTY_PREAMBLE_BYTES];
        out[0] = PRE_LONGS_EMPTY;
        out[1] = SERIAL_VERSION;
        out[2] = FAMILY_ID;
        out[3] = FLAG_EMPTY | if compact { FLAG_COMPACT } else { 0 };
        out[4..6].copy_from_slice(&sketch.k().to_le_bytes());
        return out;
    }

    let mut flags = 0u8;
    if compact {
        flags |= FLAG_COMPACT;
    }
    if ordered {
        flags |= FLAG_ORDERED;
    }

    let mut out = vec![0u8; FULL_PREAMBLE_BYTES];
    out[0] = PRE_LONGS_FULL;
    out[1] = SERIAL_VERSION;
    out[2] = FAMILY_ID;
    out[3] = flags;
    out[4..6].copy_from_slice(&sketch.k().to_le_bytes());
    out[8..16].copy_from_slice(&sketch.n().to_le_bytes());
    out[16..24].copy_from_slice(&sketch.min_value().to_le_bytes());
    out[24..32].copy_from_slice(&sketch.max_value().to_le_bytes());

    let mut base_buffer = sketch.base_buffer().to_vec();
    if ordered {
        base_buffer.sort_by(f64::total_cmp);
    }
    if !compact {
        base_buffer.resize(2 * sketch.k() as usize, 0.0);
    }
    for v in &base_buffer {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for level in sketch.levels() {
        let payload: std::borrow::Cow<[f64]> = if compact {
            std::borrow::Cow::Borrowed(level)
        } else {
            let mut padded = level.clone();
            padded.resize(sketch.k() as usize, 0.0);
            std::borrow::Cow::Owned(padded)
        };
        if compact && payload.is_empty() {
            continue;
        }
        for v in payload.iter() {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/// Reconstructs a fully updatable, owned sketch from a serialized image.
/// Accepts serialization versions 1 through 3; version 1's single-byte `k`
/// field is promoted to the current 2-byte field transparently.
///
/// # Errors
/// Returns `SketchError::CorruptFormat` if the bytes fail preamble
/// validation or are shorter than the declared payload requires.
pub fn heapify(bytes: &[u8]) -> Result<QuantilesSketch> {
    let preamble = parse_preamble(bytes)?;
    let mut sketch = QuantilesSketch::with_seed(preamble.k, 0)
        .map_err(|e| SketchError::CorruptFormat(e.to_string()))?;
    if preamble.is_empty() {
        return Ok(sketch);
    }

    let compact = preamble.flags & FLAG_COMPACT != 0;
    let k = preamble.k as usize;
    let mut offset = FULL_PREAMBLE_BYTES;

    // N = bb_count + 2K * P, where P's bits are exactly the occupied-level
    // pattern (level l carries weight 2K * 2^l in total).
    let bb_count = (preamble.n % (2 * k as u64)) as usize;
    let pattern = preamble.n / (2 * k as u64);
    let num_levels = bits::highest_set_bit(pattern).map_or(0, |h| h + 1);
    let level_flags: Vec<bool> = (0..num_levels).map(|l| (pattern >> l) & 1 == 1).collect();

    let bb_physical_len = if compact { bb_count } else { 2 * k };
    let bb_bytes = bb_physical_len * 8;
    validation::validate_min_size(bytes.len(), offset + bb_bytes)?;
    let mut base_buffer = read_f64_slice(bytes, offset, bb_physical_len)?;
    offset += bb_bytes;
    base_buffer.truncate(bb_count);

    // In compact form an unoccupied level contributes no bytes at all; in
    // updatable form every level slot from 0 to the highest occupied one
    // is physically present (padded with zeros) so the sketch can grow
    // in place, and must still be consumed even when logically empty.
    let mut levels: Vec<Vec<f64>> = Vec::new();
    for occupied in &level_flags {
        if !*occupied && compact {
            levels.push(Vec::new());
            continue;
        }
        let bytes_len = k * 8;
        validation::validate_min_size(bytes.len(), offset + bytes_len)?;
        let values = read_f64_slice(bytes, offset, k)?;
        offset += bytes_len;
        levels.push(if *occupied { values } else { Vec::new() });
    }

    sketch.restore_raw(base_buffer, levels, pattern, preamble.n, preamble.min, preamble.max);
    Ok(sketch)
}

fn read_f64_slice(bytes: &[u8], offset: usize, count: usize) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let start = offset + i * 8;
        let chunk: [u8; 8] = bytes
            .get(start..start + 8)
            .ok_or_else(|| SketchError::CorruptFormat("truncated sample payload".to_string()))?
            .try_into()
            .unwrap();
        out.push(f64::from_le_bytes(chunk));
    }
    Ok(out)
}

/// Read-only view over a serialized sketch image: supports every query
/// operation but rejects mutation, mirroring a `wrap()`-ed compact byte
/// region that the caller does not own.
#[derive(Debug, Clone)]
pub struct ReadOnlySketch {
    inner: QuantilesSketch,
}

impl ReadOnlySketch {
    /// Parses `bytes` without taking ownership of a mutable copy.
    ///
    /// # Errors
    /// Same as [`heapify`].
    pub fn wrap(bytes: &[u8]) -> Result<Self> {
        Ok(ReadOnlySketch {
            inner: heapify(bytes)?,
        })
    }

    /// Attempting to update a wrapped read-only view always fails.
    pub fn update(&mut self, _value: f64) -> Result<()> {
        Err(SketchError::ReadOnly)
    }

    pub fn k(&self) -> u16 {
        self.inner.k()
    }

    pub fn n(&self) -> u64 {
        self.inner.n()
    }

    pub fn min_value(&self) -> f64 {
        self.inner.min_value()
    }

    pub fn max_value(&self) -> f64 {
        self.inner.max_value()
    }

    pub fn rank(&self, value: f64, inclusive: bool) -> f64 {
        self.inner.rank(value, inclusive)
    }

    pub fn quantile(&self, phi: f64) -> Result<f64> {
        self.inner.quantile(phi)
    }
}

/// Serializes `sketch` in compact form (only live values, no growth
/// padding).
pub fn compact(sketch: &QuantilesSketch, ordered: bool) -> Vec<u8> {
    to_bytes(sketch, true, ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant 5/6: heapify(to_bytes(..)) reproduces the same preamble
        // fields and the same query answers, for both the updatable and the
        // compact encodings, across arbitrary streams and resolutions.
        #[test]
        fn prop_round_trip_preserves_preamble_and_queries(
            k in 2u16..128,
            values in proptest::collection::vec(-1.0e6f64..1.0e6, 1..2000),
            seed in any::<u64>(),
            compact_form in any::<bool>(),
            ordered in any::<bool>(),
        ) {
            let mut s = QuantilesSketch::with_seed(k, seed).unwrap();
            for &v in &values {
                s.update(v);
            }
            let bytes = to_bytes(&s, compact_form, ordered);
            let back = heapify(&bytes).unwrap();

            prop_assert_eq!(back.k(), s.k());
            prop_assert_eq!(back.n(), s.n());
            prop_assert_eq!(back.min_value(), s.min_value());
            prop_assert_eq!(back.max_value(), s.max_value());
            prop_assert_eq!(back.num_retained(), s.num_retained());
            prop_assert_eq!(back.quantile(0.5).unwrap(), s.quantile(0.5).unwrap());
            prop_assert_eq!(back.quantile(0.0).unwrap(), s.quantile(0.0).unwrap());
            prop_assert_eq!(back.quantile(1.0).unwrap(), s.quantile(1.0).unwrap());
        }
    }

    #[test]
    fn empty_sketch_round_trips() {
        let s = QuantilesSketch::with_seed(32, 1).unwrap();
        let bytes = to_bytes(&s, true, false);
        assert_eq!(bytes.len(), EMPTY_PREAMBLE_BYTES);
        let back = heapify(&bytes).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.k(), 32);
    }

    #[test]
    fn compact_round_trip_preserves_queries() {
        let mut s = QuantilesSketch::with_seed(16, 5).unwrap();
        for i in 0..5000 {
            s.update(i as f64);
        }
        let bytes = compact(&s, true);
        let back = heapify(&bytes).unwrap();
        assert_eq!(back.n(), s.n());
        assert_eq!(back.min_value(), s.min_value());
        assert_eq!(back.max_value(), s.max_value());
        assert_eq!(
            back.quantile(0.5).unwrap(),
            s.quantile(0.5).unwrap()
        );
    }

    #[test]
    fn updatable_round_trip_preserves_queries() {
        let mut s = QuantilesSketch::with_seed(16, 6).unwrap();
        for i in 0..5000 {
            s.update(i as f64);
        }
        let bytes = to_bytes(&s, false, false);
        let back = heapify(&bytes).unwrap();
        assert_eq!(back.n(), s.n());
        assert_eq!(back.num_retained(), s.num_retained());
    }

    #[test]
    fn wrap_rejects_updates() {
        let mut s = QuantilesSketch::with_seed(8, 1).unwrap();
        for i in 0..100 {
            s.update(i as f64);
        }
        let bytes = compact(&s, false);
        let mut view = ReadOnlySketch::wrap(&bytes).unwrap();
        assert!(view.update(1.0).is_err());
        assert_eq!(view.n(), 100);
    }

    #[test]
    fn corrupt_family_id_is_rejected() {
        let mut s = QuantilesSketch::with_seed(8, 1).unwrap();
        s.update(1.0);
        let mut bytes = to_bytes(&s, true, false);
        bytes[2] = 0xFF;
        assert!(heapify(&bytes).is_err());
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let mut s = QuantilesSketch::with_seed(8, 1).unwrap();
        for i in 0..100 {
            s.update(i as f64);
        }
        let bytes = compact(&s, false);
        assert!(heapify(&bytes[..bytes.len() - 4]).is_err());
    }
}
