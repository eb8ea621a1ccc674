//! Validation utilities for sketch deserialization and parameter bounds checking

use crate::common::{Result, SketchError};

/// Maximum serialized sketch size (256MB) to prevent resource exhaustion
pub const MAX_BYTE_SIZE: usize = 256 * 1024 * 1024; // 256MB

/// Validate that a quantiles resolution parameter `k` is in `[min, max]`.
pub fn validate_k(k: u16, min: u16, max: u16) -> Result<()> {
    if k < min || k > max {
        return Err(SketchError::invalid_k(k, min, max));
    }
    Ok(())
}

/// Validate that a sampling reservoir size is positive.
pub fn validate_sample_size(k: usize) -> Result<()> {
    if k == 0 {
        return Err(SketchError::InvalidParameter {
            param: "k".to_string(),
            value: k.to_string(),
            constraint: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

/// Validate that a value is a valid probability/fraction (0.0 <= p <= 1.0)
/// Typically used for quantile ranks and normalized ranks.
pub fn validate_unit_interval(value: f64, param_name: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SketchError::InvalidParameter {
            param: param_name.to_string(),
            value: value.to_string(),
            constraint: "must be in range [0.0, 1.0]".to_string(),
        });
    }
    Ok(())
}

/// Validate that split points are finite and strictly increasing, and that
/// at least one was supplied.
pub fn validate_split_points(split_points: &[f64]) -> Result<()> {
    if split_points.is_empty() {
        return Err(SketchError::InvalidParameter {
            param: "split_points".to_string(),
            value: "[]".to_string(),
            constraint: "must contain at least one element".to_string(),
        });
    }
    for window in split_points.windows(2) {
        if !(window[0] < window[1]) {
            return Err(SketchError::InvalidParameter {
                param: "split_points".to_string(),
                value: format!("{:?}", split_points),
                constraint: "must be strictly increasing".to_string(),
            });
        }
    }
    if split_points.iter().any(|v| !v.is_finite()) {
        return Err(SketchError::InvalidParameter {
            param: "split_points".to_string(),
            value: format!("{:?}", split_points),
            constraint: "must consist of finite values".to_string(),
        });
    }
    Ok(())
}

/// Validate that a deserialized byte size doesn't exceed safety limits
pub fn validate_byte_size(size: usize) -> Result<()> {
    if size > MAX_BYTE_SIZE {
        return Err(SketchError::CorruptFormat(format!(
            "declared sketch size {} exceeds maximum allowed size {}",
            size, MAX_BYTE_SIZE
        )));
    }
    Ok(())
}

/// Validate minimum required bytes for deserialization header
pub fn validate_min_size(actual: usize, required: usize) -> Result<()> {
    if actual < required {
        return Err(SketchError::CorruptFormat(format!(
            "insufficient data: need at least {} bytes, got {}",
            required, actual
        )));
    }
    Ok(())
}

/// Validate that a down-sampling ratio (`src_k / dst_k`) is a power of two.
pub fn validate_power_of_two_ratio(src_k: u16, dst_k: u16) -> Result<u32> {
    if dst_k == 0 || src_k % dst_k != 0 {
        return Err(SketchError::InvalidParameter {
            param: "k".to_string(),
            value: format!("{src_k}/{dst_k}"),
            constraint: "down-sampling ratio must be a power of two".to_string(),
        });
    }
    let ratio = (src_k / dst_k) as u32;
    if !ratio.is_power_of_two() {
        return Err(SketchError::InvalidParameter {
            param: "k".to_string(),
            value: format!("{src_k}/{dst_k}"),
            constraint: "down-sampling ratio must be a power of two".to_string(),
        });
    }
    Ok(ratio.trailing_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_k_valid() {
        assert!(validate_k(2, 2, 32768).is_ok());
        assert!(validate_k(200, 2, 32768).is_ok());
        assert!(validate_k(32768, 2, 32768).is_ok());
    }

    #[test]
    fn test_validate_k_invalid() {
        assert!(validate_k(1, 2, 32768).is_err());
        assert!(validate_k(32769, 2, 32768).is_err());
    }

    #[test]
    fn test_validate_unit_interval() {
        assert!(validate_unit_interval(0.0, "phi").is_ok());
        assert!(validate_unit_interval(1.0, "phi").is_ok());
        assert!(validate_unit_interval(-0.1, "phi").is_err());
        assert!(validate_unit_interval(1.1, "phi").is_err());
    }

    #[test]
    fn test_validate_split_points() {
        assert!(validate_split_points(&[1.0, 2.0, 3.0]).is_ok());
        assert!(validate_split_points(&[]).is_err());
        assert!(validate_split_points(&[1.0, 1.0]).is_err());
        assert!(validate_split_points(&[2.0, 1.0]).is_err());
        assert!(validate_split_points(&[f64::NAN]).is_err());
    }

    #[test]
    fn test_validate_power_of_two_ratio() {
        assert_eq!(validate_power_of_two_ratio(256, 64).unwrap(), 2);
        assert!(validate_power_of_two_ratio(256, 100).is_err());
        assert!(validate_power_of_two_ratio(100, 0).is_err());
    }
}
