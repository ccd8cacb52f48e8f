//! Output checksums and their cross-variant comparison.

use crate::variant::VariantId;
use std::collections::BTreeMap;

/// Position-weighted sum `Σ (i + 1) · data[i] · scale`, compensated so long
/// arrays do not lose low-order bits.
pub fn calc_checksum(data: &[f64], scale: f64) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for (i, value) in data.iter().enumerate() {
        let term = (i as f64 + 1.0) * value * scale - compensation;
        let next = sum + term;
        compensation = (next - sum) - term;
        sum = next;
    }
    sum
}

/// Relative agreement with a floor of 1 on the reference magnitude.
pub fn checksums_agree(value: f64, reference: f64, tolerance: f64) -> bool {
    (value - reference).abs() <= tolerance * reference.abs().max(1.0)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ChecksumKey {
    kernel: String,
    variant: VariantId,
    tuning: String,
}

/// Running checksum per (kernel, variant, tuning) for one sweep.
#[derive(Debug, Clone, Default)]
pub struct ChecksumAccumulator {
    sums: BTreeMap<ChecksumKey, f64>,
}

impl ChecksumAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` to the running sum and returns the new total.
    pub fn fold(&mut self, kernel: &str, variant: VariantId, tuning: &str, value: f64) -> f64 {
        let key = ChecksumKey {
            kernel: kernel.to_string(),
            variant,
            tuning: tuning.to_string(),
        };
        let sum = self.sums.entry(key).or_insert(0.0);
        *sum += value;
        *sum
    }

    pub fn get(&self, kernel: &str, variant: VariantId, tuning: &str) -> Option<f64> {
        let key = ChecksumKey {
            kernel: kernel.to_string(),
            variant,
            tuning: tuning.to_string(),
        };
        self.sums.get(&key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn weighted_sum() {
        assert_abs_diff_eq!(calc_checksum(&[1.0, 2.0, 3.0], 1.0), 14.0);
        assert_abs_diff_eq!(calc_checksum(&[1.0, 2.0, 3.0], 0.5), 7.0);
        assert_eq!(calc_checksum(&[], 1.0), 0.0);
    }

    #[test]
    fn agreement_is_relative_with_unit_floor() {
        assert!(checksums_agree(1.0e6 + 1.0e-5, 1.0e6, 1.0e-10));
        assert!(!checksums_agree(1.0e6 + 1.0e-3, 1.0e6, 1.0e-10));
        // Near zero the floor makes the comparison absolute.
        assert!(checksums_agree(5.0e-11, 0.0, 1.0e-10));
        assert!(!checksums_agree(5.0e-10, 0.0, 1.0e-10));
    }

    #[test]
    fn accumulator_keys_by_tuning() {
        let mut acc = ChecksumAccumulator::new();
        acc.fold("Stream_MUL", VariantId::BaseGpuA, "block_128", 1.5);
        acc.fold("Stream_MUL", VariantId::BaseGpuA, "block_128", 1.5);
        acc.fold("Stream_MUL", VariantId::BaseGpuA, "block_256", 4.0);

        assert_eq!(
            acc.get("Stream_MUL", VariantId::BaseGpuA, "block_128"),
            Some(3.0)
        );
        assert_eq!(
            acc.get("Stream_MUL", VariantId::BaseGpuA, "block_256"),
            Some(4.0)
        );
        assert_eq!(acc.get("Stream_MUL", VariantId::BaseSeq, "default"), None);
    }
}
