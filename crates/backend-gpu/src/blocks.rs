//! Block-level execution primitives used inside launched work.
//!
//! Each block is one rayon task; threads within a block are iterated in order.

use crate::device::DeviceError;
use rayon::prelude::*;

/// Writes `f(i)` into `out[i]` for every element, one rayon task per block.
pub fn map_blocks<F>(out: &mut [f64], block: usize, f: F)
where
    F: Fn(usize) -> f64 + Sync,
{
    let block = block.max(1);
    out.par_chunks_mut(block)
        .enumerate()
        .for_each(|(b, chunk)| {
            let base = b * block;
            for (t, slot) in chunk.iter_mut().enumerate() {
                *slot = f(base + t);
            }
        });
}

/// Per-block reduction that folds each block's elements in index order, then
/// combines block partials in block order. Works for any block size.
pub fn reduce_blocks<T, M, C>(len: usize, block: usize, identity: T, map: M, combine: C) -> T
where
    T: Copy + Send + Sync,
    M: Fn(usize) -> T + Sync,
    C: Fn(T, T) -> T + Sync,
{
    let block = block.max(1);
    let grid = len.div_ceil(block);
    let partials: Vec<T> = (0..grid)
        .into_par_iter()
        .map(|b| {
            let end = ((b + 1) * block).min(len);
            (b * block..end).fold(identity, |acc, i| combine(acc, map(i)))
        })
        .collect();
    partials.into_iter().fold(identity, &combine)
}

/// Shared-memory style reduction: each block loads one value per thread into
/// a scratch array and halves it until slot 0 holds the block result.
///
/// The halving scheme needs a power-of-two block size.
pub fn reduce_blocks_tree<T, M, C>(
    len: usize,
    block: usize,
    identity: T,
    map: M,
    combine: C,
) -> Result<T, DeviceError>
where
    T: Copy + Send + Sync,
    M: Fn(usize) -> T + Sync,
    C: Fn(T, T) -> T + Sync,
{
    if !block.is_power_of_two() {
        return Err(DeviceError::LaunchFailed {
            reason: format!("tree reduction requires a power-of-two block size, got {block}"),
        });
    }

    let grid = len.div_ceil(block);
    let partials: Vec<T> = (0..grid)
        .into_par_iter()
        .map(|b| {
            let mut shared = vec![identity; block];
            for (t, slot) in shared.iter_mut().enumerate() {
                let i = b * block + t;
                if i < len {
                    *slot = map(i);
                }
            }
            let mut stride = block / 2;
            while stride > 0 {
                for t in 0..stride {
                    shared[t] = combine(shared[t], shared[t + stride]);
                }
                stride /= 2;
            }
            shared[0]
        })
        .collect();

    Ok(partials.into_iter().fold(identity, &combine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn map_covers_ragged_last_block() {
        let mut out = vec![0.0; 10];
        map_blocks(&mut out, 4, |i| i as f64 * 2.0);
        assert_eq!(out, (0..10).map(|i| i as f64 * 2.0).collect::<Vec<_>>());
    }

    #[test]
    fn reductions_agree() {
        let values: Vec<f64> = (0..1000).map(|i| (i as f64).sin()).collect();
        let expected: f64 = values.iter().sum();

        let plain = reduce_blocks(values.len(), 96, 0.0, |i| values[i], |a, b| a + b);
        let tree = reduce_blocks_tree(values.len(), 128, 0.0, |i| values[i], |a, b| a + b).unwrap();

        assert_abs_diff_eq!(plain, expected, epsilon = 1e-9);
        assert_abs_diff_eq!(tree, expected, epsilon = 1e-9);
    }

    #[test]
    fn tree_rejects_non_power_of_two() {
        let err = reduce_blocks_tree(16, 96, 0.0, |_| 1.0, |a, b| a + b).unwrap_err();
        assert!(matches!(err, DeviceError::LaunchFailed { .. }));
    }
}
