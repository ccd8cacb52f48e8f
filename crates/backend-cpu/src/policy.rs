//! Execution policies for host loops.
//!
//! A policy decides how an index space is walked. Kernel bodies are written
//! once against `forall_map`/`forall_reduce` and run under either policy.

use rayon::prelude::*;

pub trait ExecPolicy {
    /// `out[i] = body(i)` for every index of `out`.
    fn forall_map<F>(&self, out: &mut [f64], body: F)
    where
        F: Fn(usize) -> f64 + Send + Sync;

    /// Folds `map(i)` over `0..len` with `combine`, starting at `identity`.
    fn forall_reduce<T, M, C>(&self, len: usize, identity: T, map: M, combine: C) -> T
    where
        T: Copy + Send + Sync,
        M: Fn(usize) -> T + Send + Sync,
        C: Fn(T, T) -> T + Send + Sync;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeqExec;

impl ExecPolicy for SeqExec {
    fn forall_map<F>(&self, out: &mut [f64], body: F)
    where
        F: Fn(usize) -> f64 + Send + Sync,
    {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = body(i);
        }
    }

    fn forall_reduce<T, M, C>(&self, len: usize, identity: T, map: M, combine: C) -> T
    where
        T: Copy + Send + Sync,
        M: Fn(usize) -> T + Send + Sync,
        C: Fn(T, T) -> T + Send + Sync,
    {
        (0..len).fold(identity, |acc, i| combine(acc, map(i)))
    }
}

/// Thread-parallel policy over the current rayon pool.
///
/// Reductions split the index space into one contiguous chunk per worker and
/// combine chunk results in order, so the result only depends on the pool size.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParExec;

impl ParExec {
    fn chunk_len(len: usize) -> usize {
        len.div_ceil(rayon::current_num_threads().max(1)).max(1)
    }
}

impl ExecPolicy for ParExec {
    fn forall_map<F>(&self, out: &mut [f64], body: F)
    where
        F: Fn(usize) -> f64 + Send + Sync,
    {
        out.par_iter_mut()
            .enumerate()
            .for_each(|(i, slot)| *slot = body(i));
    }

    fn forall_reduce<T, M, C>(&self, len: usize, identity: T, map: M, combine: C) -> T
    where
        T: Copy + Send + Sync,
        M: Fn(usize) -> T + Send + Sync,
        C: Fn(T, T) -> T + Send + Sync,
    {
        let chunk = Self::chunk_len(len);
        let partials: Vec<T> = (0..len.div_ceil(chunk))
            .into_par_iter()
            .map(|c| {
                let end = ((c + 1) * chunk).min(len);
                (c * chunk..end).fold(identity, |acc, i| combine(acc, map(i)))
            })
            .collect();
        partials.into_iter().fold(identity, &combine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sum_of_squares<P: ExecPolicy>(policy: &P, len: usize) -> f64 {
        policy.forall_reduce(len, 0.0, |i| (i as f64) * (i as f64), |a, b| a + b)
    }

    #[test]
    fn policies_agree() {
        let mut seq = vec![0.0; 513];
        let mut par = vec![0.0; 513];
        SeqExec.forall_map(&mut seq, |i| i as f64 * 0.25);
        ParExec.forall_map(&mut par, |i| i as f64 * 0.25);
        assert_eq!(seq, par);

        assert_abs_diff_eq!(
            sum_of_squares(&SeqExec, 10_000),
            sum_of_squares(&ParExec, 10_000),
            epsilon = 1e-6
        );
    }

    #[test]
    fn empty_reduce_returns_identity() {
        assert_eq!(ParExec.forall_reduce(0, 7.0, |_| 1.0, |a, b| a + b), 7.0);
        assert_eq!(SeqExec.forall_reduce(0, 7.0, |_| 1.0, |a, b| a + b), 7.0);
    }
}
