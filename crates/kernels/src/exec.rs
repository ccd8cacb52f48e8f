//! Variant dispatch.
//!
//! Kernels describe their bodies once as `MapStep`s and `ReduceStep`s over
//! array indices. `ExecTarget` runs a step the way the selected variant
//! would: hand-written loops and launches for `Base`, closures for `Lambda`,
//! the portable `forall` layer for `Library`.

use crate::context::RunContext;
use crate::data::ArraySet;
use crate::tuning::Tuning;
use crate::variant::{Flavor, VariantId};
use anyhow::{anyhow, bail, ensure, Result};
use perfsweep_backend_cpu::{ExecPolicy, HostPool, ParExec, SeqExec};
use perfsweep_backend_gpu::blocks::{map_blocks, reduce_blocks, reduce_blocks_tree};
use perfsweep_backend_gpu::{
    Device, DeviceBuffer, DeviceExec, DeviceReduction, DynDevice, LaunchConfig,
};
use rayon::prelude::*;
use std::sync::{Arc, Mutex, PoisonError};

pub type MapBody = Arc<dyn Fn(usize, &[&[f64]]) -> f64 + Send + Sync>;
pub type ReduceMap<T> = Arc<dyn Fn(usize, &[&[f64]]) -> T + Send + Sync>;
pub type Combine<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

/// `arrays[out][i] = body(i, [arrays[inputs[0]], ...])` for every `i`.
#[derive(Clone)]
pub struct MapStep {
    out: usize,
    inputs: Vec<usize>,
    body: MapBody,
}

impl MapStep {
    pub fn new<F>(out: usize, inputs: impl IntoIterator<Item = usize>, body: F) -> Self
    where
        F: Fn(usize, &[&[f64]]) -> f64 + Send + Sync + 'static,
    {
        Self {
            out,
            inputs: inputs.into_iter().collect(),
            body: Arc::new(body),
        }
    }
}

/// Folds `map(i, inputs)` over `0..len` with an associative `combine`.
#[derive(Clone)]
pub struct ReduceStep<T> {
    len: usize,
    inputs: Vec<usize>,
    identity: T,
    map: ReduceMap<T>,
    combine: Combine<T>,
    tree: bool,
}

impl<T> ReduceStep<T> {
    pub fn new<M, C>(
        len: usize,
        inputs: impl IntoIterator<Item = usize>,
        identity: T,
        map: M,
        combine: C,
    ) -> Self
    where
        M: Fn(usize, &[&[f64]]) -> T + Send + Sync + 'static,
        C: Fn(T, T) -> T + Send + Sync + 'static,
    {
        Self {
            len,
            inputs: inputs.into_iter().collect(),
            identity,
            map: Arc::new(map),
            combine: Arc::new(combine),
            tree: false,
        }
    }

    /// Base device variants reduce each block through a shared scratch tree
    /// instead of a sequential per-block fold.
    pub fn with_tree_reduction(mut self) -> Self {
        self.tree = true;
        self
    }
}

/// Everything a variant needs to execute steps, detached from the context so
/// the context's timer stays free to borrow mutably.
pub struct ExecTarget {
    variant: VariantId,
    pool: HostPool,
    device: Option<DynDevice>,
    block: usize,
}

impl ExecTarget {
    pub fn resolve(variant: VariantId, tuning: &Tuning, ctx: &RunContext) -> Result<Self> {
        let (device, block) = if variant.is_device() {
            let device = ctx
                .device_for(variant)
                .cloned()
                .ok_or_else(|| anyhow!("no device available for {variant}"))?;
            let Some(block) = tuning.block_size else {
                bail!("{variant} needs a block size, got tuning '{}'", tuning.name);
            };
            (Some(device), block)
        } else {
            (None, 0)
        };

        Ok(Self {
            variant,
            pool: ctx.pool.clone(),
            device,
            block,
        })
    }

    pub fn variant(&self) -> VariantId {
        self.variant
    }

    /// Device to synchronise before stopping the timer.
    pub fn device(&self) -> Option<&dyn Device> {
        self.device.as_deref()
    }

    fn dyn_device(&self) -> Result<&DynDevice> {
        self.device
            .as_ref()
            .ok_or_else(|| anyhow!("{} has no device", self.variant))
    }

    pub fn map(&self, arrays: &mut ArraySet, step: &MapStep) -> Result<()> {
        ensure!(
            !step.inputs.contains(&step.out),
            "array {} is both read and written by one step",
            step.out
        );
        if self.variant.is_device() {
            self.map_device(arrays, step)
        } else {
            let mut out = arrays.take_host(step.out)?;
            let result = self.map_host(arrays, step, &mut out);
            arrays.restore_host(step.out, out)?;
            result
        }
    }

    #[allow(clippy::needless_range_loop)]
    fn map_host(&self, arrays: &ArraySet, step: &MapStep, out: &mut [f64]) -> Result<()> {
        let views = arrays.host_views(&step.inputs)?;
        let body = step.body.as_ref();
        let f = |i: usize| body(i, views.as_slice());

        match self.variant {
            VariantId::BaseSeq => {
                for i in 0..out.len() {
                    out[i] = f(i);
                }
            }
            VariantId::LambdaSeq => out
                .iter_mut()
                .enumerate()
                .for_each(|(i, slot)| *slot = f(i)),
            VariantId::LibrarySeq => SeqExec.forall_map(out, f),
            VariantId::BaseThreads => self.pool.install(|| {
                out.par_iter_mut()
                    .enumerate()
                    .for_each(|(i, slot)| *slot = f(i))
            }),
            VariantId::LambdaThreads => {
                let chunk = static_chunk(out.len(), self.pool.threads());
                self.pool.install(|| {
                    out.par_chunks_mut(chunk).enumerate().for_each(|(c, part)| {
                        for (k, slot) in part.iter_mut().enumerate() {
                            *slot = f(c * chunk + k);
                        }
                    })
                })
            }
            VariantId::LibraryThreads => self.pool.install(|| ParExec.forall_map(out, f)),
            other => return Err(anyhow!("{other} is not a host variant")),
        }
        Ok(())
    }

    fn map_device(&self, arrays: &ArraySet, step: &MapStep) -> Result<()> {
        let device = self.dyn_device()?;
        let out = arrays
            .device_buffers(&[step.out])?
            .pop()
            .ok_or_else(|| anyhow!("missing output buffer"))?;
        let inputs = arrays.device_buffers(&step.inputs)?;
        let body = Arc::clone(&step.body);

        match self.variant.flavor() {
            Flavor::Base => {
                let config = LaunchConfig::for_len(out.len(), self.block);
                device.launch(
                    config,
                    Box::new(move || {
                        let guards: Vec<_> = inputs.iter().map(DeviceBuffer::read).collect();
                        let views: Vec<&[f64]> = guards.iter().map(|g| g.as_slice()).collect();
                        let mut target = out.write();
                        map_blocks(&mut target, config.block, |i| {
                            body(i, views.as_slice())
                        });
                        Ok(())
                    }),
                )?;
            }
            _ => {
                DeviceExec::new(Arc::clone(device), self.block)
                    .forall_map(&out, &inputs, move |i, views| body(i, views))?;
            }
        }
        Ok(())
    }

    /// Runs one reduction and returns its value. Device reductions wait for
    /// the stream, as a device-to-host result copy would.
    pub fn reduce<T>(&self, arrays: &ArraySet, step: &ReduceStep<T>) -> Result<T>
    where
        T: Copy + Send + Sync + 'static,
    {
        if self.variant.is_device() {
            self.reduce_device(arrays, step)
        } else {
            self.reduce_host(arrays, step)
        }
    }

    fn reduce_host<T>(&self, arrays: &ArraySet, step: &ReduceStep<T>) -> Result<T>
    where
        T: Copy + Send + Sync,
    {
        let views = arrays.host_views(&step.inputs)?;
        let map = step.map.as_ref();
        let combine = step.combine.as_ref();
        let f = |i: usize| map(i, views.as_slice());
        let (len, identity) = (step.len, step.identity);

        let value = match self.variant {
            VariantId::BaseSeq => {
                let mut acc = identity;
                for i in 0..len {
                    acc = combine(acc, f(i));
                }
                acc
            }
            VariantId::LambdaSeq => (0..len).map(f).fold(identity, combine),
            VariantId::LibrarySeq => SeqExec.forall_reduce(len, identity, f, combine),
            VariantId::BaseThreads => self
                .pool
                .install(|| (0..len).into_par_iter().map(f).reduce(|| identity, combine)),
            VariantId::LambdaThreads => {
                let chunk = static_chunk(len, self.pool.threads());
                let partials: Vec<T> = self.pool.install(|| {
                    (0..len.div_ceil(chunk))
                        .into_par_iter()
                        .map(|c| {
                            let end = ((c + 1) * chunk).min(len);
                            (c * chunk..end).map(f).fold(identity, combine)
                        })
                        .collect()
                });
                partials.into_iter().fold(identity, combine)
            }
            VariantId::LibraryThreads => self
                .pool
                .install(|| ParExec.forall_reduce(len, identity, f, combine)),
            other => return Err(anyhow!("{other} is not a host variant")),
        };
        Ok(value)
    }

    fn reduce_device<T>(&self, arrays: &ArraySet, step: &ReduceStep<T>) -> Result<T>
    where
        T: Copy + Send + Sync + 'static,
    {
        let device = self.dyn_device()?;
        let inputs = arrays.device_buffers(&step.inputs)?;
        let map = Arc::clone(&step.map);
        let combine = Arc::clone(&step.combine);
        let (len, identity) = (step.len, step.identity);

        let reduction = match self.variant.flavor() {
            Flavor::Base => {
                let slot = Arc::new(Mutex::new(None));
                let result = Arc::clone(&slot);
                let (block, tree) = (self.block, step.tree);
                device.launch(
                    LaunchConfig::for_len(len, block),
                    Box::new(move || {
                        let guards: Vec<_> = inputs.iter().map(DeviceBuffer::read).collect();
                        let views: Vec<&[f64]> = guards.iter().map(|g| g.as_slice()).collect();
                        let f = |i: usize| map(i, views.as_slice());
                        let c = |a: T, b: T| combine(a, b);
                        let value = if tree {
                            reduce_blocks_tree(len, block, identity, f, c)?
                        } else {
                            reduce_blocks(len, block, identity, f, c)
                        };
                        *result.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
                        Ok(())
                    }),
                )?;
                DeviceReduction::new(Arc::clone(device), slot)
            }
            _ => DeviceExec::new(Arc::clone(device), self.block).forall_reduce(
                len,
                &inputs,
                identity,
                move |i, views| map(i, views),
                move |a, b| combine(a, b),
            )?,
        };
        Ok(reduction.get()?)
    }
}

fn static_chunk(len: usize, threads: usize) -> usize {
    len.div_ceil(threads.max(1)).max(1)
}

/// Convenience for kernels whose repetition is a fixed list of maps.
pub fn run_map_steps(
    variant: VariantId,
    tuning: &Tuning,
    ctx: &mut RunContext,
    reps: usize,
    arrays: &mut ArraySet,
    steps: &[MapStep],
) -> Result<()> {
    let target = ExecTarget::resolve(variant, tuning, ctx)?;
    crate::utils::timed_reps(&mut ctx.timer, target.device(), reps, |_| {
        steps.iter().try_for_each(|step| target.map(arrays, step))
    })
}
