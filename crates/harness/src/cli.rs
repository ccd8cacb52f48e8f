//! CLI wiring for perfsweep.

use crate::executor::Executor;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use perfsweep_kernels::{KernelRegistry, RunParams, VariantId};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "perfsweep", about = "Kernel x variant x tuning performance sweeps")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the sweep and print timing and checksum tables.
    Run(RunArgs),
    /// List registered kernels with their default size and reps.
    ListKernels,
    /// List every variant and whether this build can run it.
    ListVariants,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON run parameters; flags override values from the file.
    #[arg(long)]
    pub params: Option<PathBuf>,
    /// Write the JSON sweep report here.
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub size: Option<usize>,
    #[arg(long)]
    pub size_factor: Option<f64>,
    #[arg(long)]
    pub reps: Option<usize>,
    #[arg(long)]
    pub reps_factor: Option<f64>,
    #[arg(long)]
    pub npasses: Option<usize>,
    /// Kernels, short names or groups to run.
    #[arg(long, value_delimiter = ',')]
    pub kernels: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub exclude_kernels: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub variants: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub exclude_variants: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub gpu_block_sizes: Vec<usize>,
    #[arg(long)]
    pub checksum_tolerance: Option<f64>,
    /// Host pool width; 0 lets the pool decide.
    #[arg(long)]
    pub threads: Option<usize>,
    #[arg(long)]
    pub device_max_block_size: Option<usize>,
    #[arg(long)]
    pub device_memory_bytes: Option<usize>,
    /// Print the combinations that would run and exit.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

impl RunArgs {
    /// Merges flags over the parameter file, or over defaults without one.
    pub fn to_params(&self) -> Result<RunParams> {
        let mut params = match &self.params {
            Some(path) => RunParams::load_from_file(path)?,
            None => RunParams::default(),
        };

        if self.size.is_some() {
            params.size = self.size;
        }
        if let Some(factor) = self.size_factor {
            params.size_factor = factor;
        }
        if self.reps.is_some() {
            params.reps = self.reps;
        }
        if let Some(factor) = self.reps_factor {
            params.reps_factor = factor;
        }
        if let Some(npasses) = self.npasses {
            params.npasses = npasses;
        }
        if !self.kernels.is_empty() {
            params.kernels = self.kernels.clone();
        }
        if !self.exclude_kernels.is_empty() {
            params.exclude_kernels = self.exclude_kernels.clone();
        }
        if !self.variants.is_empty() {
            params.variants = parse_variants(&self.variants)?;
        }
        if !self.exclude_variants.is_empty() {
            params.exclude_variants = parse_variants(&self.exclude_variants)?;
        }
        if !self.gpu_block_sizes.is_empty() {
            params.gpu_block_sizes = Some(self.gpu_block_sizes.clone());
        }
        if let Some(tolerance) = self.checksum_tolerance {
            params.checksum_tolerance = tolerance;
        }
        if let Some(threads) = self.threads {
            params.threads = threads;
        }
        if let Some(block) = self.device_max_block_size {
            params.device_max_block_size = block;
        }
        if let Some(bytes) = self.device_memory_bytes {
            params.device_memory_bytes = bytes;
        }
        params.dry_run |= self.dry_run;

        params.validate()?;
        Ok(params)
    }
}

fn parse_variants(names: &[String]) -> Result<Vec<VariantId>> {
    names
        .iter()
        .map(|name| {
            name.parse::<VariantId>()
                .with_context(|| format!("invalid variant selection '{name}'"))
        })
        .collect()
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match cli.command {
        Command::Run(args) => {
            let params = args.to_params()?;
            let dry_run = params.dry_run;
            let mut executor = Executor::new(params)?;

            if dry_run {
                for planned in executor.plan() {
                    let action = if planned.supported {
                        "run"
                    } else {
                        "skip (unsupported)"
                    };
                    println!(
                        "{:<18} {:<18} {:<11} {}",
                        planned.kernel, planned.variant, planned.tuning.name, action
                    );
                }
                return Ok(());
            }

            let report = executor.run()?;
            print!("{}", report.summary_table());
            println!();
            print!("{}", report.checksum_report());

            if let Some(path) = &args.output {
                report.save_to_file(path)?;
                info!(path = %path.display(), records = report.records.len(), "wrote sweep report");
            }
        }
        Command::ListKernels => {
            let registry = KernelRegistry::with_default_kernels(&RunParams::default());
            for kernel in registry.kernels() {
                let desc = kernel.descriptor();
                println!(
                    "{:<18} size={:<10} reps={:<6} variants={}",
                    desc.full_name(),
                    desc.default_size(),
                    desc.default_reps(),
                    desc.variants().len()
                );
            }
        }
        Command::ListVariants => {
            for variant in VariantId::ALL {
                let status = if variant.backend().is_compiled() {
                    "compiled"
                } else {
                    "not compiled"
                };
                println!("{variant:<18} {status}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "perfsweep",
            "run",
            "--size",
            "1000",
            "--variants",
            "Base_Seq,lambda_threads",
            "--gpu-block-sizes",
            "64,128",
            "--npasses",
            "2",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let params = args.to_params().unwrap();
        assert_eq!(params.size, Some(1000));
        assert_eq!(
            params.variants,
            vec![VariantId::BaseSeq, VariantId::LambdaThreads]
        );
        assert_eq!(params.gpu_block_sizes, Some(vec![64, 128]));
        assert_eq!(params.npasses, 2);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let args = RunArgs {
            variants: vec!["Base_Cuda".into()],
            ..RunArgs::default()
        };
        assert!(args.to_params().is_err());
    }
}
