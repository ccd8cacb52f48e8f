//! Execution variant identity.

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a variant executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Backend {
    Sequential,
    Threads,
    GpuA,
    GpuB,
    Offload,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::Sequential,
        Backend::Threads,
        Backend::GpuA,
        Backend::GpuB,
        Backend::Offload,
    ];

    /// Whether this build carries the backend at all.
    pub fn is_compiled(self) -> bool {
        match self {
            Backend::Sequential => true,
            Backend::Threads => cfg!(feature = "threads"),
            Backend::GpuA => cfg!(feature = "gpu-a"),
            Backend::GpuB => cfg!(feature = "gpu-b"),
            Backend::Offload => cfg!(feature = "offload"),
        }
    }

    /// Device-resident backends need a `Device` and synchronisation.
    pub fn is_device(self) -> bool {
        matches!(self, Backend::GpuA | Backend::GpuB | Backend::Offload)
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Sequential => "Seq",
            Backend::Threads => "Threads",
            Backend::GpuA => "GpuA",
            Backend::GpuB => "GpuB",
            Backend::Offload => "Offload",
        }
    }
}

/// How the kernel body is expressed within a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flavor {
    /// Hand-written loop or launch.
    Base,
    /// Closure-based loop.
    Lambda,
    /// Written against the portable `forall` layer.
    Library,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VariantId {
    #[serde(rename = "Base_Seq")]
    BaseSeq,
    #[serde(rename = "Lambda_Seq")]
    LambdaSeq,
    #[serde(rename = "Library_Seq")]
    LibrarySeq,
    #[serde(rename = "Base_Threads")]
    BaseThreads,
    #[serde(rename = "Lambda_Threads")]
    LambdaThreads,
    #[serde(rename = "Library_Threads")]
    LibraryThreads,
    #[serde(rename = "Base_GpuA")]
    BaseGpuA,
    #[serde(rename = "Library_GpuA")]
    LibraryGpuA,
    #[serde(rename = "Base_GpuB")]
    BaseGpuB,
    #[serde(rename = "Library_GpuB")]
    LibraryGpuB,
    #[serde(rename = "Base_Offload")]
    BaseOffload,
    #[serde(rename = "Library_Offload")]
    LibraryOffload,
}

impl VariantId {
    /// Declared order; the executor walks variants in this order.
    pub const ALL: [VariantId; 12] = [
        VariantId::BaseSeq,
        VariantId::LambdaSeq,
        VariantId::LibrarySeq,
        VariantId::BaseThreads,
        VariantId::LambdaThreads,
        VariantId::LibraryThreads,
        VariantId::BaseGpuA,
        VariantId::LibraryGpuA,
        VariantId::BaseGpuB,
        VariantId::LibraryGpuB,
        VariantId::BaseOffload,
        VariantId::LibraryOffload,
    ];

    pub fn backend(self) -> Backend {
        use VariantId::*;
        match self {
            BaseSeq | LambdaSeq | LibrarySeq => Backend::Sequential,
            BaseThreads | LambdaThreads | LibraryThreads => Backend::Threads,
            BaseGpuA | LibraryGpuA => Backend::GpuA,
            BaseGpuB | LibraryGpuB => Backend::GpuB,
            BaseOffload | LibraryOffload => Backend::Offload,
        }
    }

    pub fn flavor(self) -> Flavor {
        use VariantId::*;
        match self {
            BaseSeq | BaseThreads | BaseGpuA | BaseGpuB | BaseOffload => Flavor::Base,
            LambdaSeq | LambdaThreads => Flavor::Lambda,
            LibrarySeq | LibraryThreads | LibraryGpuA | LibraryGpuB | LibraryOffload => {
                Flavor::Library
            }
        }
    }

    pub fn name(self) -> &'static str {
        use VariantId::*;
        match self {
            BaseSeq => "Base_Seq",
            LambdaSeq => "Lambda_Seq",
            LibrarySeq => "Library_Seq",
            BaseThreads => "Base_Threads",
            LambdaThreads => "Lambda_Threads",
            LibraryThreads => "Library_Threads",
            BaseGpuA => "Base_GpuA",
            LibraryGpuA => "Library_GpuA",
            BaseGpuB => "Base_GpuB",
            LibraryGpuB => "Library_GpuB",
            BaseOffload => "Base_Offload",
            LibraryOffload => "Library_Offload",
        }
    }

    pub fn is_device(self) -> bool {
        self.backend().is_device()
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for VariantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VariantId::ALL
            .into_iter()
            .find(|variant| variant.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("unknown variant '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_case_insensitively() {
        for variant in VariantId::ALL {
            assert_eq!(variant.name().parse::<VariantId>().unwrap(), variant);
        }
        assert_eq!(
            "library_gpub".parse::<VariantId>().unwrap(),
            VariantId::LibraryGpuB
        );
        assert!("Lambda_GpuA".parse::<VariantId>().is_err());
    }

    #[test]
    fn serde_uses_display_names() {
        let json = serde_json::to_string(&VariantId::BaseOffload).unwrap();
        assert_eq!(json, "\"Base_Offload\"");
        let back: VariantId = serde_json::from_str("\"Lambda_Threads\"").unwrap();
        assert_eq!(back, VariantId::LambdaThreads);
    }

    #[test]
    fn no_lambda_flavour_on_devices() {
        assert!(VariantId::ALL
            .iter()
            .filter(|v| v.is_device())
            .all(|v| v.flavor() != Flavor::Lambda));
        assert!(Backend::Sequential.is_compiled());
    }
}
