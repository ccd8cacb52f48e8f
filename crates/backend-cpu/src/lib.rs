//! Host execution backend for perfsweep.

pub mod policy;
pub mod pool;

pub use policy::{ExecPolicy, ParExec, SeqExec};
pub use pool::HostPool;
