//! Launch geometry planning.

use crate::device::{DeviceError, DeviceLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: usize,
    pub block: usize,
}

impl LaunchConfig {
    /// One thread per element, `ceil(len / block)` blocks.
    pub fn for_len(len: usize, block: usize) -> Self {
        let block = block.max(1);
        Self {
            grid: len.div_ceil(block),
            block,
        }
    }

    pub fn threads(&self) -> usize {
        self.grid * self.block
    }
}

pub struct LaunchPlanner {
    limits: DeviceLimits,
}

impl LaunchPlanner {
    pub fn new(limits: DeviceLimits) -> Self {
        Self { limits }
    }

    pub fn check_block(&self, block: usize) -> Result<(), DeviceError> {
        if block == 0 {
            return Err(DeviceError::LaunchFailed {
                reason: "block size must be > 0".into(),
            });
        }
        if block > self.limits.max_block_size {
            return Err(DeviceError::BlockSizeExceeded {
                block,
                max: self.limits.max_block_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_covers_every_element() {
        let config = LaunchConfig::for_len(1000, 256);
        assert_eq!(config.grid, 4);
        assert!(config.threads() >= 1000);

        assert_eq!(LaunchConfig::for_len(1024, 256).grid, 4);
        assert_eq!(LaunchConfig::for_len(0, 128).grid, 0);
    }

    #[test]
    fn planner_rejects_oversized_blocks() {
        let planner = LaunchPlanner::new(DeviceLimits {
            max_block_size: 1024,
            memory_bytes: 1 << 20,
        });
        assert!(planner.check_block(1024).is_ok());
        assert_eq!(
            planner.check_block(9999),
            Err(DeviceError::BlockSizeExceeded {
                block: 9999,
                max: 1024
            })
        );
        assert!(planner.check_block(0).is_err());
    }
}
