//! Shared helpers for kernel implementations.

use crate::timer::Timer;
use anyhow::Result;
use perfsweep_backend_gpu::Device;

/// Runs `rep` `reps` times between `timer.start()` and `timer.stop()`.
///
/// When `sync` is given the device is synchronised before the timer stops,
/// on success and on failure alike, so asynchronous work is always inside
/// the measured interval and never left running. The first error wins.
pub fn timed_reps<F>(
    timer: &mut Timer,
    sync: Option<&dyn Device>,
    reps: usize,
    mut rep: F,
) -> Result<()>
where
    F: FnMut(usize) -> Result<()>,
{
    timer.start();
    let mut outcome = (0..reps).try_for_each(&mut rep);
    if let Some(device) = sync {
        let drained = device.synchronize().map_err(anyhow::Error::from);
        outcome = outcome.and(drained);
    }
    timer.stop();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use perfsweep_backend_gpu::{DeviceLimits, EmulatedDevice, LaunchConfig};

    #[test]
    fn counts_reps_and_stops_timer() {
        let mut timer = Timer::new();
        let mut seen = 0;
        timed_reps(&mut timer, None, 4, |_| {
            seen += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, 4);
        assert!(!timer.is_running());
    }

    #[test]
    fn failure_still_stops_timer_and_drains_device() {
        let device = EmulatedDevice::new("sync-test", DeviceLimits::default()).unwrap();
        let mut timer = Timer::new();
        let err = timed_reps(&mut timer, Some(&device), 3, |rep| {
            device.launch(LaunchConfig::for_len(1, 1), Box::new(|| Ok(())))?;
            if rep == 1 {
                bail!("rep {rep} failed");
            }
            Ok(())
        })
        .unwrap_err();

        assert!(err.to_string().contains("rep 1"));
        assert!(!timer.is_running());
        assert!(device.is_idle());
    }
}
