//! Block until GPUs have enough free memory.
//!
//! Devices are checked one after another: the next device is only polled once
//! the current one has reached the threshold. There is no timeout; the
//! expected fix for a busy GPU is freeing memory from outside.

use std::time::Duration;

use tracing::{debug, warn};

use crate::gpu::device::{to_gib, DeviceSelection};
use crate::gpu::registry::{DeviceRegistry, GpuError};

/// Default time between free-memory checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Suspends the calling thread between polls.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Wall-clock sleeping via [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Wait until every selected device reports at least `min_bytes` free.
///
/// `selection` accepts a single index, a list, or `-1` for all physical
/// devices (regardless of current visibility). Each device is read, and while
/// it is below the threshold a warning is logged and `sleeper` waits
/// `interval` before reading again.
///
/// Only registry failures (including an out-of-range index) are returned;
/// insufficient memory is never an error.
pub fn await_memory<R, S>(
    registry: &R,
    sleeper: &mut S,
    selection: impl Into<DeviceSelection>,
    min_bytes: u64,
    interval: Duration,
) -> Result<(), GpuError>
where
    R: DeviceRegistry + ?Sized,
    S: Sleeper + ?Sized,
{
    let selection = selection.into();
    let indices = selection.resolve(&registry.physical_devices()?)?;

    for device in indices {
        let mut avail = registry.free_memory(device)?;
        while avail < min_bytes {
            warn!(
                device,
                free_bytes = avail,
                min_bytes,
                interval_secs = interval.as_secs_f64(),
                "Device {} has {:.2} GiB left, but at least {:.2} GiB are needed to start. \
                 Waiting {:?} to see if it frees up...",
                device,
                to_gib(avail),
                to_gib(min_bytes),
                interval
            );
            sleeper.sleep(interval);
            avail = registry.free_memory(device)?;
        }
        debug!(device, free_bytes = avail, "Device has enough free memory");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::GIB;
    use crate::gpu::stub::StubRegistry;

    #[derive(Default)]
    struct CountingSleeper {
        calls: Vec<Duration>,
    }

    impl Sleeper for CountingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.calls.push(duration);
        }
    }

    #[test]
    fn test_enough_memory_no_sleep() {
        let reg = StubRegistry::with_free_memory(&[8 * GIB]);
        let mut sleeper = CountingSleeper::default();

        await_memory(&reg, &mut sleeper, 0i64, 4 * GIB, DEFAULT_POLL_INTERVAL).unwrap();
        assert!(sleeper.calls.is_empty());
        assert_eq!(reg.queries(), vec![0]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let reg = StubRegistry::with_free_memory(&[4 * GIB]);
        let mut sleeper = CountingSleeper::default();

        await_memory(&reg, &mut sleeper, 0i64, 4 * GIB, DEFAULT_POLL_INTERVAL).unwrap();
        assert!(sleeper.calls.is_empty());
    }

    #[test]
    fn test_sleeps_until_freed() {
        let mut reg = StubRegistry::with_free_memory(&[0]);
        reg.script_readings(0, [GIB, 2 * GIB, 4 * GIB]);
        let mut sleeper = CountingSleeper::default();

        let interval = Duration::from_secs(5);
        await_memory(&reg, &mut sleeper, 0i64, 4 * GIB, interval).unwrap();
        assert_eq!(sleeper.calls, vec![interval, interval]);
        assert_eq!(reg.queries().len(), 3);
    }

    #[test]
    fn test_zero_threshold() {
        let reg = StubRegistry::with_free_memory(&[0, 0]);
        let mut sleeper = CountingSleeper::default();

        await_memory(&reg, &mut sleeper, -1i64, 0, DEFAULT_POLL_INTERVAL).unwrap();
        assert!(sleeper.calls.is_empty());
        assert_eq!(reg.queries(), vec![0, 1]);
    }

    #[test]
    fn test_out_of_range_fails_before_polling() {
        let reg = StubRegistry::with_free_memory(&[GIB]);
        let mut sleeper = CountingSleeper::default();

        let err = await_memory(&reg, &mut sleeper, 3i64, GIB, DEFAULT_POLL_INTERVAL);
        assert!(matches!(err, Err(GpuError::OutOfRangeIndex { .. })));
        assert!(reg.queries().is_empty());
    }
}
