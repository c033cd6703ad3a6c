//! Pick the visible GPU with the most free memory.

use tracing::info;

use crate::gpu::device::to_gib;
use crate::gpu::registry::{DeviceRegistry, GpuError};

/// Find the visible device with the most free memory.
///
/// Returns `(index, free_bytes)` where `index` is the device's physical index.
/// Ties go to the device seen first, so when every visible device is full the
/// first visible one is reported. With no visible devices the result is
/// `(0, 0)`.
///
/// Only visible devices are considered, so call this before
/// [`restrict`](crate::gpu::visibility::restrict) to search every GPU.
pub fn select_freeest<R>(registry: &R) -> Result<(usize, u64), GpuError>
where
    R: DeviceRegistry + ?Sized,
{
    let visible = registry.visible_devices()?;
    let mut freeest = (visible.first().map_or(0, |d| d.index), 0);
    for device in visible {
        let free = registry.free_memory(device.index)?;
        if free > freeest.1 {
            freeest = (device.index, free);
        }
    }

    info!(
        device = freeest.0,
        free_bytes = freeest.1,
        "Automatic detection found GPU {} to be the most free with {:.2} GiB",
        freeest.0,
        to_gib(freeest.1)
    );
    Ok(freeest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::GIB;
    use crate::gpu::stub::StubRegistry;

    #[test]
    fn test_picks_maximum() {
        let reg = StubRegistry::with_free_memory(&[2 * GIB, 9 * GIB, 4 * GIB]);
        assert_eq!(select_freeest(&reg).unwrap(), (1, 9 * GIB));
    }

    #[test]
    fn test_tie_keeps_first() {
        let reg = StubRegistry::with_free_memory(&[GIB, 5 * GIB, 5 * GIB, 5 * GIB]);
        assert_eq!(select_freeest(&reg).unwrap(), (1, 5 * GIB));
    }

    #[test]
    fn test_no_devices() {
        let reg = StubRegistry::with_free_memory(&[]);
        assert_eq!(select_freeest(&reg).unwrap(), (0, 0));
    }

    #[test]
    fn test_all_full_reports_first() {
        let reg = StubRegistry::with_free_memory(&[0, 0]);
        assert_eq!(select_freeest(&reg).unwrap(), (0, 0));
    }

    #[test]
    fn test_all_full_stays_within_visible() {
        let mut reg = StubRegistry::with_free_memory(&[0, 0, 0]);
        crate::gpu::visibility::restrict(&mut reg, 2i64).unwrap();
        assert_eq!(select_freeest(&reg).unwrap(), (2, 0));
    }

    #[test]
    fn test_queries_each_visible_device_once() {
        let reg = StubRegistry::with_free_memory(&[GIB, 2 * GIB, 3 * GIB]);
        select_freeest(&reg).unwrap();
        assert_eq!(reg.queries(), vec![0, 1, 2]);
    }
}
