//! One-shot reservation: pick the freeest visible GPU, wait for it, take it.

use std::time::Duration;

use tracing::info;

use crate::gpu::device::{to_gib, GpuDevice};
use crate::gpu::registry::{DeviceRegistry, GpuError};
use crate::gpu::selector::select_freeest;
use crate::gpu::visibility::restrict;
use crate::gpu::waiter::{await_memory, Sleeper};

/// Select the visible device with the most free memory, block until it has
/// `min_bytes` free, then restrict the workload to it.
///
/// Returns the restricted device set (always one device). Fails with
/// [`GpuError::NoVisibleDevices`] instead of falling back to device 0 when
/// nothing is visible.
pub fn reserve_freeest<R, S>(
    registry: &mut R,
    sleeper: &mut S,
    min_bytes: u64,
    interval: Duration,
) -> Result<Vec<GpuDevice>, GpuError>
where
    R: DeviceRegistry + ?Sized,
    S: Sleeper + ?Sized,
{
    if registry.visible_devices()?.is_empty() {
        return Err(GpuError::NoVisibleDevices);
    }

    let (index, free) = select_freeest(&*registry)?;
    await_memory(&*registry, sleeper, index, min_bytes, interval)?;
    let reserved = restrict(registry, index)?;

    info!(
        device = index,
        free_bytes = free,
        min_bytes,
        "Reserved GPU {} (needed {:.2} GiB)",
        index,
        to_gib(min_bytes)
    );
    Ok(reserved)
}
