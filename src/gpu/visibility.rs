//! Restrict the workload to a subset of GPUs.
//!
//! Restriction is meant to happen once per process, before any framework
//! allocates on the devices. Changing visibility afterwards is not guarded
//! against here but most runtimes reject it.

use tracing::{error, info};

use crate::gpu::device::{format_devices, DeviceSelection, GpuDevice};
use crate::gpu::registry::{DeviceRegistry, GpuError};

/// Make exactly the selected devices visible and enable memory growth on them.
///
/// `selection` may be a single index or a list; `-1` selects every physical
/// device. Devices become visible in the requested order, and that order is
/// returned so it can be passed on to [`await_memory`].
///
/// # Errors
///
/// - [`GpuError::OutOfRangeIndex`] if any index is not a physical device.
///   Nothing is changed in that case.
/// - [`GpuError::InternalInconsistency`] if the registry reports a different
///   number of visible devices than requested after the change.
///
/// [`await_memory`]: crate::gpu::waiter::await_memory
pub fn restrict<R>(
    registry: &mut R,
    selection: impl Into<DeviceSelection>,
) -> Result<Vec<GpuDevice>, GpuError>
where
    R: DeviceRegistry + ?Sized,
{
    let selection = selection.into();
    let physical = registry.physical_devices()?;

    let indices = selection.resolve(&physical).map_err(|e| {
        if let GpuError::OutOfRangeIndex { indices, physical } = &e {
            error!(
                requested = %selection,
                out_of_range = ?indices,
                physical = %format_devices(physical),
                "Can't use device(s): index is out of range"
            );
        }
        e
    })?;

    let requested: Vec<GpuDevice> = indices.iter().map(|&i| physical[i].clone()).collect();
    registry.set_visible_devices(&requested)?;

    let visible = registry.visible_devices()?;
    if visible.len() != requested.len() {
        return Err(GpuError::InternalInconsistency {
            requested: requested.len(),
            visible: visible.len(),
        });
    }

    for device in &visible {
        registry.set_memory_growth(device, true)?;
        info!(device = device.index, name = %device.name, "Using and enabling memory growth on device {device}");
    }

    Ok(visible)
}
