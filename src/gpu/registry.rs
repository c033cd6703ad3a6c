//! The device registry: the process's view of physical and visible GPUs.
//!
//! Everything that touches the driver goes through [`DeviceRegistry`], so the
//! selection, restriction and waiting policies can run against a stub in
//! tests and against NVML in production.

use thiserror::Error;

use crate::gpu::device::{format_devices, GpuDevice};

#[derive(Error, Debug)]
pub enum GpuError {
    #[error(
        "Can't use device(s) {indices:?}: index is out of range. Physical GPU devices are {}",
        format_devices(.physical)
    )]
    OutOfRangeIndex {
        indices: Vec<i64>,
        physical: Vec<GpuDevice>,
    },

    #[error("Visible device count {visible} does not match the {requested} requested device(s)")]
    InternalInconsistency { requested: usize, visible: usize },

    #[error("No visible GPU devices to reserve")]
    NoVisibleDevices,

    #[error("Device {0} not found")]
    DeviceNotFound(usize),

    #[error("NVML is not available on this machine")]
    NvmlUnavailable,

    #[error("GPU backend error: {0}")]
    Backend(String),
}

/// Access to the accelerators of this process.
///
/// `physical_devices` never changes during a session. `visible_devices` is the
/// subset the workload may use and is narrowed by `set_visible_devices`,
/// which must either apply the whole list or fail without changes.
pub trait DeviceRegistry {
    /// All physically present devices, in driver enumeration order.
    fn physical_devices(&self) -> Result<Vec<GpuDevice>, GpuError>;

    /// Currently visible devices, in visibility order.
    fn visible_devices(&self) -> Result<Vec<GpuDevice>, GpuError>;

    /// Make exactly `devices` visible, in the given order.
    fn set_visible_devices(&mut self, devices: &[GpuDevice]) -> Result<(), GpuError>;

    /// Enable or disable grow-as-needed allocation on a device. Idempotent.
    fn set_memory_growth(&mut self, device: &GpuDevice, enabled: bool) -> Result<(), GpuError>;

    /// Fresh free-memory reading in bytes for a physical device index.
    fn free_memory(&self, index: usize) -> Result<u64, GpuError>;
}

impl<R: DeviceRegistry + ?Sized> DeviceRegistry for Box<R> {
    fn physical_devices(&self) -> Result<Vec<GpuDevice>, GpuError> {
        (**self).physical_devices()
    }

    fn visible_devices(&self) -> Result<Vec<GpuDevice>, GpuError> {
        (**self).visible_devices()
    }

    fn set_visible_devices(&mut self, devices: &[GpuDevice]) -> Result<(), GpuError> {
        (**self).set_visible_devices(devices)
    }

    fn set_memory_growth(&mut self, device: &GpuDevice, enabled: bool) -> Result<(), GpuError> {
        (**self).set_memory_growth(device, enabled)
    }

    fn free_memory(&self, index: usize) -> Result<u64, GpuError> {
        (**self).free_memory(index)
    }
}
