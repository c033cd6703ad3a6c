//! NVML-backed device registry.
//!
//! Free memory comes from NVML. Visibility and allocation policy are
//! process-level CUDA settings: restricting devices exports
//! `CUDA_VISIBLE_DEVICES` (with `CUDA_DEVICE_ORDER=PCI_BUS_ID` so CUDA and
//! NVML agree on numbering), and memory growth exports
//! `TF_FORCE_GPU_ALLOW_GROWTH=true`. Both are inherited by any framework
//! initialised later in this process or spawned as a child.

use std::collections::BTreeSet;

use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use tracing::{debug, info, warn};

use crate::gpu::device::{
    cuda_visible_devices, device_order_matches_nvml, parse_visible_devices, GpuDevice,
    ALLOW_GROWTH_VAR, DEVICE_ORDER_VAR, VISIBLE_DEVICES_VAR,
};
use crate::gpu::registry::{DeviceRegistry, GpuError};

/// Registry over the NVIDIA driver.
pub struct NvmlRegistry {
    nvml: Nvml,

    /// Physical devices, captured at init.
    physical: Vec<GpuDevice>,

    /// Physical indices currently visible.
    visible: Vec<usize>,

    growth: BTreeSet<usize>,
}

impl NvmlRegistry {
    /// Initialise NVML and enumerate devices.
    ///
    /// An already-set `CUDA_VISIBLE_DEVICES` narrows the initial visible set;
    /// entries that are not plain indices (UUIDs, MIG ids) are ignored. Its
    /// indices are taken as NVML (PCI bus) indices, with a warning unless
    /// `CUDA_DEVICE_ORDER=PCI_BUS_ID`.
    pub fn new() -> Result<Self, GpuError> {
        let nvml = Nvml::init().map_err(|e| match e {
            NvmlError::DriverNotLoaded | NvmlError::LibraryNotFound => GpuError::NvmlUnavailable,
            other => GpuError::Backend(format!("NVML init error: {other:?}")),
        })?;

        let count = nvml
            .device_count()
            .map_err(|e| GpuError::Backend(format!("Failed to get device count: {e:?}")))?;

        let mut physical = Vec::with_capacity(count as usize);
        for index in 0..count {
            let name = nvml
                .device_by_index(index)
                .and_then(|d| d.name())
                .unwrap_or_else(|e| {
                    warn!(device = index, error = ?e, "Could not read device name");
                    "unknown".to_string()
                });
            physical.push(GpuDevice::new(index as usize, name));
        }

        let visible = match std::env::var(VISIBLE_DEVICES_VAR) {
            Ok(value) => {
                let order = std::env::var(DEVICE_ORDER_VAR).ok();
                if !device_order_matches_nvml(order.as_deref()) {
                    warn!(
                        visible_devices = %value,
                        device_order = order.as_deref().unwrap_or("FASTEST_FIRST"),
                        "{} is set without {}=PCI_BUS_ID; its indices may name different GPUs than NVML's",
                        VISIBLE_DEVICES_VAR,
                        DEVICE_ORDER_VAR
                    );
                }
                parse_visible_devices(&value, physical.len())
            }
            Err(_) => (0..physical.len()).collect(),
        };

        info!(
            devices = physical.len(),
            visible = ?visible,
            "NVML initialized"
        );

        Ok(Self {
            nvml,
            physical,
            visible,
            growth: BTreeSet::new(),
        })
    }

    /// The value exported as `CUDA_VISIBLE_DEVICES`.
    pub fn visible_devices_env(&self) -> String {
        cuda_visible_devices(&self.visible)
    }
}

impl DeviceRegistry for NvmlRegistry {
    fn physical_devices(&self) -> Result<Vec<GpuDevice>, GpuError> {
        Ok(self.physical.clone())
    }

    fn visible_devices(&self) -> Result<Vec<GpuDevice>, GpuError> {
        Ok(self.visible.iter().map(|&i| self.physical[i].clone()).collect())
    }

    fn set_visible_devices(&mut self, devices: &[GpuDevice]) -> Result<(), GpuError> {
        if let Some(missing) = devices.iter().find(|d| d.index >= self.physical.len()) {
            return Err(GpuError::DeviceNotFound(missing.index));
        }
        self.visible = devices.iter().map(|d| d.index).collect();

        let value = self.visible_devices_env();
        std::env::set_var(DEVICE_ORDER_VAR, "PCI_BUS_ID");
        std::env::set_var(VISIBLE_DEVICES_VAR, &value);
        debug!(var = VISIBLE_DEVICES_VAR, value = %value, "Exported visible devices");
        Ok(())
    }

    fn set_memory_growth(&mut self, device: &GpuDevice, enabled: bool) -> Result<(), GpuError> {
        if device.index >= self.physical.len() {
            return Err(GpuError::DeviceNotFound(device.index));
        }
        if enabled {
            self.growth.insert(device.index);
        } else {
            self.growth.remove(&device.index);
        }

        // The CUDA-level switch is process wide.
        if self.growth.is_empty() {
            std::env::remove_var(ALLOW_GROWTH_VAR);
        } else {
            std::env::set_var(ALLOW_GROWTH_VAR, "true");
        }
        Ok(())
    }

    fn free_memory(&self, index: usize) -> Result<u64, GpuError> {
        let device = self
            .nvml
            .device_by_index(index as u32)
            .map_err(|e| match e {
                NvmlError::InvalidArg | NvmlError::NotFound => GpuError::DeviceNotFound(index),
                other => GpuError::Backend(format!("Device {index}: {other:?}")),
            })?;

        let memory = device
            .memory_info()
            .map_err(|e| GpuError::Backend(format!("Device {index} memory query: {e:?}")))?;

        Ok(memory.free)
    }
}
