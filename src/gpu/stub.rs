//! In-memory device registry.
//!
//! Used by tests, benchmarks and the `stub` backend of the CLI. Free-memory
//! readings can be scripted per device so waiting behaviour is reproducible,
//! and every query is recorded so callers can assert on polling order.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::gpu::device::{GpuDevice, GIB};
use crate::gpu::registry::{DeviceRegistry, GpuError};

/// Static description of a stub device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubDeviceSpec {
    /// Device name.
    pub name: String,

    /// Total VRAM in bytes.
    pub total_vram: u64,

    /// Free VRAM in bytes.
    pub free_vram: u64,
}

impl StubDeviceSpec {
    pub fn new(name: impl Into<String>, total_vram: u64, free_vram: u64) -> Self {
        Self {
            name: name.into(),
            total_vram,
            free_vram,
        }
    }
}

#[derive(Debug)]
struct StubDevice {
    spec: StubDeviceSpec,

    /// Upcoming readings. The last one sticks once the script runs out.
    readings: RefCell<VecDeque<u64>>,
}

impl StubDevice {
    fn next_reading(&self) -> u64 {
        let mut readings = self.readings.borrow_mut();
        if readings.len() > 1 {
            readings.pop_front().unwrap_or(self.spec.free_vram)
        } else {
            readings.front().copied().unwrap_or(self.spec.free_vram)
        }
    }
}

/// A fake registry backed by [`StubDeviceSpec`]s.
#[derive(Debug)]
pub struct StubRegistry {
    devices: Vec<StubDevice>,

    /// Physical indices currently visible, in order.
    visible: Vec<usize>,

    /// Physical indices with memory growth enabled.
    growth: BTreeSet<usize>,

    /// Physical indices passed to `free_memory`, in call order.
    queries: RefCell<Vec<usize>>,
}

impl StubRegistry {
    /// All devices start visible, each reading its spec's `free_vram`.
    pub fn new(specs: Vec<StubDeviceSpec>) -> Self {
        let visible = (0..specs.len()).collect();
        let devices = specs
            .into_iter()
            .map(|spec| StubDevice {
                readings: RefCell::new(VecDeque::from([spec.free_vram])),
                spec,
            })
            .collect();

        Self {
            devices,
            visible,
            growth: BTreeSet::new(),
            queries: RefCell::new(Vec::new()),
        }
    }

    /// Devices with the given free memory, named "Stub GPU {i}" with 24 GiB total.
    pub fn with_free_memory(free: &[u64]) -> Self {
        Self::new(
            free.iter()
                .enumerate()
                .map(|(i, &f)| StubDeviceSpec::new(format!("Stub GPU {i}"), 24 * GIB, f))
                .collect(),
        )
    }

    /// Script the successive readings of one device.
    ///
    /// Each `free_memory` call consumes one reading; the final reading is
    /// returned for every call after that.
    pub fn script_readings(&mut self, index: usize, readings: impl IntoIterator<Item = u64>) {
        if let Some(device) = self.devices.get(index) {
            let script: VecDeque<u64> = readings.into_iter().collect();
            if !script.is_empty() {
                *device.readings.borrow_mut() = script;
            }
        }
    }

    /// Physical indices queried so far, in order.
    pub fn queries(&self) -> Vec<usize> {
        self.queries.borrow().clone()
    }

    pub fn clear_queries(&self) {
        self.queries.borrow_mut().clear();
    }

    pub fn memory_growth_enabled(&self, index: usize) -> bool {
        self.growth.contains(&index)
    }

    pub fn total_memory(&self, index: usize) -> Option<u64> {
        self.devices.get(index).map(|d| d.spec.total_vram)
    }

    fn device(&self, index: usize) -> GpuDevice {
        GpuDevice::new(index, self.devices[index].spec.name.clone())
    }
}

impl DeviceRegistry for StubRegistry {
    fn physical_devices(&self) -> Result<Vec<GpuDevice>, GpuError> {
        Ok((0..self.devices.len()).map(|i| self.device(i)).collect())
    }

    fn visible_devices(&self) -> Result<Vec<GpuDevice>, GpuError> {
        Ok(self.visible.iter().map(|&i| self.device(i)).collect())
    }

    fn set_visible_devices(&mut self, devices: &[GpuDevice]) -> Result<(), GpuError> {
        if let Some(missing) = devices.iter().find(|d| d.index >= self.devices.len()) {
            return Err(GpuError::DeviceNotFound(missing.index));
        }
        self.visible = devices.iter().map(|d| d.index).collect();
        debug!(visible = ?self.visible, "Stub visible devices set");
        Ok(())
    }

    fn set_memory_growth(&mut self, device: &GpuDevice, enabled: bool) -> Result<(), GpuError> {
        if device.index >= self.devices.len() {
            return Err(GpuError::DeviceNotFound(device.index));
        }
        if enabled {
            self.growth.insert(device.index);
        } else {
            self.growth.remove(&device.index);
        }
        Ok(())
    }

    fn free_memory(&self, index: usize) -> Result<u64, GpuError> {
        let device = self
            .devices
            .get(index)
            .ok_or(GpuError::DeviceNotFound(index))?;
        self.queries.borrow_mut().push(index);
        Ok(device.next_reading())
    }
}

/// Simulated dev box: 2x GTX 1070 (8 GB each).
pub fn stub_devices_molly() -> Vec<StubDeviceSpec> {
    vec![
        StubDeviceSpec::new("NVIDIA GeForce GTX 1070", 8 * GIB, 7 * GIB),
        StubDeviceSpec::new("NVIDIA GeForce GTX 1070", 8 * GIB, 7 * GIB),
    ]
}

/// Simulated workstation: 2x Quadro M6000 (24 GB each), the second one busy.
pub fn stub_devices_wintermute() -> Vec<StubDeviceSpec> {
    vec![
        StubDeviceSpec::new("NVIDIA Quadro M6000", 24 * GIB, 22 * GIB),
        StubDeviceSpec::new("NVIDIA Quadro M6000", 24 * GIB, 3 * GIB),
    ]
}
