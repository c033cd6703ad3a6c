//! Construct the device registry the configuration asks for.

use tracing::info;

use crate::config::{Backend, Config};
use crate::gpu::registry::DeviceRegistry;
use crate::gpu::stub::{stub_devices_molly, StubRegistry};

/// Open the configured registry.
///
/// The NVML backend needs the `nvml` feature; without it, asking for NVML is
/// an error rather than a silent fallback to fake devices.
pub fn open_registry(config: &Config) -> anyhow::Result<Box<dyn DeviceRegistry>> {
    match config.backend {
        Backend::Stub => {
            let specs = if config.stub_devices.is_empty() {
                stub_devices_molly()
            } else {
                config.stub_devices.clone()
            };
            info!(devices = specs.len(), "Using stub device registry");
            Ok(Box::new(StubRegistry::new(specs)))
        }
        Backend::Nvml => open_nvml(),
    }
}

#[cfg(feature = "nvml")]
fn open_nvml() -> anyhow::Result<Box<dyn DeviceRegistry>> {
    Ok(Box::new(crate::gpu::nvml::NvmlRegistry::new()?))
}

#[cfg(not(feature = "nvml"))]
fn open_nvml() -> anyhow::Result<Box<dyn DeviceRegistry>> {
    anyhow::bail!("NVML backend requested but gpu-reserve was built without the `nvml` feature; use --backend stub")
}
