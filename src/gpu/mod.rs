//! GPU device selection, restriction and memory waiting.
//!
//! - [`device`]: device identities, selections and byte units
//! - [`registry`]: the [`DeviceRegistry`](registry::DeviceRegistry) seam and errors
//! - [`stub`]: in-memory registry for tests and dry runs
//! - [`nvml`]: NVML-backed registry (feature `nvml`)
//! - [`selector`]: pick the GPU with the most free memory
//! - [`visibility`]: restrict the workload to chosen GPUs
//! - [`waiter`]: block until GPUs have enough free memory
//! - [`reserve`]: select, wait and restrict in one call

pub mod device;
#[cfg(feature = "nvml")]
pub mod nvml;
pub mod registry;
pub mod reserve;
pub mod selector;
pub mod stub;
pub mod visibility;
pub mod waiter;

pub use device::{DeviceSelection, GpuDevice, GIB, KIB, MIB};
pub use registry::{DeviceRegistry, GpuError};
pub use reserve::reserve_freeest;
pub use selector::select_freeest;
pub use visibility::restrict;
pub use waiter::{await_memory, Sleeper, ThreadSleeper, DEFAULT_POLL_INTERVAL};
