//! gpu-reserve: pick, restrict and wait for GPUs before an ML workload starts.
//!
//! A typical setup sequence:
//!
//! ```no_run
//! use gpu_reserve::gpu::{await_memory, restrict, select_freeest, ThreadSleeper, GIB};
//! use gpu_reserve::gpu::stub::{stub_devices_molly, StubRegistry};
//! use gpu_reserve::gpu::DEFAULT_POLL_INTERVAL;
//!
//! let mut registry = StubRegistry::new(stub_devices_molly());
//! let (index, _free) = select_freeest(&registry)?;
//! await_memory(&registry, &mut ThreadSleeper, index, 4 * GIB, DEFAULT_POLL_INTERVAL)?;
//! let devices = restrict(&mut registry, index)?;
//! # Ok::<(), gpu_reserve::gpu::GpuError>(())
//! ```

pub mod backend;
pub mod config;
pub mod gpu;
