//! Build script for gpu-reserve.
//!
//! NVML is loaded at runtime by `nvml-wrapper` (libnvidia-ml.so / nvml.dll),
//! so nothing is linked here. The script only reminds the builder that the
//! driver library has to be present on the target machine.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "nvml")]
    {
        println!("cargo:warning=NVML feature enabled — the NVIDIA driver must be installed at runtime");
    }
}
