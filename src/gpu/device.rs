//! GPU device identities and device selections.
//!
//! A [`GpuDevice`] is a physical accelerator as enumerated by the driver.
//! A [`DeviceSelection`] is what callers pass in: one index, a list of
//! indices, or the `-1` sentinel meaning every physical device.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gpu::registry::GpuError;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Sentinel index meaning "all physical devices".
pub const ALL_DEVICES: i64 = -1;

pub const VISIBLE_DEVICES_VAR: &str = "CUDA_VISIBLE_DEVICES";
pub const DEVICE_ORDER_VAR: &str = "CUDA_DEVICE_ORDER";
pub const ALLOW_GROWTH_VAR: &str = "TF_FORCE_GPU_ALLOW_GROWTH";

/// Convert a byte count to gibibytes for display.
pub fn to_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

/// Convert a (possibly fractional) gibibyte amount to bytes.
pub fn from_gib(gib: f64) -> u64 {
    if gib <= 0.0 {
        return 0;
    }
    (gib * GIB as f64).round() as u64
}

/// A physical GPU device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GpuDevice {
    /// Index in driver enumeration order.
    pub index: usize,

    /// Device name (e.g., "NVIDIA GeForce GTX 1070").
    pub name: String,
}

impl GpuDevice {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPU:{} ({})", self.index, self.name)
    }
}

/// Render a device list as `[GPU:0 (name), GPU:1 (name)]`.
pub fn format_devices(devices: &[GpuDevice]) -> String {
    let parts: Vec<String> = devices.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Format physical indices as a `CUDA_VISIBLE_DEVICES` value.
pub fn cuda_visible_devices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a `CUDA_VISIBLE_DEVICES` value into physical indices.
///
/// CUDA stops at the first invalid entry, so this does too. UUID and MIG
/// entries are not understood and end the list.
pub fn parse_visible_devices(value: &str, physical_count: usize) -> Vec<usize> {
    let value = value.trim();
    if value.is_empty() {
        return Vec::new();
    }

    let mut indices = Vec::new();
    for entry in value.split(',') {
        match entry.trim().parse::<usize>() {
            Ok(i) if i < physical_count && !indices.contains(&i) => indices.push(i),
            _ => break,
        }
    }
    indices
}

/// Whether a `CUDA_DEVICE_ORDER` value numbers devices the way NVML does.
///
/// CUDA defaults to `FASTEST_FIRST`, under which `CUDA_VISIBLE_DEVICES`
/// indices may name different cards than NVML's PCI bus order.
pub fn device_order_matches_nvml(order: Option<&str>) -> bool {
    order.map_or(false, |o| o.trim() == "PCI_BUS_ID")
}

/// One or more requested device indices.
///
/// A scalar converts into a one-element selection, so `5` and `vec![5]`
/// behave identically everywhere a selection is accepted. The exact
/// selection `[-1]` expands to all physical devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SelectionRepr", into = "Vec<i64>")]
pub struct DeviceSelection(Vec<i64>);

impl DeviceSelection {
    /// Every physical device.
    pub fn all() -> Self {
        Self(vec![ALL_DEVICES])
    }

    pub fn is_all(&self) -> bool {
        self.0 == [ALL_DEVICES]
    }

    /// Raw requested indices, before expansion.
    pub fn indices(&self) -> &[i64] {
        &self.0
    }

    /// Resolve against the physical device list.
    ///
    /// Returns the requested physical indices in request order. `[-1]`
    /// expands to `0..physical.len()`. Any index outside that range
    /// (negative ones included) fails with [`GpuError::OutOfRangeIndex`]
    /// naming every offending index.
    pub fn resolve(&self, physical: &[GpuDevice]) -> Result<Vec<usize>, GpuError> {
        if self.is_all() {
            return Ok((0..physical.len()).collect());
        }

        let offending: Vec<i64> = self
            .0
            .iter()
            .copied()
            .filter(|&i| usize::try_from(i).map_or(true, |i| i >= physical.len()))
            .collect();

        if !offending.is_empty() {
            return Err(GpuError::OutOfRangeIndex {
                indices: offending,
                physical: physical.to_vec(),
            });
        }

        Ok(self.0.iter().map(|&i| i as usize).collect())
    }
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<i64> for DeviceSelection {
    fn from(index: i64) -> Self {
        Self(vec![index])
    }
}

impl From<usize> for DeviceSelection {
    fn from(index: usize) -> Self {
        Self(vec![index as i64])
    }
}

impl From<Vec<i64>> for DeviceSelection {
    fn from(indices: Vec<i64>) -> Self {
        Self(indices)
    }
}

impl From<&[i64]> for DeviceSelection {
    fn from(indices: &[i64]) -> Self {
        Self(indices.to_vec())
    }
}

impl<const N: usize> From<[i64; N]> for DeviceSelection {
    fn from(indices: [i64; N]) -> Self {
        Self(indices.to_vec())
    }
}

/// The device set returned by a restriction can be fed straight back in.
impl From<&[GpuDevice]> for DeviceSelection {
    fn from(devices: &[GpuDevice]) -> Self {
        Self(devices.iter().map(|d| d.index as i64).collect())
    }
}

impl From<&Vec<GpuDevice>> for DeviceSelection {
    fn from(devices: &Vec<GpuDevice>) -> Self {
        Self::from(devices.as_slice())
    }
}

impl From<DeviceSelection> for Vec<i64> {
    fn from(selection: DeviceSelection) -> Self {
        selection.0
    }
}

// Config files may say `"devices": 1` or `"devices": [0, 1]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SelectionRepr {
    One(i64),
    Many(Vec<i64>),
}

impl From<SelectionRepr> for DeviceSelection {
    fn from(repr: SelectionRepr) -> Self {
        match repr {
            SelectionRepr::One(i) => Self::from(i),
            SelectionRepr::Many(v) => Self::from(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn physical(n: usize) -> Vec<GpuDevice> {
        (0..n).map(|i| GpuDevice::new(i, "Test GPU")).collect()
    }

    #[test]
    fn test_scalar_is_singleton() {
        assert_eq!(DeviceSelection::from(3i64), DeviceSelection::from(vec![3]));
        assert_eq!(DeviceSelection::from(3usize), DeviceSelection::from([3]));
    }

    #[test]
    fn test_all_sentinel_expands() {
        let resolved = DeviceSelection::all().resolve(&physical(3)).unwrap();
        assert_eq!(resolved, vec![0, 1, 2]);

        // -1 mixed with other indices is not the sentinel.
        let err = DeviceSelection::from(vec![0, -1]).resolve(&physical(3));
        assert!(err.is_err());
    }

    #[test]
    fn test_resolve_preserves_order() {
        let resolved = DeviceSelection::from(vec![2, 0]).resolve(&physical(3)).unwrap();
        assert_eq!(resolved, vec![2, 0]);
    }

    #[test]
    fn test_resolve_reports_all_offenders() {
        match DeviceSelection::from(vec![0, 4, -2, 7]).resolve(&physical(2)) {
            Err(GpuError::OutOfRangeIndex { indices, physical }) => {
                assert_eq!(indices, vec![4, -2, 7]);
                assert_eq!(physical.len(), 2);
            }
            other => panic!("expected OutOfRangeIndex, got {other:?}"),
        }
    }

    #[test]
    fn test_gib_conversion() {
        assert_eq!(to_gib(3 * GIB / 2), 1.5);
        assert_eq!(from_gib(1.5), 3 * GIB / 2);
        assert_eq!(from_gib(-1.0), 0);
    }

    #[test]
    fn test_parse_visible_devices() {
        assert_eq!(parse_visible_devices("0,1", 2), vec![0, 1]);
        assert_eq!(parse_visible_devices(" 1 , 0 ", 2), vec![1, 0]);
        assert_eq!(parse_visible_devices("", 2), Vec::<usize>::new());
        assert_eq!(parse_visible_devices("0,5,1", 2), vec![0]);
        assert_eq!(parse_visible_devices("GPU-abc", 2), Vec::<usize>::new());
        assert_eq!(cuda_visible_devices(&[2, 0]), "2,0");
    }

    #[test]
    fn test_device_order_matches_nvml() {
        assert!(device_order_matches_nvml(Some("PCI_BUS_ID")));
        assert!(!device_order_matches_nvml(Some("FASTEST_FIRST")));
        assert!(!device_order_matches_nvml(None));
    }

    #[test]
    fn test_selection_deserializes_scalar_or_list() {
        let one: DeviceSelection = serde_json::from_str("1").unwrap();
        let many: DeviceSelection = serde_json::from_str("[1]").unwrap();
        assert_eq!(one, many);
        assert_eq!(serde_json::to_string(&one).unwrap(), "[1]");
    }
}
